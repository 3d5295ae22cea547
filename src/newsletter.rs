//! Newsletter double opt-in rules.
//!
//! `PENDING → ACTIVE → UNSUBSCRIBED → PENDING`. The handlers in
//! `routes::newsletter` apply these decisions to the database.

use rand::Rng;

use crate::db::models::SubscriberStatus;
use crate::error::ApiError;

/// What a subscribe request does to the stored subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeAction {
    /// Unknown email: insert a PENDING row.
    Create,
    /// Still PENDING: rotate the confirmation token and resend.
    ResendConfirmation,
    /// UNSUBSCRIBED: back to PENDING with a fresh token.
    Resubscribe,
}

pub fn plan_subscribe(current: Option<SubscriberStatus>) -> Result<SubscribeAction, ApiError> {
    match current {
        None => Ok(SubscribeAction::Create),
        Some(SubscriberStatus::Pending) => Ok(SubscribeAction::ResendConfirmation),
        Some(SubscriberStatus::Unsubscribed) => Ok(SubscribeAction::Resubscribe),
        Some(SubscriberStatus::Active) => Err(ApiError::conflict(
            "Cette adresse est déjà inscrite à la newsletter",
        )),
    }
}

/// Only a PENDING subscriber can be confirmed.
pub fn can_confirm(status: SubscriberStatus) -> bool {
    status == SubscriberStatus::Pending
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// 256 bits from the thread-local CSPRNG, hex encoded (64 chars).
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
