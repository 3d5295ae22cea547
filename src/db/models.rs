//! Database Models - structs representing database tables (used by sqlx/serde).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Enumerations stored as TEXT columns and exchanged as plain strings.
pub trait TextEnum: Sized + Copy + 'static {
    fn all() -> &'static [Self];
    fn as_str(&self) -> &'static str;

    fn parse(value: &str) -> Option<Self> {
        Self::all().iter().copied().find(|v| v.as_str() == value)
    }

    fn allowed() -> String {
        Self::all()
            .iter()
            .map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl TextEnum for $name {
            fn all() -> &'static [Self] {
                &[$($name::$variant),+]
            }

            fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                <$name as TextEnum>::parse(&value)
                    .ok_or_else(|| format!("unknown {} value `{}`", stringify!($name), value))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(
    /// Account role, checked on every privileged mutation
    Role {
        User => "USER",
        Admin => "ADMIN",
    }
);

text_enum!(DealCategory {
    Sneakers => "sneakers",
    Mode => "mode",
    Tech => "tech",
    Gaming => "gaming",
    Beaute => "beaute",
    Maison => "maison",
    Sport => "sport",
    Autre => "autre",
});

text_enum!(BlogCategory {
    Culture => "culture",
    Sneakers => "sneakers",
    Mode => "mode",
    Musique => "musique",
    Lifestyle => "lifestyle",
    Tech => "tech",
    Interviews => "interviews",
});

text_enum!(MessageCategory {
    General => "general",
    Partenariat => "partenariat",
    Support => "support",
    Presse => "presse",
    Autre => "autre",
});

text_enum!(
    /// Contact message lifecycle: NEW → READ → REPLIED → ARCHIVED
    MessageStatus {
        New => "NEW",
        Read => "READ",
        Replied => "REPLIED",
        Archived => "ARCHIVED",
    }
);

text_enum!(
    /// Newsletter double opt-in: PENDING → ACTIVE → UNSUBSCRIBED → PENDING
    SubscriberStatus {
        Pending => "PENDING",
        Active => "ACTIVE",
        Unsubscribed => "UNSUBSCRIBED",
    }
);

impl MessageStatus {
    fn rank(&self) -> u8 {
        match self {
            MessageStatus::New => 0,
            MessageStatus::Read => 1,
            MessageStatus::Replied => 2,
            MessageStatus::Archived => 3,
        }
    }

    /// Manual status changes only move forward; setting the current status is a no-op.
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        next.rank() >= self.rank()
    }
}

/// User model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub name: Option<String>,
    pub image: Option<String>,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Name shown next to authored content
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => self
                .email
                .split('@')
                .next()
                .unwrap_or(&self.email)
                .to_string(),
        }
    }
}

/// Deal model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub id: Uuid,
    pub title: String,
    pub brand: String,
    pub description: Option<String>,
    pub original_price: f64,
    pub sale_price: f64,
    pub discount_percentage: i32,
    #[sqlx(try_from = "String")]
    pub category: DealCategory,
    pub image_url: Option<String>,
    pub affiliate_url: String,
    pub is_featured: bool,
    pub is_active: bool,
    pub favorites_count: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Blog post model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogPost {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub excerpt: String,
    pub content: String,
    pub cover_image: Option<String>,
    #[sqlx(try_from = "String")]
    pub category: BlogCategory,
    pub author_id: Option<Uuid>,
    pub author_name: String,
    pub author_image: Option<String>,
    pub author_role: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub read_time: i32,
    pub tags: Vec<String>,
    pub is_featured: bool,
    pub is_published: bool,
    pub views: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Comment joined with its author's public profile
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    pub content: String,
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub author_name: Option<String>,
    pub author_image: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Contact message model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactMessage {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
    #[sqlx(try_from = "String")]
    pub category: MessageCategory,
    #[sqlx(try_from = "String")]
    pub status: MessageStatus,
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Admin reply joined with the admin's display name
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReply {
    pub id: Uuid,
    pub message_id: Uuid,
    pub admin_id: Uuid,
    pub admin_name: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Newsletter subscriber model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsletterSubscriber {
    pub id: Uuid,
    pub email: String,
    #[sqlx(try_from = "String")]
    pub status: SubscriberStatus,
    #[serde(skip_serializing, default)]
    pub confirmation_token: Option<String>,
    #[serde(skip_serializing, default)]
    pub unsubscribe_token: String,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_wire_format_is_uppercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"ADMIN\"");
        assert_eq!(Role::try_from("USER".to_string()).unwrap(), Role::User);
        assert!(Role::try_from("admin".to_string()).is_err());
    }

    #[test]
    fn test_category_parse_and_allowed_list() {
        assert_eq!(DealCategory::parse("sneakers"), Some(DealCategory::Sneakers));
        assert_eq!(DealCategory::parse("shoes"), None);
        assert!(BlogCategory::allowed().contains("culture"));
        assert_eq!(BlogCategory::Culture.to_string(), "culture");
    }

    #[test]
    fn test_message_status_moves_forward_only() {
        assert!(MessageStatus::New.can_transition_to(MessageStatus::Read));
        assert!(MessageStatus::New.can_transition_to(MessageStatus::Archived));
        assert!(MessageStatus::Read.can_transition_to(MessageStatus::Read));
        assert!(!MessageStatus::Replied.can_transition_to(MessageStatus::New));
        assert!(!MessageStatus::Archived.can_transition_to(MessageStatus::Read));
    }

    #[test]
    fn test_subscriber_tokens_are_not_serialized() {
        let now = Utc::now();
        let subscriber = NewsletterSubscriber {
            id: Uuid::new_v4(),
            email: "fan@caminotv.fr".to_string(),
            status: SubscriberStatus::Pending,
            confirmation_token: Some("secret".to_string()),
            unsubscribe_token: "also-secret".to_string(),
            confirmed_at: None,
            unsubscribed_at: None,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&subscriber).unwrap();
        assert_eq!(json["status"], "PENDING");
        assert!(json.get("confirmationToken").is_none());
        assert!(json.get("unsubscribeToken").is_none());
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: "redaction@caminotv.fr".to_string(),
            password_hash: String::new(),
            name: None,
            image: None,
            role: Role::Admin,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(user.display_name(), "redaction");
    }
}
