/**
 * Request Validation
 * Field-level checks that collect every failure before answering 400
 */
use regex::Regex;

use crate::db::models::TextEnum;
use crate::error::{ApiError, FieldError};

lazy_static::lazy_static! {
    /// Valid slug pattern: lowercase letters, numbers, and hyphens
    static ref SLUG_REGEX: Regex = Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").unwrap();

    static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
}

pub fn is_valid_slug(slug: &str) -> bool {
    SLUG_REGEX.is_match(slug)
}

pub fn is_valid_email(email: &str) -> bool {
    email.len() <= 254 && EMAIL_REGEX.is_match(email)
}

pub fn is_valid_url(value: &str) -> bool {
    match reqwest::Url::parse(value) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, field: &str, message: impl Into<String>) -> &mut Self {
        self.errors.push(FieldError::new(field, message));
        self
    }

    pub fn check(&mut self, field: &str, ok: bool, message: &str) -> &mut Self {
        if !ok {
            self.error(field, message);
        }
        self
    }

    /// Character count (not bytes) of the trimmed value must lie in `min..=max`.
    pub fn length(&mut self, field: &str, value: &str, min: usize, max: usize) -> &mut Self {
        let len = value.trim().chars().count();
        if len < min {
            if min == 1 {
                self.error(field, "Ce champ est requis");
            } else {
                self.error(field, format!("Doit contenir au moins {} caractères", min));
            }
        } else if len > max {
            self.error(field, format!("Ne doit pas dépasser {} caractères", max));
        }
        self
    }

    pub fn max_length(&mut self, field: &str, value: &str, max: usize) -> &mut Self {
        self.length(field, value, 0, max)
    }

    pub fn url(&mut self, field: &str, value: &str) -> &mut Self {
        self.check(field, is_valid_url(value), "URL invalide")
    }

    /// Empty strings are accepted for optional URL fields.
    pub fn optional_url(&mut self, field: &str, value: Option<&str>) -> &mut Self {
        match value {
            Some(v) if !v.trim().is_empty() => self.url(field, v),
            _ => self,
        }
    }

    pub fn email(&mut self, field: &str, value: &str) -> &mut Self {
        self.check(field, is_valid_email(value.trim()), "Adresse email invalide")
    }

    pub fn slug(&mut self, field: &str, value: &str) -> &mut Self {
        self.check(
            field,
            is_valid_slug(value),
            "Le slug ne doit contenir que des lettres minuscules, des chiffres et des tirets",
        )
    }

    pub fn range_f64(&mut self, field: &str, value: f64, min: f64, max: f64) -> &mut Self {
        if !value.is_finite() || value < min || value > max {
            self.error(field, format!("Doit être compris entre {} et {}", min, max));
        }
        self
    }

    pub fn range_i64(&mut self, field: &str, value: i64, min: i64, max: i64) -> &mut Self {
        if value < min || value > max {
            self.error(field, format!("Doit être compris entre {} et {}", min, max));
        }
        self
    }

    /// Parse an enum value, recording the allowed values on failure.
    pub fn choice<E: TextEnum>(&mut self, field: &str, value: &str) -> Option<E> {
        let parsed = E::parse(value.trim());
        if parsed.is_none() {
            self.error(
                field,
                format!("Valeur invalide, valeurs acceptées : {}", E::allowed()),
            );
        }
        parsed
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(self.errors))
        }
    }
}

/// Trim an optional string, mapping blank input to `None`.
pub fn clean_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
