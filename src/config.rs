/**
 * Application Configuration
 * Environment-driven settings shared by routes, auth and email
 */

pub const DEFAULT_JWT_SECRET: &str = "default-jwt-secret-change-in-production";

lazy_static::lazy_static! {
    /// Process-wide configuration, read once from the environment
    pub static ref CONFIG: AppConfig = AppConfig::from_env();
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: String,
    pub host: String,
    pub port: u16,
    /// Public site URL used to build links in emails and the RSS feed
    pub site_url: String,
    pub site_name: String,
    pub jwt_secret: String,
    pub resend_api_key: Option<String>,
    pub email_from: String,
    pub admin_email: Option<String>,
    pub admin_password_hash: Option<String>,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl AppConfig {
    pub fn from_env() -> Self {
        let site_url = env_opt("SITE_URL").unwrap_or_else(|| "http://localhost:3000".to_string());
        Self {
            environment: env_opt("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            host: env_opt("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: env_opt("PORT").and_then(|s| s.parse().ok()).unwrap_or(3001),
            site_url: site_url.trim_end_matches('/').to_string(),
            site_name: env_opt("SITE_NAME").unwrap_or_else(|| "Camino TV".to_string()),
            jwt_secret: env_opt("JWT_SECRET").unwrap_or_else(|| DEFAULT_JWT_SECRET.to_string()),
            resend_api_key: env_opt("RESEND_API_KEY"),
            email_from: env_opt("EMAIL_FROM")
                .unwrap_or_else(|| "Camino TV <newsletter@caminotv.fr>".to_string()),
            admin_email: env_opt("ADMIN_EMAIL").map(|e| e.to_lowercase()),
            admin_password_hash: env_opt("ADMIN_PASSWORD_HASH"),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Settings that must never reach production with their defaults.
    pub fn validate(&self) -> Result<(), String> {
        if self.is_production() && self.jwt_secret == DEFAULT_JWT_SECRET {
            return Err(
                "JWT_SECRET must be set to a secure, unique value in production".to_string(),
            );
        }
        Ok(())
    }

    pub fn site_link(&self, path: &str) -> String {
        format!("{}/{}", self.site_url, path.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AppConfig {
        AppConfig {
            environment: "development".to_string(),
            host: "127.0.0.1".to_string(),
            port: 3001,
            site_url: "https://caminotv.fr".to_string(),
            site_name: "Camino TV".to_string(),
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            resend_api_key: None,
            email_from: "Camino TV <newsletter@caminotv.fr>".to_string(),
            admin_email: None,
            admin_password_hash: None,
        }
    }

    #[test]
    fn test_default_secret_allowed_outside_production() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_default_secret_rejected_in_production() {
        let mut config = sample();
        config.environment = "production".to_string();
        assert!(config.validate().is_err());

        config.jwt_secret = "a-real-secret".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_site_link_joins_single_slash() {
        let config = sample();
        assert_eq!(
            config.site_link("/newsletter/confirm?token=abc"),
            "https://caminotv.fr/newsletter/confirm?token=abc"
        );
        assert_eq!(config.site_link("blog/x"), "https://caminotv.fr/blog/x");
    }
}
