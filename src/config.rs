use std::{env, net::SocketAddr, str::FromStr};

use crate::error::AppError;

const DEFAULT_COOKIE_SECRET: &str = "change-me-organisize-cookie-secret-please";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

impl FromStr for Environment {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" | "test" => Ok(Environment::Dev),
            "prod" | "production" => Ok(Environment::Prod),
            other => Err(AppError::Config(format!("unknown APP_ENV `{other}`"))),
        }
    }
}

/// Which transport delivers outbound mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailBackend {
    Console,
    Ses,
    Memory,
}

impl FromStr for EmailBackend {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(EmailBackend::Console),
            "ses" => Ok(EmailBackend::Ses),
            "memory" | "locmem" => Ok(EmailBackend::Memory),
            other => Err(AppError::Config(format!("unknown EMAIL_BACKEND `{other}`"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub backend: EmailBackend,
    pub from_address: String,
    pub aws_region: String,
    pub bounce_queue_url: Option<String>,
    pub complaint_queue_url: Option<String>,
    pub delivery_queue_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub site_url: String,
    pub cookie_secret: String,
    pub email: EmailConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let environment: Environment = env::var("APP_ENV")
            .unwrap_or_else(|_| "dev".to_string())
            .parse()?;
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://planner.db".to_string());
        let listen_addr: SocketAddr = env::var("APP_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid APP_LISTEN_ADDR: {err}")))?;

        let site_url = env::var("SITE_URL").unwrap_or_else(|_| "http://127.0.0.1:3000".to_string());
        url::Url::parse(&site_url)
            .map_err(|err| AppError::Config(format!("invalid SITE_URL: {err}")))?;

        let cookie_secret =
            env::var("COOKIE_SECRET").unwrap_or_else(|_| DEFAULT_COOKIE_SECRET.to_string());

        let email = EmailConfig {
            backend: env::var("EMAIL_BACKEND")
                .unwrap_or_else(|_| "console".to_string())
                .parse()?,
            from_address: env::var("DEFAULT_FROM_EMAIL")
                .unwrap_or_else(|_| "noreply@organisize.com".to_string()),
            aws_region: env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            bounce_queue_url: optional_var("SES_BOUNCE_QUEUE_URL"),
            complaint_queue_url: optional_var("SES_COMPLAINT_QUEUE_URL"),
            delivery_queue_url: optional_var("SES_DELIVERY_QUEUE_URL"),
        };

        let config = Self {
            environment,
            database_url,
            listen_addr,
            site_url,
            cookie_secret,
            email,
        };
        config.validate()?;
        Ok(config)
    }

    /// Production must never boot with development fallbacks.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.environment != Environment::Prod {
            return Ok(());
        }
        if self.cookie_secret == DEFAULT_COOKIE_SECRET || self.cookie_secret.len() < 32 {
            return Err(AppError::Config(
                "COOKIE_SECRET must be set to at least 32 characters in production".into(),
            ));
        }
        if self.email.backend == EmailBackend::Memory {
            return Err(AppError::Config(
                "EMAIL_BACKEND=memory is not allowed in production".into(),
            ));
        }
        Ok(())
    }

    /// Absolute link into the site for use in outbound mail.
    pub fn absolute_url(&self, path: &str) -> String {
        match url::Url::parse(&self.site_url).and_then(|base| base.join(path)) {
            Ok(url) => url.to_string(),
            Err(_) => format!("{}{}", self.site_url.trim_end_matches('/'), path),
        }
    }
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(environment: Environment) -> AppConfig {
        AppConfig {
            environment,
            database_url: "sqlite::memory:".into(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            site_url: "https://organisize.com".into(),
            cookie_secret: DEFAULT_COOKIE_SECRET.into(),
            email: EmailConfig {
                backend: EmailBackend::Memory,
                from_address: "noreply@organisize.com".into(),
                aws_region: "us-east-1".into(),
                bounce_queue_url: None,
                complaint_queue_url: None,
                delivery_queue_url: None,
            },
        }
    }

    #[test]
    fn dev_accepts_fallback_secret() {
        assert!(sample(Environment::Dev).validate().is_ok());
    }

    #[test]
    fn prod_rejects_fallback_secret() {
        let err = sample(Environment::Prod).validate().unwrap_err();
        assert!(err.to_string().contains("COOKIE_SECRET"));
    }

    #[test]
    fn prod_rejects_memory_mailer() {
        let mut config = sample(Environment::Prod);
        config.cookie_secret = "x".repeat(48);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("EMAIL_BACKEND"));
    }

    #[test]
    fn absolute_url_joins_site() {
        let config = sample(Environment::Dev);
        assert_eq!(
            config.absolute_url("/vacations/4"),
            "https://organisize.com/vacations/4"
        );
    }

    #[test]
    fn backend_names_parse() {
        assert_eq!("SES".parse::<EmailBackend>().unwrap(), EmailBackend::Ses);
        assert_eq!("locmem".parse::<EmailBackend>().unwrap(), EmailBackend::Memory);
        assert!("smtp".parse::<EmailBackend>().is_err());
    }
}
