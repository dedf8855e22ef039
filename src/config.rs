use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const ENV_PREFIX: &str = "CERT_SCRAPER";
pub const GROQ_API_KEY: &str = "GROQ_API_KEY";
pub const SPIDER_API_KEY: &str = "SPIDER_API_KEY";

const DEFAULT_MODEL: &str = "deepseek-r1-distill-llama-70b";
const DEFAULT_API_BASE: &str = "https://api.groq.com/openai/v1";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Tunables read from `CERT_SCRAPER_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub model: String,
    pub api_base: String,
    pub timeout_secs: u64,
}

impl Settings {
    /// Load settings from the process environment, or from `source` when given.
    pub fn load(source: Option<config::Map<String, String>>) -> Result<Self, ConfigError> {
        let settings: Settings = config::Config::builder()
            .set_default("model", DEFAULT_MODEL)?
            .set_default("api_base", DEFAULT_API_BASE)?
            .set_default("timeout_secs", DEFAULT_TIMEOUT_SECS)?
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(source),
            )
            .build()?
            .try_deserialize()?;

        if settings.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be positive".into()));
        }
        if url::Url::parse(&settings.api_base).is_err() {
            return Err(ConfigError::Invalid(format!(
                "api_base '{}' is not a URL",
                settings.api_base
            )));
        }
        Ok(settings)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Secrets for the external services.
#[derive(Clone)]
pub struct Credentials {
    pub groq_api_key: String,
    pub spider_api_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("groq_api_key", &"***")
            .field("spider_api_key", &self.spider_api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Credentials {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let groq_api_key =
            non_blank(GROQ_API_KEY).ok_or(ConfigError::MissingCredential(GROQ_API_KEY))?;
        Ok(Self {
            groq_api_key,
            spider_api_key: non_blank(SPIDER_API_KEY),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub settings: Settings,
    pub credentials: Credentials,
}

impl AppConfig {
    /// Credentials are checked first; settings come from `source`, or the
    /// process environment when `None`.
    pub fn load(
        lookup: impl Fn(&str) -> Option<String>,
        source: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            credentials: Credentials::from_lookup(lookup)?,
            settings: Settings::load(source)?,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            credentials: Credentials::from_env()?,
            settings: Settings::load(None)?,
        })
    }
}
