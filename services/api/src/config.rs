use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::Level;
use tutor_core::BotImplementation;

pub const DEFAULT_DAILY_API_URL: &str = "https://api.daily.co/v1";
pub const DEFAULT_GEMINI_MODEL: &str = "models/gemini-2.5-flash-live-preview";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini-realtime-preview";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub bot_implementation: BotImplementation,
    pub daily_api_key: Option<String>,
    pub daily_api_url: String,
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub gemini_model: String,
    pub openai_model: String,
    pub shutdown_timeout: Duration,
    pub reload: bool,
    pub log_level: Level,
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let host_str = std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let host = host_str
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidValue("SERVER_HOST".to_string(), e.to_string()))?;
        let port_str = std::env::var("SERVER_PORT").unwrap_or_else(|_| "7860".to_string());
        let port = port_str
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidValue("SERVER_PORT".to_string(), e.to_string()))?;

        let implementation_str =
            std::env::var("BOT_IMPLEMENTATION").unwrap_or_else(|_| "gemini".to_string());
        let bot_implementation = implementation_str
            .trim()
            .to_lowercase()
            .parse::<BotImplementation>()
            .map_err(|e| ConfigError::InvalidValue("BOT_IMPLEMENTATION".to_string(), e.to_string()))?;

        let daily_api_key = non_empty_var("DAILY_API_KEY");
        let daily_api_url =
            std::env::var("DAILY_API_URL").unwrap_or_else(|_| DEFAULT_DAILY_API_URL.to_string());
        let gemini_api_key = non_empty_var("GEMINI_API_KEY");
        let openai_api_key = non_empty_var("OPENAI_API_KEY");
        let gemini_model =
            std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_GEMINI_MODEL.to_string());
        let openai_model =
            std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_OPENAI_MODEL.to_string());

        let timeout_str = std::env::var("SHUTDOWN_TIMEOUT").unwrap_or_else(|_| "10".to_string());
        let shutdown_timeout = timeout_str
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ConfigError::InvalidValue("SHUTDOWN_TIMEOUT".to_string(), e.to_string()))?;

        let reload = std::env::var("RELOAD")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address: SocketAddr::new(host, port),
            bot_implementation,
            daily_api_key,
            daily_api_url,
            gemini_api_key,
            openai_api_key,
            gemini_model,
            openai_model,
            shutdown_timeout,
            reload,
            log_level,
        })
    }

    /// The credential the given backend needs, if configured.
    pub fn api_key_for(&self, implementation: BotImplementation) -> Option<&str> {
        match implementation {
            BotImplementation::Gemini => self.gemini_api_key.as_deref(),
            BotImplementation::OpenAI => self.openai_api_key.as_deref(),
        }
    }

    /// Ensures the given backend's credential is present.
    pub fn require_api_key(&self, implementation: BotImplementation) -> Result<&str, ConfigError> {
        self.api_key_for(implementation).ok_or_else(|| {
            ConfigError::MissingVar(format!(
                "{}_API_KEY must be set for '{}' bots",
                implementation.as_str().to_uppercase(),
                implementation
            ))
        })
    }
}

#[cfg(test)]
impl Config {
    /// A configuration with every credential set, for tests.
    pub(crate) fn for_tests() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            bot_implementation: BotImplementation::Gemini,
            daily_api_key: Some("test-daily-key".to_string()),
            daily_api_url: DEFAULT_DAILY_API_URL.to_string(),
            gemini_api_key: Some("test-gemini-key".to_string()),
            openai_api_key: Some("test-openai-key".to_string()),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            shutdown_timeout: Duration::from_secs(10),
            reload: false,
            log_level: Level::INFO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tracing::Level;

    fn clear_env_vars() {
        unsafe {
            for var in [
                "SERVER_HOST",
                "SERVER_PORT",
                "BOT_IMPLEMENTATION",
                "DAILY_API_KEY",
                "DAILY_API_URL",
                "GEMINI_API_KEY",
                "OPENAI_API_KEY",
                "GEMINI_MODEL",
                "OPENAI_MODEL",
                "SHUTDOWN_TIMEOUT",
                "RELOAD",
                "RUST_LOG",
            ] {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        clear_env_vars();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:7860");
        assert_eq!(config.bot_implementation, BotImplementation::Gemini);
        assert_eq!(config.daily_api_key, None);
        assert_eq!(config.daily_api_url, DEFAULT_DAILY_API_URL);
        assert_eq!(config.gemini_api_key, None);
        assert_eq!(config.openai_api_key, None);
        assert_eq!(config.gemini_model, DEFAULT_GEMINI_MODEL);
        assert_eq!(config.openai_model, DEFAULT_OPENAI_MODEL);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
        assert!(!config.reload);
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("SERVER_HOST", "127.0.0.1");
            env::set_var("SERVER_PORT", "8080");
            env::set_var("BOT_IMPLEMENTATION", " OpenAI ");
            env::set_var("DAILY_API_KEY", "daily-key");
            env::set_var("DAILY_API_URL", "https://daily.example/v1");
            env::set_var("OPENAI_API_KEY", "custom-openai-key");
            env::set_var("GEMINI_API_KEY", "custom-gemini-key");
            env::set_var("SHUTDOWN_TIMEOUT", "3");
            env::set_var("RELOAD", "TRUE");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:8080");
        assert_eq!(config.bot_implementation, BotImplementation::OpenAI);
        assert_eq!(config.daily_api_key.as_deref(), Some("daily-key"));
        assert_eq!(config.daily_api_url, "https://daily.example/v1");
        assert_eq!(config.openai_api_key.as_deref(), Some("custom-openai-key"));
        assert_eq!(config.gemini_api_key.as_deref(), Some("custom-gemini-key"));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(3));
        assert!(config.reload);
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    #[serial]
    fn test_empty_keys_count_as_absent() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "");
            env::set_var("OPENAI_API_KEY", "   ");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.api_key_for(BotImplementation::Gemini), None);
        assert_eq!(config.api_key_for(BotImplementation::OpenAI), None);
        match config.require_api_key(BotImplementation::Gemini).unwrap_err() {
            ConfigError::MissingVar(msg) => assert!(msg.contains("GEMINI_API_KEY")),
            _ => panic!("Expected MissingVar for GEMINI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_bot_implementation() {
        clear_env_vars();
        unsafe {
            env::set_var("BOT_IMPLEMENTATION", "claude");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "BOT_IMPLEMENTATION"),
            _ => panic!("Expected InvalidValue for BOT_IMPLEMENTATION"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_port() {
        clear_env_vars();
        unsafe {
            env::set_var("SERVER_PORT", "not-a-port");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "SERVER_PORT"),
            _ => panic!("Expected InvalidValue for SERVER_PORT"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_shutdown_timeout() {
        clear_env_vars();
        unsafe {
            env::set_var("SHUTDOWN_TIMEOUT", "-1");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "SHUTDOWN_TIMEOUT"),
            _ => panic!("Expected InvalidValue for SHUTDOWN_TIMEOUT"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }
}
