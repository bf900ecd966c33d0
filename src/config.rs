use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chatbot::settings::GenerationParams;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    telegram_bot_token: String,
    /// Gemini API key for all generation requests
    #[serde(default)]
    gemini_api_key: String,
    /// Default display name, also the trigger word in groups
    bot_name: Option<String>,
    /// Retention depth in user+bot pairs
    max_history: Option<usize>,
    model: Option<String>,
    /// Directory for the database and logs. Defaults to current directory.
    data_dir: Option<String>,
    #[serde(default)]
    generation: GenerationDefaults,
    safety_threshold: Option<String>,
    #[serde(default = "default_inactivity_minutes")]
    inactivity_minutes: u64,
    #[serde(default)]
    reset_history_on_inactivity: bool,
}

#[derive(Deserialize)]
#[serde(default)]
struct GenerationDefaults {
    temperature: f64,
    top_k: f64,
    top_p: f64,
    max_output_tokens: f64,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        let params = GenerationParams::default();
        Self {
            temperature: params.temperature,
            top_k: params.top_k,
            top_p: params.top_p,
            max_output_tokens: params.max_output_tokens,
        }
    }
}

fn default_inactivity_minutes() -> u64 {
    60
}

pub const DEFAULT_BOT_NAME: &str = "Amelie";
pub const DEFAULT_MAX_HISTORY: usize = 500;
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_SAFETY_THRESHOLD: &str = "BLOCK_NONE";

pub struct Config {
    pub telegram_bot_token: String,
    pub gemini_api_key: String,
    pub bot_name: String,
    /// Retention depth in message pairs; the store keeps `2 * max_history` rows per chat.
    pub max_history: usize,
    pub model: String,
    /// Directory for state files (database, logs).
    pub data_dir: PathBuf,
    /// Hardcoded generation defaults that per-chat settings overlay.
    pub generation: GenerationParams,
    pub safety_threshold: String,
    /// Inactivity timer period in minutes (0 = disabled).
    pub inactivity_minutes: u64,
    pub reset_history_on_inactivity: bool,
}

impl Config {
    /// Load from a JSON file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Load with an explicit environment lookup (tests pass a fake one).
    pub fn load_with_env<P, F>(path: P, env: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        let telegram_bot_token = env("TELEGRAM_BOT_TOKEN").unwrap_or(file.telegram_bot_token);
        let gemini_api_key = env("GEMINI_API_KEY").unwrap_or(file.gemini_api_key);
        let bot_name = env("BOT_NAME")
            .or(file.bot_name)
            .unwrap_or_else(|| DEFAULT_BOT_NAME.to_string());

        let max_history = match env("MAX_HISTORY") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                ConfigError::Validation(format!("MAX_HISTORY must be a positive integer, got '{raw}'"))
            })?,
            None => file.max_history.unwrap_or(DEFAULT_MAX_HISTORY),
        };

        if telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into()
            ));
        }
        if gemini_api_key.is_empty() {
            return Err(ConfigError::Validation("gemini_api_key is required".into()));
        }
        if bot_name.trim().is_empty() {
            return Err(ConfigError::Validation("bot_name must not be empty".into()));
        }
        if max_history == 0 {
            return Err(ConfigError::Validation("max_history must be greater than zero".into()));
        }

        let generation = GenerationParams {
            temperature: file.generation.temperature,
            top_k: file.generation.top_k,
            top_p: file.generation.top_p,
            max_output_tokens: file.generation.max_output_tokens,
        };
        if !generation.is_finite() {
            return Err(ConfigError::Validation("generation defaults must be finite numbers".into()));
        }

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            telegram_bot_token,
            gemini_api_key,
            bot_name: bot_name.trim().to_string(),
            max_history,
            model: file.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            data_dir,
            generation,
            safety_threshold: file
                .safety_threshold
                .unwrap_or_else(|| DEFAULT_SAFETY_THRESHOLD.to_string()),
            inactivity_minutes: file.inactivity_minutes,
            reset_history_on_inactivity: file.reset_history_on_inactivity,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("amelie.db")
    }

    /// Inactivity timer period, or `None` when disabled.
    pub fn inactivity_period(&self) -> Option<Duration> {
        (self.inactivity_minutes > 0).then(|| Duration::from_secs(self.inactivity_minutes.saturating_mul(60)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_valid_config_uses_defaults() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdefGHIjklMNOpqrsTUVwxyz",
            "gemini_api_key": "secret"
        }"#);
        let config = Config::load_with_env(file.path(), no_env).expect("should load valid config");
        assert_eq!(config.bot_name, "Amelie");
        assert_eq!(config.max_history, 500);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.generation, GenerationParams::default());
        assert_eq!(config.safety_threshold, "BLOCK_NONE");
        assert_eq!(config.inactivity_minutes, 60);
        assert!(!config.reset_history_on_inactivity);
        assert_eq!(config.database_path(), PathBuf::from("./amelie.db"));
        assert_eq!(config.inactivity_period(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_inactivity_period_bounds() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "gemini_api_key": "secret",
            "inactivity_minutes": 0
        }"#);
        let mut config = Config::load_with_env(file.path(), no_env).unwrap();
        assert_eq!(config.inactivity_period(), None);

        config.inactivity_minutes = u64::MAX;
        assert_eq!(config.inactivity_period(), Some(Duration::from_secs(u64::MAX)));
    }

    #[test]
    fn test_generation_defaults_partially_overridden() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "gemini_api_key": "secret",
            "generation": { "temperature": 0.7 }
        }"#);
        let config = Config::load_with_env(file.path(), no_env).unwrap();
        assert_eq!(config.generation.temperature, 0.7);
        assert_eq!(config.generation.top_k, 100.0);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "gemini_api_key": "from-file",
            "bot_name": "FileName",
            "max_history": 10
        }"#);
        let env: HashMap<&str, &str> = HashMap::from([
            ("GEMINI_API_KEY", "from-env"),
            ("BOT_NAME", "Lia"),
            ("MAX_HISTORY", "3"),
        ]);
        let config = Config::load_with_env(file.path(), |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.gemini_api_key, "from-env");
        assert_eq!(config.bot_name, "Lia");
        assert_eq!(config.max_history, 3);
    }

    #[test]
    fn test_token_only_in_env() {
        let file = write_config(r#"{ "gemini_api_key": "secret" }"#);
        let config = Config::load_with_env(file.path(), |k| {
            (k == "TELEGRAM_BOT_TOKEN").then(|| "42:abc".to_string())
        })
        .unwrap();
        assert_eq!(config.telegram_bot_token, "42:abc");
    }

    #[test]
    fn test_invalid_max_history_env() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "gemini_api_key": "secret"
        }"#);
        let err = assert_err(Config::load_with_env(file.path(), |k| {
            (k == "MAX_HISTORY").then(|| "lots".to_string())
        }));
        assert!(err.to_string().contains("MAX_HISTORY"));
    }

    #[test]
    fn test_zero_max_history() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "gemini_api_key": "secret",
            "max_history": 0
        }"#);
        let err = assert_err(Config::load_with_env(file.path(), no_env));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_missing_api_key() {
        let file = write_config(r#"{ "telegram_bot_token": "123456789:ABCdef" }"#);
        let err = assert_err(Config::load_with_env(file.path(), no_env));
        assert!(err.to_string().contains("gemini_api_key"));
    }

    #[test]
    fn test_empty_token() {
        let file = write_config(r#"{ "gemini_api_key": "secret" }"#);
        let err = assert_err(Config::load_with_env(file.path(), no_env));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("telegram_bot_token"));
    }

    #[test]
    fn test_invalid_token_format_non_numeric_id() {
        let file = write_config(r#"{
            "telegram_bot_token": "notanumber:ABCdef",
            "gemini_api_key": "secret"
        }"#);
        let err = assert_err(Config::load_with_env(file.path(), no_env));
        assert!(err.to_string().contains("invalid"));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load_with_env("/nonexistent/path/amelie.json", no_env));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load_with_env(file.path(), no_env));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
