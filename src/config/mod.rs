use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub idle_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
    /// Consecutive idle timeouts after which a session is dropped.
    /// Unset means the session waits forever.
    #[serde(default)]
    pub max_idle_timeouts: Option<u32>,
    pub bind_retry_secs: u64,
    #[serde(default)]
    pub bind_max_attempts: Option<u32>,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn bind_retry_interval(&self) -> Duration {
        Duration::from_secs(self.bind_retry_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    pub snapshot_path: Option<String>,
    #[serde(default)]
    pub corpora: Vec<String>,
    pub online_learning: bool,
    #[serde(default = "default_fallback_responses")]
    pub fallback_responses: Vec<String>,
}

fn default_fallback_responses() -> Vec<String> {
    [
        "Huh?",
        "I'm not sure what you mean.",
        "Tell me more.",
        "Why do you say that?",
        "Interesting. Go on.",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub environment: String,
    pub server: ServerConfig,
    pub engine: EngineConfig,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Self::defaults()?
            // Add in settings from the config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add in settings from environment variables (with prefix "ALAN")
            // E.g., `ALAN_SERVER__PORT=5001` would set `Settings.server.port`
            .add_source(
                Environment::with_prefix("alan")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    /// Loopback on an ephemeral port, short timeouts and no snapshot file.
    pub fn new_for_test() -> Result<Self, ConfigError> {
        Self::defaults()?
            .set_override("environment", "test")?
            .set_override("server.host", "127.0.0.1")?
            .set_override("server.port", 0)?
            .set_override("server.idle_timeout_secs", 1)?
            .set_override("server.handshake_timeout_secs", 2)?
            .set_override("server.bind_retry_secs", 1)?
            .set_override("server.bind_max_attempts", 3)?
            .set_override("engine.snapshot_path", "")?
            .build()?
            .try_deserialize()
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("environment", "development")?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 9876)?
            .set_default("server.idle_timeout_secs", 5)?
            .set_default("server.handshake_timeout_secs", 10)?
            .set_default("server.bind_retry_secs", 3)?
            .set_default("engine.snapshot_path", "model.json")?
            .set_default("engine.online_learning", false)
    }

    /// Snapshot location, unless disabled for this environment.
    pub fn snapshot_path(&self) -> Option<&str> {
        self.engine.snapshot_path.as_deref().filter(|p| !p.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::new_for_test().expect("Failed to load settings");
        assert_eq!(settings.environment, "test");
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 0);
        assert_eq!(settings.server.max_idle_timeouts, None);
        assert_eq!(settings.server.bind_max_attempts, Some(3));
        assert!(!settings.engine.online_learning);
        assert!(settings.engine.corpora.is_empty());
        assert!(settings.snapshot_path().is_none());
        assert!(!settings.engine.fallback_responses.is_empty());
    }

    #[test]
    fn test_production_defaults() {
        let settings: Settings = Settings::defaults()
            .expect("defaults")
            .build()
            .expect("Failed to build config")
            .try_deserialize()
            .expect("Failed to deserialize settings");

        assert_eq!(settings.server.address(), "0.0.0.0:9876");
        assert_eq!(settings.server.idle_timeout(), Duration::from_secs(5));
        assert_eq!(settings.server.bind_retry_interval(), Duration::from_secs(3));
        assert_eq!(settings.snapshot_path(), Some("model.json"));
    }

    #[test]
    fn test_file_override() {
        let overrides = r#"
            [server]
            port = 9000
            max_idle_timeouts = 4

            [engine]
            snapshot_path = ""
            corpora = ["corpus/a.txt", "corpus/b.txt"]
            online_learning = true
            fallback_responses = ["What?"]
        "#;

        let settings: Settings = Settings::defaults()
            .expect("defaults")
            .add_source(File::from_str(overrides, FileFormat::Toml))
            .build()
            .expect("Failed to build config")
            .try_deserialize()
            .expect("Failed to deserialize settings");

        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.max_idle_timeouts, Some(4));
        assert_eq!(settings.engine.corpora.len(), 2);
        assert!(settings.engine.online_learning);
        assert_eq!(settings.engine.fallback_responses, vec!["What?".to_string()]);
        // An empty path disables snapshots.
        assert!(settings.snapshot_path().is_none());
    }

    #[test]
    fn test_invalid_port() {
        let result = Settings::defaults()
            .expect("defaults")
            .add_source(File::from_str("[server]\nport = \"invalid\"", FileFormat::Toml))
            .build()
            .and_then(|config| config.try_deserialize::<Settings>());

        assert!(result.is_err(), "Expected error for invalid port");
    }
}
