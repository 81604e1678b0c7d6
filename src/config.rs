use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Name of the session, used in logs.
    pub name: String,
    /// An operation is cancelled once it runs longer than this.
    pub timeout_ms: u64,
    /// Backoff between polls of a validation script.
    pub validate_interval_ms: u64,
    /// If false, loading finishes once the raw document has arrived; images
    /// and other media are skipped.
    pub load_media_content: bool,
    pub user_agent: Option<String>,
    pub chrome: ChromeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChromeConfig {
    pub headless: bool,
    pub viewport: Viewport,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl SessionConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_validate_interval_ms(mut self, interval_ms: u64) -> Self {
        self.validate_interval_ms = interval_ms;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_media_content(mut self, load: bool) -> Self {
        self.load_media_content = load;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate_interval(&self) -> Duration {
        Duration::from_millis(self.validate_interval_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "browser-zombie".to_string(),
            timeout_ms: 30000,
            validate_interval_ms: 500,
            load_media_content: true,
            user_agent: None,
            chrome: ChromeConfig::default(),
        }
    }
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: Viewport::default(),
            args: vec![],
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SessionConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.validate_interval(), Duration::from_millis(500));
        assert!(config.load_media_content);
        assert!(config.chrome.headless);
    }

    #[test]
    fn deserializes_from_json() {
        let config: SessionConfig = serde_json::from_str(
            r#"{
                "name": "crawler",
                "timeout_ms": 5000,
                "validate_interval_ms": 100,
                "load_media_content": false,
                "user_agent": "RustBot/1.0",
                "chrome": { "headless": false, "viewport": { "width": 800, "height": 600 }, "args": [] }
            }"#,
        )
        .unwrap();
        assert_eq!(config.name, "crawler");
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.user_agent.as_deref(), Some("RustBot/1.0"));
        assert_eq!(config.chrome.viewport.width, 800);
    }
}
