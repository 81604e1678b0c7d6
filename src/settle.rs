use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Rule deciding when a navigation or script operation is considered settled,
/// applied once the renderer reports raw completion.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SettlePolicy {
    /// Complete as soon as the renderer does.
    #[default]
    None,
    /// Wait a fixed time after loading, for pages that keep working after the
    /// load event (late scripts, images).
    WaitFixed(Duration),
    /// Poll this script until it evaluates truthy, bounded by the operation's
    /// deadline.
    Validate(String),
}

impl SettlePolicy {
    /// Negative and NaN waits become zero; waits too long for a [`Duration`]
    /// saturate to [`Duration::MAX`].
    pub fn wait_secs(secs: f64) -> Self {
        let wait = Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX);
        SettlePolicy::WaitFixed(wait)
    }

    pub fn validate(script: impl Into<String>) -> Self {
        SettlePolicy::Validate(script.into())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, SettlePolicy::None)
    }
}

/// JavaScript truthiness of a script result.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
