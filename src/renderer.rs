use crate::errors::{RenderError, Result};
use crate::page::{terminate, SCRAPING_COMMAND};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use url::Url;

/// A page load request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub url: Url,
}

impl PageRequest {
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}

impl From<Url> for PageRequest {
    fn from(url: Url) -> Self {
        Self::new(url)
    }
}

/// Response metadata reported for a completed navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub url: Option<Url>,
    pub status: u16,
}

impl ResponseMeta {
    pub fn new(url: Option<Url>, status: u16) -> Self {
        Self { url, status }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// What an operation hands back once it reaches a terminal state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderOutput {
    pub body: Option<Vec<u8>>,
    pub response: Option<ResponseMeta>,
    pub error: Option<RenderError>,
}

impl RenderOutput {
    pub fn failed(error: RenderError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn into_result(self) -> Result<(Option<Vec<u8>>, Option<ResponseMeta>)> {
        match self.error {
            Some(error) => Err(error),
            None => Ok((self.body, self.response)),
        }
    }
}

/// The shared rendering resource driven by the [`Scheduler`](crate::Scheduler).
///
/// Implementations are not expected to be re-entrant; the scheduler's worker
/// is the only caller and never overlaps calls.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Load `request`, resolving once the document has finished loading.
    async fn navigate(&self, request: &PageRequest) -> Result<ResponseMeta>;

    /// Evaluate `script` and return its value.
    async fn evaluate(&self, script: &str) -> Result<Value>;

    /// Evaluate a script expected to trigger a navigation (form submit, link
    /// click), resolving once the resulting load has finished.
    async fn evaluate_and_wait_for_navigation(&self, script: &str) -> Result<ResponseMeta>;

    /// Markup of the current document.
    async fn content(&self) -> Result<Vec<u8>> {
        let value = self.evaluate(&terminate(SCRAPING_COMMAND)).await?;
        value_to_bytes(&value)
            .ok_or_else(|| RenderError::Script("document has no content".to_string()))
    }

    /// Drop cached responses and cookies.
    async fn clear_cache(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<R> Renderer for Arc<R>
where
    R: Renderer + ?Sized,
{
    async fn navigate(&self, request: &PageRequest) -> Result<ResponseMeta> {
        (**self).navigate(request).await
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        (**self).evaluate(script).await
    }

    async fn evaluate_and_wait_for_navigation(&self, script: &str) -> Result<ResponseMeta> {
        (**self).evaluate_and_wait_for_navigation(script).await
    }

    async fn content(&self) -> Result<Vec<u8>> {
        (**self).content().await
    }

    async fn clear_cache(&self) -> Result<()> {
        (**self).clear_cache().await
    }
}

/// Bytes of a script result: strings as-is, `null` as nothing, anything else
/// as its JSON text.
pub fn value_to_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.as_bytes().to_vec()),
        other => Some(other.to_string().into_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn script_values_become_bytes() {
        assert_eq!(value_to_bytes(&json!(null)), None);
        assert_eq!(value_to_bytes(&json!("<p>")), Some(b"<p>".to_vec()));
        assert_eq!(value_to_bytes(&json!(true)), Some(b"true".to_vec()));
        assert_eq!(value_to_bytes(&json!({"a": 1})), Some(br#"{"a":1}"#.to_vec()));
    }

    #[test]
    fn success_range_is_2xx() {
        assert!(ResponseMeta::new(None, 204).is_success());
        assert!(!ResponseMeta::new(None, 301).is_success());
        assert!(!ResponseMeta::new(None, 500).is_success());
    }

    #[test]
    fn output_with_error_is_a_failure() {
        let output = RenderOutput::failed(RenderError::Cancelled);
        assert_eq!(output.into_result(), Err(RenderError::Cancelled));

        let output = RenderOutput {
            body: Some(b"ok".to_vec()),
            ..Default::default()
        };
        assert_eq!(output.into_result(), Ok((Some(b"ok".to_vec()), None)));
    }
}
