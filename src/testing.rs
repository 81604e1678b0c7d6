//! A scripted in-memory [`Renderer`] for exercising sessions and the scheduler
//! without a browser.

use crate::errors::{RenderError, Result};
use crate::page::SCRAPING_COMMAND;
use crate::renderer::{PageRequest, Renderer, ResponseMeta};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RendererCall {
    Navigate(String),
    Evaluate(String),
    NavigatingScript(String),
    ClearCache,
}

#[derive(Debug, Clone)]
struct FakePage {
    status: u16,
    html: String,
}

#[derive(Debug, Default)]
struct FakeState {
    pages: HashMap<String, FakePage>,
    latencies: HashMap<String, Duration>,
    scripts: HashMap<String, Value>,
    navigations: HashMap<String, String>,
    predicates: HashMap<String, usize>,
    current_url: Option<String>,
    current_html: String,
    calls: Vec<RendererCall>,
}

#[derive(Debug, Default)]
pub struct FakeRenderer {
    latency: Duration,
    state: Mutex<FakeState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Counts a renderer call as in flight until dropped, including when the
/// calling future is cancelled mid-call.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn normalize(script: &str) -> String {
    script.trim().trim_end_matches(';').trim().to_string()
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay applied to every navigation.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_page(mut self, url: &str, status: u16, html: &str) -> Self {
        self.state.get_mut().pages.insert(
            url.to_string(),
            FakePage {
                status,
                html: html.to_string(),
            },
        );
        self
    }

    /// Delay for navigations to `url`, overriding the default latency.
    pub fn with_page_latency(mut self, url: &str, latency: Duration) -> Self {
        self.state
            .get_mut()
            .latencies
            .insert(url.to_string(), latency);
        self
    }

    /// Result returned when `script` is evaluated.
    pub fn with_script(mut self, script: &str, value: impl Into<Value>) -> Self {
        self.state
            .get_mut()
            .scripts
            .insert(normalize(script), value.into());
        self
    }

    /// Makes `script` navigate to `url` when run as a navigating script.
    pub fn with_navigation(mut self, script: &str, url: &str) -> Self {
        self.state
            .get_mut()
            .navigations
            .insert(normalize(script), url.to_string());
        self
    }

    /// `script` evaluates to `false` for the first `falsy_polls` calls and
    /// to `true` afterwards.
    pub fn with_predicate(mut self, script: &str, falsy_polls: usize) -> Self {
        self.state
            .get_mut()
            .predicates
            .insert(normalize(script), falsy_polls);
        self
    }

    pub async fn calls(&self) -> Vec<RendererCall> {
        self.state.lock().await.calls.clone()
    }

    /// URLs loaded so far, in order, including those reached through
    /// navigating scripts.
    pub async fn navigations(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut loaded = Vec::new();
        for call in &state.calls {
            match call {
                RendererCall::Navigate(url) => loaded.push(url.clone()),
                RendererCall::NavigatingScript(script) => {
                    if let Some(url) = state.navigations.get(script) {
                        loaded.push(url.clone());
                    }
                }
                _ => {}
            }
        }
        loaded
    }

    pub async fn evaluations_of(&self, script: &str) -> usize {
        let script = normalize(script);
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|call| {
                matches!(call, RendererCall::Evaluate(s) | RendererCall::NavigatingScript(s) if *s == script)
            })
            .count()
    }

    /// Highest number of renderer calls observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }

    async fn load(&self, url: &str) -> Result<ResponseMeta> {
        let delay = {
            let state = self.state.lock().await;
            state.latencies.get(url).copied().unwrap_or(self.latency)
        };
        tokio::time::sleep(delay).await;

        let mut state = self.state.lock().await;
        let page = state
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| RenderError::Navigation(format!("no route to {url}")))?;
        state.current_url = Some(url.to_string());
        state.current_html = page.html;
        Ok(ResponseMeta::new(Url::parse(url).ok(), page.status))
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn navigate(&self, request: &PageRequest) -> Result<ResponseMeta> {
        let _guard = self.enter();
        let url = request.url.to_string();
        self.state
            .lock()
            .await
            .calls
            .push(RendererCall::Navigate(url.clone()));
        self.load(&url).await
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        let _guard = self.enter();
        let script = normalize(script);
        let mut state = self.state.lock().await;
        state.calls.push(RendererCall::Evaluate(script.clone()));

        if let Some(remaining) = state.predicates.get_mut(&script) {
            if *remaining == 0 {
                return Ok(Value::Bool(true));
            }
            *remaining -= 1;
            return Ok(Value::Bool(false));
        }
        if let Some(value) = state.scripts.get(&script) {
            return Ok(value.clone());
        }
        if script.ends_with(SCRAPING_COMMAND) {
            return Ok(Value::String(state.current_html.clone()));
        }
        Err(RenderError::Script(format!("unknown script: {script}")))
    }

    async fn evaluate_and_wait_for_navigation(&self, script: &str) -> Result<ResponseMeta> {
        let _guard = self.enter();
        let script = normalize(script);
        let target = {
            let mut state = self.state.lock().await;
            state
                .calls
                .push(RendererCall::NavigatingScript(script.clone()));
            state.navigations.get(&script).cloned()
        };
        match target {
            Some(url) => self.load(&url).await,
            None => Err(RenderError::Script(format!("script does not navigate: {script}"))),
        }
    }

    async fn clear_cache(&self) -> Result<()> {
        let _guard = self.enter();
        self.state.lock().await.calls.push(RendererCall::ClearCache);
        Ok(())
    }
}
