//! [`Renderer`] backed by a headless Chrome tab.

use crate::config::SessionConfig;
use crate::errors::{RenderError, Result};
use crate::page::{terminate, SCRAPING_COMMAND};
use crate::renderer::{PageRequest, Renderer, ResponseMeta};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Network;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

// headless_chrome does not surface the document's HTTP status.
const ASSUMED_STATUS: u16 = 200;

// Set on the current document before a navigating script runs; its absence
// means the next document has been committed.
const DOCUMENT_MARKER: &str = "window.__browserZombieDocument";
const NAVIGATION_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct ChromeRenderer {
    // Keeps the Chrome process alive for as long as the tab is used.
    _browser: Browser,
    tab: Arc<Tab>,
    navigation_timeout: Duration,
    // Held by the blocking call itself, so a call abandoned after a timeout
    // still finishes before the tab is touched again.
    lock: Arc<Mutex<()>>,
}

impl ChromeRenderer {
    pub fn launch(config: &SessionConfig) -> Result<Self> {
        let chrome = &config.chrome;
        let window_size_arg = format!(
            "--window-size={},{}",
            chrome.viewport.width, chrome.viewport.height
        );
        let user_agent_arg = config
            .user_agent
            .as_ref()
            .map(|ua| format!("--user-agent={}", ua));

        let mut args = vec![
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new(&window_size_arg),
        ];
        if let Some(ref ua_arg) = user_agent_arg {
            args.push(OsStr::new(ua_arg));
        }
        if !config.load_media_content {
            args.push(OsStr::new("--blink-settings=imagesEnabled=false"));
            args.push(OsStr::new("--autoplay-policy=user-gesture-required"));
        }
        for arg in &chrome.args {
            args.push(OsStr::new(arg));
        }

        let launch_options = LaunchOptions::default_builder()
            .headless(chrome.headless)
            .args(args)
            .build()
            .map_err(|e| RenderError::Launch(e.to_string()))?;
        let browser = Browser::new(launch_options).map_err(|e| RenderError::Launch(e.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|e| RenderError::Launch(e.to_string()))?;

        info!(session = %config.name, headless = chrome.headless, "chrome launched");
        Ok(Self {
            _browser: browser,
            tab,
            navigation_timeout: config.timeout(),
            lock: Arc::new(Mutex::new(())),
        })
    }

    async fn with_tab<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Tab) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            f(&tab)
        })
        .await
        .map_err(|e| RenderError::Script(format!("blocking task failed: {e}")))?
    }
}

/// Polls `on_old_document` until it reports false, failing once `timeout`
/// elapses first.
fn wait_for_new_document<F>(mut on_old_document: F, timeout: Duration, interval: Duration) -> Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now().checked_add(timeout);
    while on_old_document() {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(RenderError::Navigation(format!(
                "navigation did not start within {timeout:?}"
            )));
        }
        std::thread::sleep(interval);
    }
    Ok(())
}

fn current_response(tab: &Tab) -> ResponseMeta {
    ResponseMeta::new(Url::parse(&tab.get_url()).ok(), ASSUMED_STATUS)
}

#[async_trait]
impl Renderer for ChromeRenderer {
    async fn navigate(&self, request: &PageRequest) -> Result<ResponseMeta> {
        let url = request.url.to_string();
        debug!(%url, "navigating");
        self.with_tab(move |tab| {
            tab.navigate_to(&url)
                .map_err(|e| RenderError::Navigation(e.to_string()))?;
            tab.wait_until_navigated()
                .map_err(|e| RenderError::Navigation(e.to_string()))?;
            Ok(current_response(tab))
        })
        .await
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        let script = script.to_string();
        self.with_tab(move |tab| {
            let result = tab
                .evaluate(&script, true)
                .map_err(|e| RenderError::Script(e.to_string()))?;
            Ok(result.value.unwrap_or(Value::Null))
        })
        .await
    }

    async fn evaluate_and_wait_for_navigation(&self, script: &str) -> Result<ResponseMeta> {
        let script = script.to_string();
        let timeout = self.navigation_timeout;
        self.with_tab(move |tab| {
            tab.evaluate(&format!("{DOCUMENT_MARKER} = true;"), false)
                .map_err(|e| RenderError::Script(e.to_string()))?;
            tab.evaluate(&script, false)
                .map_err(|e| RenderError::Script(e.to_string()))?;
            // The script only schedules the navigation; wait for the next
            // document before waiting for it to load. Evaluation errors while
            // the old context is torn down count as not yet navigated.
            let marker_check = format!("{DOCUMENT_MARKER} === true");
            wait_for_new_document(
                || match tab.evaluate(&marker_check, false) {
                    Ok(result) => result.value == Some(Value::Bool(true)),
                    Err(_) => true,
                },
                timeout,
                NAVIGATION_POLL_INTERVAL,
            )?;
            tab.wait_until_navigated()
                .map_err(|e| RenderError::Navigation(e.to_string()))?;
            Ok(current_response(tab))
        })
        .await
    }

    async fn content(&self) -> Result<Vec<u8>> {
        self.with_tab(|tab| {
            tab.get_content()
                .map(String::into_bytes)
                .map_err(|e| RenderError::Script(format!("{}: {e}", terminate(SCRAPING_COMMAND))))
        })
        .await
    }

    async fn clear_cache(&self) -> Result<()> {
        self.with_tab(|tab| {
            tab.call_method(Network::ClearBrowserCache(None))
                .map_err(|e| RenderError::Script(e.to_string()))?;
            tab.call_method(Network::ClearBrowserCookies(None))
                .map_err(|e| RenderError::Script(e.to_string()))?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waits_until_old_document_is_gone() {
        let mut polls = 0;
        let waited = wait_for_new_document(
            || {
                polls += 1;
                polls < 3
            },
            Duration::from_secs(5),
            Duration::from_millis(1),
        );
        assert_eq!(waited, Ok(()));
        assert_eq!(polls, 3);
    }

    #[test]
    fn navigation_that_never_starts_fails() {
        let waited = wait_for_new_document(|| true, Duration::from_millis(20), Duration::from_millis(1));
        assert!(matches!(waited, Err(RenderError::Navigation(_))));
    }
}
