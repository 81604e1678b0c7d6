//! The consumer-facing API: every method returns an [`Action`] that, when
//! started, submits one [`Operation`] to the session's [`Scheduler`].

use crate::action::Action;
use crate::config::SessionConfig;
use crate::errors::{outcome_from_option, ActionError, Outcome};
use crate::operation::{Operation, OperationKind};
use crate::page::{terminate, AttributeTarget, FromPage, Page, Redirectable, SCRAPING_COMMAND};
use crate::renderer::{PageRequest, RenderOutput, Renderer};
use crate::scheduler::Scheduler;
use crate::settle::SettlePolicy;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

const DEFAULT_STATUS_SUCCESS: u16 = 200;

struct SessionInner {
    config: SessionConfig,
    scheduler: Scheduler,
}

impl SessionInner {
    fn submit(&self, kind: OperationKind, settle: SettlePolicy) -> crate::scheduler::OperationHandle {
        let operation = Operation::new(kind, settle)
            .with_timeout(self.config.timeout())
            .with_validate_interval(self.config.validate_interval());
        self.scheduler.submit(operation)
    }
}

/// A scripted browsing session over one renderer. Cloning is cheap and
/// clones share the same renderer queue.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Creates a session driving `renderer`. Must be called from within a
    /// Tokio runtime.
    pub fn new(renderer: Arc<dyn Renderer>, config: SessionConfig) -> Self {
        info!(session = %config.name, "starting session");
        Self {
            inner: Arc::new(SessionInner {
                scheduler: Scheduler::new(renderer),
                config,
            }),
        }
    }

    /// Launches a Chrome-backed session.
    #[cfg(feature = "chrome")]
    pub fn launch(config: SessionConfig) -> crate::errors::Result<Self> {
        let renderer = crate::browser::ChromeRenderer::launch(&config)?;
        Ok(Self::new(Arc::new(renderer), config))
    }

    /// Launches a Chrome-backed session with the default configuration.
    #[cfg(feature = "chrome")]
    pub fn launch_default() -> crate::errors::Result<Self> {
        Self::launch(SessionConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Loads `url` and decodes the resulting page.
    pub fn open<T>(&self, url: Url) -> Action<T>
    where
        T: FromPage + Send + 'static,
    {
        self.open_then(url, SettlePolicy::None)
    }

    pub fn open_then<T>(&self, url: Url, settle: SettlePolicy) -> Action<T>
    where
        T: FromPage + Send + 'static,
    {
        self.page_action(OperationKind::Load(PageRequest::new(url)), settle)
    }

    /// The current page, without navigating.
    pub fn inspect<T>(&self) -> Action<T>
    where
        T: FromPage + Send + 'static,
    {
        self.page_action(OperationKind::Content, SettlePolicy::None)
    }

    pub fn submit<T, F>(&self, form: &F) -> Action<T>
    where
        T: FromPage + Send + 'static,
        F: Redirectable + ?Sized,
    {
        self.redirect(form, SettlePolicy::None)
    }

    pub fn submit_then<T, F>(&self, form: &F, settle: SettlePolicy) -> Action<T>
    where
        T: FromPage + Send + 'static,
        F: Redirectable + ?Sized,
    {
        self.redirect(form, settle)
    }

    pub fn click<T, L>(&self, link: &L) -> Action<T>
    where
        T: FromPage + Send + 'static,
        L: Redirectable + ?Sized,
    {
        self.redirect(link, SettlePolicy::None)
    }

    pub fn click_then<T, L>(&self, link: &L, settle: SettlePolicy) -> Action<T>
    where
        T: FromPage + Send + 'static,
        L: Redirectable + ?Sized,
    {
        self.redirect(link, settle)
    }

    pub fn press<T, B>(&self, button: &B) -> Action<T>
    where
        T: FromPage + Send + 'static,
        B: Redirectable + ?Sized,
    {
        self.redirect(button, SettlePolicy::None)
    }

    pub fn press_then<T, B>(&self, button: &B, settle: SettlePolicy) -> Action<T>
    where
        T: FromPage + Send + 'static,
        B: Redirectable + ?Sized,
    {
        self.redirect(button, settle)
    }

    /// Swaps the page context for the context of an embedded frame.
    pub fn swap<T, I>(&self, frame: &I) -> Action<T>
    where
        T: FromPage + Send + 'static,
        I: Redirectable + ?Sized,
    {
        self.redirect(frame, SettlePolicy::None)
    }

    pub fn swap_then<T, I>(&self, frame: &I, settle: SettlePolicy) -> Action<T>
    where
        T: FromPage + Send + 'static,
        I: Redirectable + ?Sized,
    {
        self.redirect(frame, settle)
    }

    /// Sets (or with `None`, removes) an attribute on `element` and returns
    /// the updated page.
    pub fn set_attribute<T, E>(&self, element: &E, key: &str, value: Option<&str>) -> Action<T>
    where
        T: FromPage + Send + 'static,
        E: AttributeTarget + ?Sized,
    {
        match element.set_attribute_script(key, value) {
            Some(script) => {
                let script = format!("{} {}", terminate(&script), terminate(SCRAPING_COMMAND));
                self.page_action(
                    OperationKind::Script {
                        script,
                        will_navigate: false,
                    },
                    SettlePolicy::None,
                )
            }
            None => Action::err(ActionError::NetworkRequestFailure),
        }
    }

    /// Evaluates `script` in the current page and returns its result as text.
    pub fn execute(&self, script: impl Into<String>) -> Action<String> {
        self.execute_then(script, SettlePolicy::None)
    }

    pub fn execute_then(&self, script: impl Into<String>, settle: SettlePolicy) -> Action<String> {
        let inner = Arc::clone(&self.inner);
        let kind = OperationKind::Script {
            script: script.into(),
            will_navigate: false,
        };
        Action::from_future(move || {
            let handle = inner.submit(kind.clone(), settle.clone());
            async move {
                let (body, _) = handle.output().await.into_result()?;
                let output = outcome_from_option(body, ActionError::TransformFailure)
                    .and_then(|bytes| String::from_utf8(bytes).map_err(|_| ActionError::TransformFailure));
                debug!(?output, "script result");
                output
            }
        })
    }

    /// Drops the renderer's cached responses and cookies.
    pub fn clear_cache(&self) -> Action<()> {
        let inner = Arc::clone(&self.inner);
        Action::from_future(move || {
            let handle = inner.submit(OperationKind::ClearCache, SettlePolicy::None);
            async move {
                handle.output().await.into_result()?;
                Ok::<(), ActionError>(())
            }
        })
    }

    /// Logs the current page content.
    pub async fn dump(&self) {
        match self.inspect::<String>().run().await {
            Ok(content) => info!(session = %self.name(), "{content}"),
            Err(_) => info!(session = %self.name(), "No output available."),
        }
    }

    fn redirect<T, R>(&self, element: &R, settle: SettlePolicy) -> Action<T>
    where
        T: FromPage + Send + 'static,
        R: Redirectable + ?Sized,
    {
        match element.action_script() {
            Some(script) => self.page_action(
                OperationKind::Script {
                    script,
                    will_navigate: true,
                },
                settle,
            ),
            None => {
                warn!(session = %self.name(), "element has no action script");
                Action::err(ActionError::NetworkRequestFailure)
            }
        }
    }

    fn page_action<T>(&self, kind: OperationKind, settle: SettlePolicy) -> Action<T>
    where
        T: FromPage + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        Action::from_future(move || {
            let handle = inner.submit(kind.clone(), settle.clone());
            async move { handle_response(handle.output().await) }
        })
    }
}

fn handle_response<T: FromPage>(output: RenderOutput) -> Outcome<T> {
    let (body, response) = output.into_result().map_err(|error| {
        debug!(%error, "operation failed");
        ActionError::from(error)
    })?;
    let status = response
        .as_ref()
        .map(|meta| meta.status)
        .unwrap_or(DEFAULT_STATUS_SUCCESS);
    if !(200..300).contains(&status) {
        debug!(status, "unsuccessful response status");
        return Err(ActionError::NetworkRequestFailure);
    }
    let url = response.and_then(|meta| meta.url);
    T::from_page(Page::new(url, status, body.unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RenderError;
    use crate::renderer::ResponseMeta;

    #[test]
    fn response_errors_become_network_failures() {
        let output = RenderOutput::failed(RenderError::Timeout(std::time::Duration::from_secs(1)));
        assert_eq!(
            handle_response::<Page>(output),
            Err(ActionError::NetworkRequestFailure)
        );
    }

    #[test]
    fn non_2xx_status_is_a_network_failure() {
        let output = RenderOutput {
            body: Some(b"gone".to_vec()),
            response: Some(ResponseMeta::new(None, 404)),
            error: None,
        };
        assert_eq!(
            handle_response::<Page>(output),
            Err(ActionError::NetworkRequestFailure)
        );
    }

    #[test]
    fn missing_response_defaults_to_success_and_empty_body() {
        let page = handle_response::<Page>(RenderOutput::default()).unwrap();
        assert_eq!(page.status(), 200);
        assert!(page.body().is_empty());
        assert!(page.url().is_none());
    }
}
