//! One renderer call with its deadline, cancellation and settle policy.
//!
//! An [`Operation`] moves `Pending -> Executing -> Finished | Cancelled`.
//! The first of {renderer success, renderer failure, deadline, explicit
//! cancel} decides the terminal state; every later trigger is a no-op.

use crate::errors::{RenderError, Result};
use crate::page::terminate;
use crate::renderer::{value_to_bytes, PageRequest, RenderOutput, Renderer, ResponseMeta};
use crate::settle::{is_truthy, SettlePolicy};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_VALIDATE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    Load(PageRequest),
    Script { script: String, will_navigate: bool },
    Content,
    ClearCache,
}

impl OperationKind {
    fn label(&self) -> &'static str {
        match self {
            OperationKind::Load(_) => "request",
            OperationKind::Script { .. } => "script",
            OperationKind::Content => "content",
            OperationKind::ClearCache => "clear_cache",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Pending,
    Executing,
    Finished,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationState::Finished | OperationState::Cancelled)
    }
}

/// What the renderer produced before the operation turned terminal.
#[derive(Debug, Default)]
struct Landed {
    body: Option<Vec<u8>>,
    response: Option<ResponseMeta>,
}

enum Raced {
    Landed(Result<Landed>),
    TimedOut,
    Cancelled,
}

#[derive(Debug)]
pub struct Operation {
    id: Uuid,
    kind: OperationKind,
    state: OperationState,
    settle: SettlePolicy,
    timeout: Duration,
    validate_interval: Duration,
    result: Option<Vec<u8>>,
    response: Option<ResponseMeta>,
    error: Option<RenderError>,
    started_at: Option<Instant>,
}

impl Operation {
    pub fn new(kind: OperationKind, settle: SettlePolicy) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            state: OperationState::Pending,
            settle,
            timeout: DEFAULT_TIMEOUT,
            validate_interval: DEFAULT_VALIDATE_INTERVAL,
            result: None,
            response: None,
            error: None,
            started_at: None,
        }
    }

    pub fn load(request: PageRequest, settle: SettlePolicy) -> Self {
        Self::new(OperationKind::Load(request), settle)
    }

    pub fn script(script: impl Into<String>, will_navigate: bool, settle: SettlePolicy) -> Self {
        Self::new(
            OperationKind::Script {
                script: script.into(),
                will_navigate,
            },
            settle,
        )
    }

    pub fn content() -> Self {
        Self::new(OperationKind::Content, SettlePolicy::None)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_validate_interval(mut self, interval: Duration) -> Self {
        self.validate_interval = interval;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    pub fn settle(&self) -> &SettlePolicy {
        &self.settle
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn result(&self) -> Option<&[u8]> {
        self.result.as_deref()
    }

    pub fn response(&self) -> Option<&ResponseMeta> {
        self.response.as_ref()
    }

    pub fn error(&self) -> Option<&RenderError> {
        self.error.as_ref()
    }

    /// `Pending -> Executing`. Returns false if the operation already left
    /// `Pending`.
    pub fn begin(&mut self) -> bool {
        if self.state != OperationState::Pending {
            return false;
        }
        self.state = OperationState::Executing;
        self.started_at = Some(Instant::now());
        true
    }

    /// `Executing -> Finished`, capturing the result once. Later calls are
    /// ignored.
    pub fn finish(&mut self, result: Option<Vec<u8>>, error: Option<RenderError>) -> bool {
        if self.state != OperationState::Executing {
            return false;
        }
        self.result = result.or(self.result.take());
        self.error = error.or(self.error.take());
        self.state = OperationState::Finished;
        true
    }

    /// Moves a non-terminal operation to `Cancelled`. `error` is recorded
    /// unless a result had already landed.
    pub fn cancel(&mut self, error: RenderError) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        if self.result.is_none() && self.error.is_none() {
            self.error = Some(error);
        }
        self.state = OperationState::Cancelled;
        true
    }

    pub fn into_output(self) -> RenderOutput {
        RenderOutput {
            body: self.result,
            response: self.response,
            error: self.error,
        }
    }

    /// Runs the operation against `renderer` until it reaches a terminal
    /// state. The deadline starts here; the settle policy is consumed.
    pub async fn execute(&mut self, renderer: &dyn Renderer, mut cancel: watch::Receiver<bool>) {
        if !self.begin() {
            return;
        }
        debug!(operation = %self.id, kind = self.kind.label(), "operation executing");

        let settle = std::mem::take(&mut self.settle);
        let timeout = self.timeout;
        let interval = self.validate_interval;
        let raced = {
            let kind = &self.kind;
            tokio::select! {
                landed = drive(renderer, kind, settle, interval) => Raced::Landed(landed),
                _ = tokio::time::sleep(timeout) => Raced::TimedOut,
                _ = cancel_requested(&mut cancel) => Raced::Cancelled,
            }
        };

        match raced {
            Raced::Landed(Ok(landed)) => {
                self.response = landed.response;
                self.finish(landed.body, None);
            }
            Raced::Landed(Err(error)) => {
                debug!(operation = %self.id, %error, "renderer reported failure");
                self.finish(None, Some(error));
            }
            Raced::TimedOut => {
                warn!(operation = %self.id, ?timeout, "operation timed out");
                self.cancel(RenderError::Timeout(timeout));
            }
            Raced::Cancelled => {
                warn!(operation = %self.id, "operation cancelled");
                self.cancel(RenderError::Cancelled);
            }
        }

        let elapsed = self
            .started_at
            .map(|started| started.elapsed())
            .unwrap_or_default();
        info!(
            operation = %self.id,
            kind = self.kind.label(),
            state = ?self.state,
            ?elapsed,
            "operation completed"
        );
    }
}

async fn cancel_requested(cancel: &mut watch::Receiver<bool>) {
    // A dropped sender means nobody can cancel any more.
    if cancel.wait_for(|requested| *requested).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn drive(
    renderer: &dyn Renderer,
    kind: &OperationKind,
    settle: SettlePolicy,
    validate_interval: Duration,
) -> Result<Landed> {
    match kind {
        OperationKind::Load(request) => {
            let response = renderer.navigate(request).await?;
            settle_policy(renderer, settle, validate_interval).await;
            Ok(Landed {
                body: Some(renderer.content().await?),
                response: Some(response),
            })
        }
        OperationKind::Script {
            script,
            will_navigate: true,
        } => {
            let response = renderer.evaluate_and_wait_for_navigation(script).await?;
            settle_policy(renderer, settle, validate_interval).await;
            Ok(Landed {
                body: Some(renderer.content().await?),
                response: Some(response),
            })
        }
        OperationKind::Script {
            script,
            will_navigate: false,
        } => {
            let value = renderer.evaluate(script).await?;
            settle_policy(renderer, settle, validate_interval).await;
            Ok(Landed {
                body: value_to_bytes(&value),
                response: None,
            })
        }
        OperationKind::Content => Ok(Landed {
            body: Some(renderer.content().await?),
            response: None,
        }),
        OperationKind::ClearCache => {
            renderer.clear_cache().await?;
            Ok(Landed::default())
        }
    }
}

/// Resolves once `settle` is satisfied. `Validate` polls until the predicate
/// holds; only the surrounding deadline bounds it.
async fn settle_policy(renderer: &dyn Renderer, settle: SettlePolicy, interval: Duration) {
    match settle {
        SettlePolicy::None => {}
        SettlePolicy::WaitFixed(duration) => {
            debug!(?duration, "waiting before reading content");
            tokio::time::sleep(duration).await;
        }
        SettlePolicy::Validate(predicate) => {
            let predicate = terminate(&predicate);
            loop {
                match renderer.evaluate(&predicate).await {
                    Ok(value) if is_truthy(&value) => return,
                    Ok(value) => debug!(%value, "validation pending"),
                    Err(error) => debug!(%error, "validation script failed"),
                }
                tokio::time::sleep(interval).await;
            }
        }
    }
}
