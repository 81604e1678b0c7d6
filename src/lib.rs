pub mod action;
#[cfg(feature = "chrome")]
pub mod browser;
pub mod config;
pub mod errors;
pub mod operation;
pub mod page;
pub mod renderer;
pub mod scheduler;
pub mod session;
pub mod settle;
pub mod testing;

pub use action::{Action, Completion};
#[cfg(feature = "chrome")]
pub use browser::ChromeRenderer;
pub use config::{ChromeConfig, SessionConfig, Viewport};
pub use errors::{outcome_from_option, ActionError, Outcome, RenderError};
pub use operation::{Operation, OperationKind, OperationState};
pub use page::{AttributeTarget, FromPage, Page, Redirectable};
pub use renderer::{PageRequest, RenderOutput, Renderer, ResponseMeta};
pub use scheduler::{OperationHandle, Scheduler};
pub use session::Session;
pub use settle::SettlePolicy;
