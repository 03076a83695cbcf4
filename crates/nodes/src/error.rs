//! Item-level error type.

use thiserror::Error;

/// Errors returned by an item's `prepare`, `execute` or hook methods.
///
/// The engine maps every variant to the node failing; the variant only
/// changes how the failure is reported:
/// - `Preparation`: the item could not build an execution plan and never started.
/// - `Execution`: the item started and failed.
/// - `Cancelled`: the item acknowledged a stop request.
#[derive(Debug, Error)]
pub enum ItemError {
    /// The item's configuration is malformed.
    #[error("invalid item configuration: {0}")]
    Config(String),

    /// `prepare` failed; the item was never executed.
    #[error("preparation failed: {0}")]
    Preparation(String),

    /// `execute` failed.
    #[error("execution failed: {0}")]
    Execution(String),

    /// The item stopped because its cancellation token fired.
    #[error("item was stopped")]
    Cancelled,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
