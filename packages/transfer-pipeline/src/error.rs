//! Error types and the central error reporter
//!
//! Gateway failures are classified so the action boundary knows whether to
//! roll back and wait for the next poll (transient, permanent) or to halt
//! the pipeline (fatal configuration).

use thiserror::Error;
use tracing::{error, warn};

use crate::address::AddressError;

/// Failure reported by a chain gateway
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    /// Contract state not (yet) visible on chain
    #[error("missing state: {0}")]
    MissingState(String),
    /// Transaction was submitted and rejected by the chain
    #[error("transaction rejected: {0}")]
    Rejected(String),
    #[error("unsupported by gateway: {0}")]
    Unsupported(String),
}

impl GatewayError {
    pub fn class(&self) -> ErrorClass {
        match self {
            GatewayError::Timeout(_) | GatewayError::Transport(_) | GatewayError::MissingState(_) => {
                ErrorClass::Transient
            }
            GatewayError::Rpc { message, .. } => classify_rpc_error(message),
            GatewayError::Rejected(_) => ErrorClass::Permanent,
            GatewayError::Unsupported(_) => ErrorClass::Fatal,
        }
    }
}

/// Errors surfaced by pipelines and the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// Required route, vault or event configuration is missing
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Identity(#[from] AddressError),
    #[error("no gateway for network {0}")]
    NoGateway(String),
}

impl PipelineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::Gateway(e) => e.class(),
            PipelineError::Configuration(_)
            | PipelineError::Identity(_)
            | PipelineError::NoGateway(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }
}

/// How an error affects the pipeline that hit it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry on the next poll tick; state unchanged
    Transient,
    /// The action failed on chain; state rolled back, user may retry
    Permanent,
    /// Transfer cannot proceed; pipeline halts
    Fatal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
            ErrorClass::Fatal => "fatal",
        }
    }
}

/// Classify an RPC error message
pub fn classify_rpc_error(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();

    if lower.contains("method not found")
        || lower.contains("unknown configuration")
        || lower.contains("unknown network")
    {
        return ErrorClass::Fatal;
    }

    if lower.contains("timeout")
        || lower.contains("connection")
        || lower.contains("network")
        || lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("503")
        || lower.contains("502")
        || lower.contains("temporarily unavailable")
        || lower.contains("not found")
    {
        return ErrorClass::Transient;
    }

    if lower.contains("reverted")
        || lower.contains("invalid signature")
        || lower.contains("insufficient funds")
        || lower.contains("insufficient balance")
        || lower.contains("out of gas")
        || lower.contains("already released")
        || lower.contains("already deployed")
    {
        return ErrorClass::Permanent;
    }

    ErrorClass::Transient
}

/// Central sink for errors caught at pipeline action boundaries
pub trait ErrorReporter: Send + Sync {
    fn report(&self, pipeline: &str, operation: &str, error: &PipelineError);
}

/// Reports through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, pipeline: &str, operation: &str, err: &PipelineError) {
        match err.class() {
            ErrorClass::Fatal => error!(
                pipeline = %pipeline,
                operation = %operation,
                error = %err,
                "Transfer cannot proceed"
            ),
            class => warn!(
                pipeline = %pipeline,
                operation = %operation,
                class = class.as_str(),
                error = %err,
                "Pipeline operation failed"
            ),
        }
    }
}
