//! Assertions returning `eyre::Result` so tests can chain them with `?`

use eyre::{eyre, Result};

use crate::capability::TxId;
use crate::pipeline::{ActionOutcome, SkipReason};
use crate::types::PhaseStatus;

/// Assert a phase reached `expected`
pub fn assert_phase(phase: &str, actual: PhaseStatus, expected: PhaseStatus) -> Result<()> {
    if actual != expected {
        return Err(eyre!("{} phase: expected {}, got {}", phase, expected, actual));
    }
    Ok(())
}

/// Assert an action was submitted and return its transaction id
pub fn assert_submitted(outcome: &ActionOutcome) -> Result<TxId> {
    match outcome {
        ActionOutcome::Submitted(tx) => Ok(tx.clone()),
        other => Err(eyre!("expected submitted action, got {:?}", other)),
    }
}

/// Assert an action was skipped for `reason`
pub fn assert_skipped(outcome: &ActionOutcome, reason: SkipReason) -> Result<()> {
    match outcome {
        ActionOutcome::Skipped(actual) if *actual == reason => Ok(()),
        other => Err(eyre!("expected skip ({}), got {:?}", reason, other)),
    }
}

pub fn assert_failed(outcome: &ActionOutcome) -> Result<String> {
    match outcome {
        ActionOutcome::Failed(message) => Ok(message.clone()),
        other => Err(eyre!("expected failed action, got {:?}", other)),
    }
}

/// Assert `count` calls of `operation` were made
pub fn assert_calls(operation: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(eyre!(
            "{}: expected {} call(s), got {}",
            operation,
            expected,
            actual
        ));
    }
    Ok(())
}
