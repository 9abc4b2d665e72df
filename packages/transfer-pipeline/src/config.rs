//! Pipeline settings

use eyre::{eyre, Result};
use std::env;
use std::time::Duration;

/// Stuck-event heuristic: a pending event is offered for re-broadcast once the
/// source has seen more than `event_blocks_to_confirm * DEFAULT_STUCK_MULTIPLIER`
/// confirmations. Empirical; overridable through `PIPELINE_STUCK_MULTIPLIER`.
pub const DEFAULT_STUCK_MULTIPLIER: u64 = 3;

/// Quiet period before an edited amount is recomputed
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(400);

/// How long a token wallet deploy may stay unobserved before it can be resubmitted
pub const DEFAULT_TOKEN_DEPLOY_TIMEOUT: Duration = Duration::from_secs(120);

/// Settings shared by every pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Interval between observation ticks
    pub poll_interval: Duration,
    /// Multiplier for the stuck-event threshold
    pub stuck_multiplier: u64,
    /// Amount input debounce window
    pub debounce: Duration,
    /// Capacity of each transaction notice channel
    pub subscription_buffer: usize,
    /// Window after which an unconfirmed token wallet deploy is abandoned
    pub token_deploy_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            stuck_multiplier: DEFAULT_STUCK_MULTIPLIER,
            debounce: DEFAULT_DEBOUNCE,
            subscription_buffer: 32,
            token_deploy_timeout: DEFAULT_TOKEN_DEPLOY_TIMEOUT,
        }
    }
}

impl PipelineSettings {
    /// Load overrides from environment, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let settings = Self {
            poll_interval: env::var("PIPELINE_POLL_INTERVAL_MS")
                .ok()
                .map(|v| v.parse().map_err(|_| eyre!("Invalid PIPELINE_POLL_INTERVAL_MS")))
                .transpose()?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            stuck_multiplier: env::var("PIPELINE_STUCK_MULTIPLIER")
                .ok()
                .map(|v| v.parse().map_err(|_| eyre!("Invalid PIPELINE_STUCK_MULTIPLIER")))
                .transpose()?
                .unwrap_or(defaults.stuck_multiplier),
            debounce: env::var("AMOUNT_DEBOUNCE_MS")
                .ok()
                .map(|v| v.parse().map_err(|_| eyre!("Invalid AMOUNT_DEBOUNCE_MS")))
                .transpose()?
                .map(Duration::from_millis)
                .unwrap_or(defaults.debounce),
            subscription_buffer: defaults.subscription_buffer,
            token_deploy_timeout: env::var("TOKEN_DEPLOY_TIMEOUT_MS")
                .ok()
                .map(|v| v.parse().map_err(|_| eyre!("Invalid TOKEN_DEPLOY_TIMEOUT_MS")))
                .transpose()?
                .map(Duration::from_millis)
                .unwrap_or(defaults.token_deploy_timeout),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(eyre!("poll interval must be greater than zero"));
        }
        if self.stuck_multiplier == 0 {
            return Err(eyre!("stuck multiplier must be at least 1"));
        }
        if self.subscription_buffer == 0 {
            return Err(eyre!("subscription buffer must be at least 1"));
        }
        if self.token_deploy_timeout.is_zero() {
            return Err(eyre!("token deploy timeout must be greater than zero"));
        }
        Ok(())
    }
}
