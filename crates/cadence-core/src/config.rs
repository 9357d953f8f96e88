//! Configuration: compiled defaults, optional TOML file, `CADENCE_` env overrides.
//!
//! Merge order (later overrides earlier):
//! 1. `CadenceConfig::default()`
//! 2. TOML file, when a path is given
//! 3. `CADENCE_*` environment variables, `__` between section and key
//!    (`CADENCE_DISPATCH__MAX_PER_HOUR=50`)

use std::path::Path;

use chrono::Duration;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::domain::{CadenceError, ConstraintConfig};
use crate::ports::RateLimits;
use crate::queue::{DispatchSettings, HealthThresholds, RateScopeMode, RetryPolicy};
use crate::schedule::ResolverLimits;
use crate::sequence::SequenceSettings;

pub const ENV_PREFIX: &str = "CADENCE_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CadenceConfig {
    pub dispatch: DispatchConfig,
    pub resolver: ResolverLimits,
    pub sequence: SequenceConfig,
    pub sweep: SweepConfig,
    pub constraints: ConstraintConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchConfig {
    pub max_per_hour: u32,
    pub max_per_day: u32,
    pub burst_limit: u32,
    pub burst_window_secs: u64,
    pub near_term_threshold_secs: u64,
    pub default_max_retries: u32,
    pub max_retries_cap: u32,
    pub batch_size: usize,
    /// A SENDING claim older than this is requeued by the sweep.
    pub claim_timeout_secs: u64,
    pub rate_scope: RateScopeMode,
    pub retry: RetryPolicy,
    pub health: HealthThresholds,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_per_hour: 100,
            max_per_day: 1000,
            burst_limit: 10,
            burst_window_secs: 60,
            near_term_threshold_secs: 300,
            default_max_retries: 3,
            max_retries_cap: 10,
            batch_size: 500,
            claim_timeout_secs: 600,
            rate_scope: RateScopeMode::Global,
            retry: RetryPolicy::default(),
            health: HealthThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SequenceConfig {
    pub contact_limit: u32,
    pub contact_window_hours: u32,
    pub block_on_validation_failure: bool,
    pub due_batch_size: usize,
    pub claim_timeout_secs: u64,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        let s = SequenceSettings::default();
        Self {
            contact_limit: s.contact_limit,
            contact_window_hours: s.contact_window_hours,
            block_on_validation_failure: s.block_on_validation_failure,
            due_batch_size: s.due_batch_size,
            claim_timeout_secs: s.claim_timeout.num_seconds() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweepConfig {
    pub interval_secs: u64,
    pub workers: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            workers: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl CadenceConfig {
    /// The layered figment, before extraction.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(CadenceConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, CadenceError> {
        let config: Self = Self::figment(path)
            .extract()
            .map_err(|e| CadenceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with a TOML string; no environment.
    pub fn from_toml_str(toml: &str) -> Result<Self, CadenceError> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(CadenceConfig::default()))
            .merge(Toml::string(toml))
            .extract()
            .map_err(|e| CadenceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, CadenceError> {
        toml::to_string_pretty(self).map_err(|e| CadenceError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), CadenceError> {
        let d = &self.dispatch;
        let invalid = |msg: String| Err(CadenceError::Config(msg));
        if d.max_per_hour == 0 || d.max_per_day == 0 || d.burst_limit == 0 {
            return invalid("dispatch: rate caps must be greater than zero".into());
        }
        if d.burst_limit > d.max_per_hour {
            return invalid(format!(
                "dispatch: burst_limit {} exceeds max_per_hour {}",
                d.burst_limit, d.max_per_hour
            ));
        }
        if d.max_per_hour > d.max_per_day {
            return invalid(format!(
                "dispatch: max_per_hour {} exceeds max_per_day {}",
                d.max_per_hour, d.max_per_day
            ));
        }
        if d.burst_window_secs == 0 || d.batch_size == 0 {
            return invalid("dispatch: burst_window_secs and batch_size must be > 0".into());
        }
        if d.claim_timeout_secs == 0 || self.sequence.claim_timeout_secs == 0 {
            return invalid("claim_timeout_secs must be > 0".into());
        }
        if d.default_max_retries > d.max_retries_cap {
            return invalid(format!(
                "dispatch: default_max_retries {} exceeds max_retries_cap {}",
                d.default_max_retries, d.max_retries_cap
            ));
        }
        d.retry.validate().map_err(CadenceError::Config)?;
        d.health.validate().map_err(CadenceError::Config)?;

        if self.resolver.max_iterations == 0 || self.resolver.horizon_days == 0 {
            return invalid("resolver: limits must be greater than zero".into());
        }
        if self.sequence.contact_limit == 0 || self.sequence.contact_window_hours == 0 {
            return invalid("sequence: contact limit and window must be > 0".into());
        }
        if self.sweep.interval_secs == 0 || self.sweep.workers == 0 {
            return invalid("sweep: interval_secs and workers must be > 0".into());
        }
        self.constraints
            .validate()
            .map_err(|e| CadenceError::Config(format!("constraints: {e}")))
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        let d = &self.dispatch;
        DispatchSettings {
            limits: RateLimits {
                per_hour: d.max_per_hour,
                per_day: d.max_per_day,
                burst: d.burst_limit,
                burst_window: Duration::seconds(d.burst_window_secs as i64),
            },
            rate_scope: d.rate_scope,
            near_term_threshold: Duration::seconds(d.near_term_threshold_secs as i64),
            default_max_retries: d.default_max_retries,
            max_retries_cap: d.max_retries_cap,
            batch_size: d.batch_size,
            claim_timeout: Duration::seconds(d.claim_timeout_secs as i64),
            retry: d.retry.clone(),
            health: d.health,
        }
    }

    pub fn sequence_settings(&self) -> SequenceSettings {
        SequenceSettings {
            contact_limit: self.sequence.contact_limit,
            contact_window_hours: self.sequence.contact_window_hours,
            block_on_validation_failure: self.sequence.block_on_validation_failure,
            due_batch_size: self.sequence.due_batch_size,
            claim_timeout: Duration::seconds(self.sequence.claim_timeout_secs as i64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::BackoffStrategy;
    use chrono::Weekday;
    use rstest::rstest;

    #[test]
    fn defaults_are_valid() {
        let config = CadenceConfig::default();
        config.validate().unwrap();
        let settings = config.dispatch_settings();
        assert_eq!(settings.limits.burst_window, Duration::minutes(1));
        assert_eq!(settings.near_term_threshold, Duration::minutes(5));
        assert_eq!(settings.claim_timeout, Duration::minutes(10));
        assert_eq!(config.sequence_settings().claim_timeout, Duration::minutes(10));
    }

    #[test]
    fn toml_overrides_defaults() {
        let config = CadenceConfig::from_toml_str(
            r#"
            [dispatch]
            max_per_hour = 40
            burst_limit = 5
            rate_scope = "per_tenant"

            [dispatch.retry]
            strategy = "fixed"

            [sequence]
            block_on_validation_failure = true

            [constraints]
            utc_offset_minutes = 180
            working_days = ["Sun", "Mon", "Tue", "Wed", "Thu"]
            "#,
        )
        .unwrap();

        assert_eq!(config.dispatch.max_per_hour, 40);
        assert_eq!(config.dispatch.max_per_day, 1000);
        assert_eq!(config.dispatch.rate_scope, RateScopeMode::PerTenant);
        assert_eq!(config.dispatch.retry.strategy, BackoffStrategy::Fixed);
        assert!(config.sequence_settings().block_on_validation_failure);
        assert_eq!(config.constraints.utc_offset_minutes, 180);
        assert_eq!(config.constraints.working_days[0], Weekday::Sun);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = CadenceConfig::from_toml_str("[dispatch]\nmax_per_minute = 3\n").unwrap_err();
        assert!(matches!(err, CadenceError::Config(_)));
    }

    #[rstest]
    #[case::zero_cap("[dispatch]\nmax_per_hour = 0\n")]
    #[case::burst_over_hourly("[dispatch]\nburst_limit = 200\n")]
    #[case::hourly_over_daily("[dispatch]\nmax_per_hour = 2000\nburst_limit = 5\n")]
    #[case::inverted_hours("[constraints.working_hours]\nstart = 17\nend = 9\n")]
    #[case::hour_out_of_range("[constraints.working_hours]\nstart = 9\nend = 25\n")]
    #[case::no_working_days("[constraints]\nworking_days = []\n")]
    #[case::zero_workers("[sweep]\nworkers = 0\n")]
    #[case::zero_claim_timeout("[sequence]\nclaim_timeout_secs = 0\n")]
    fn invalid_values_fail_validation(#[case] toml: &str) {
        let err = CadenceConfig::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, CadenceError::Config(_)), "{err}");
    }

    #[test]
    fn effective_config_round_trips_through_toml() {
        let config = CadenceConfig::default();
        let rendered = config.to_toml().unwrap();
        assert_eq!(CadenceConfig::from_toml_str(&rendered).unwrap(), config);
    }
}
