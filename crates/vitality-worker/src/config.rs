//! Worker configuration: CLI flags (with env fallbacks) for tunables, plain
//! environment variables for credentials and endpoints.

use std::time::Duration;

use clap::Parser;
use vitality_core::{PipelineError, Result};

use crate::router::WorkerRole;

#[derive(Debug, Parser)]
#[command(name = "vitality-worker")]
#[command(about = "Distributed diocese/parish extraction worker")]
#[command(version)]
pub struct Cli {
    /// Which loop this worker runs.
    #[arg(long, value_enum, default_value = "all", env = "WORKER_TYPE")]
    pub worker_type: WorkerRole,

    /// Cap on parishes extracted per diocese; 0 means unlimited.
    #[arg(long, default_value = "0", env = "MAX_PARISHES_PER_DIOCESE")]
    pub max_parishes_per_diocese: usize,

    /// Parish batch size for one schedule-role cycle.
    #[arg(long, default_value = "100", env = "NUM_PARISHES_FOR_SCHEDULE")]
    pub num_parishes_for_schedule: i64,

    /// Headless-browser pool size.
    #[arg(long, default_value = "4", env = "POOL_SIZE")]
    pub pool_size: usize,

    /// Concurrent parish-detail requests per diocese.
    #[arg(long, default_value = "8", env = "BATCH_SIZE")]
    pub batch_size: usize,

    /// Telemetry push endpoint; events go to `<url>/events`.
    #[arg(long, env = "MONITORING_URL")]
    pub monitoring_url: Option<String>,

    /// Disable telemetry push even when a monitoring URL is configured.
    #[arg(long, env = "DISABLE_MONITORING")]
    pub disable_monitoring: bool,
}

/// Values that only ever come from the environment.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub pod_name: String,
    pub database_url: String,
    pub gemini_api_key: Option<String>,
    pub search_api_key: Option<String>,
    pub search_engine_id: Option<String>,
    pub browser_endpoint: Option<String>,
    /// National registry page listing every diocese; the discovery role
    /// seeds Diocese rows from it each sweep.
    pub diocese_registry_url: Option<String>,
    pub metrics_port: u16,
    pub heartbeat_interval: Duration,
    pub heartbeat_fatal_after: Duration,
    pub worker_dead_after: Duration,
    pub sweep_interval: Duration,
    pub config_refresh_interval: Duration,
    pub stale_after_days: i64,
    pub claim_batch_size: i64,
    pub reporting_interval: Duration,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let worker_id = std::env::var("WORKER_ID")
            .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());
        let pod_name = std::env::var("POD_NAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| "local".to_string());
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| PipelineError::Config("DATABASE_URL required".to_string()))?;

        Ok(Self {
            worker_id,
            pod_name,
            database_url,
            gemini_api_key: std::env::var("GEMINI_API_KEY").ok(),
            search_api_key: std::env::var("SEARCH_API_KEY").ok(),
            search_engine_id: std::env::var("SEARCH_ENGINE_ID").ok(),
            browser_endpoint: std::env::var("BROWSER_ENDPOINT").ok(),
            diocese_registry_url: std::env::var("DIOCESE_REGISTRY_URL").ok(),
            metrics_port: env_parse("METRICS_PORT", 9090)?,
            heartbeat_interval: Duration::from_secs(env_parse("HEARTBEAT_INTERVAL_SECS", 15)?),
            heartbeat_fatal_after: Duration::from_secs(env_parse(
                "HEARTBEAT_FATAL_AFTER_SECS",
                30,
            )?),
            worker_dead_after: Duration::from_secs(env_parse("WORKER_DEAD_AFTER_SECS", 90)?),
            sweep_interval: Duration::from_secs(env_parse("SWEEP_INTERVAL_SECS", 60)?),
            config_refresh_interval: Duration::from_secs(env_parse(
                "CONFIG_REFRESH_INTERVAL_SECS",
                600,
            )?),
            stale_after_days: env_parse("STALE_AFTER_DAYS", 30)?,
            claim_batch_size: env_parse("CLAIM_BATCH_SIZE", 2)?,
            reporting_interval: Duration::from_secs(env_parse(
                "REPORTING_INTERVAL_SECS",
                6 * 60 * 60,
            )?),
        })
    }

    /// The schedule path cannot run without the AI credential.
    pub fn require_gemini(&self) -> Result<String> {
        self.gemini_api_key
            .clone()
            .ok_or_else(|| PipelineError::Config("GEMINI_API_KEY required".to_string()))
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|_| PipelineError::Config(format!("invalid {name}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_match_the_external_contract() {
        let cli = Cli::parse_from(["vitality-worker"]);
        assert_eq!(cli.max_parishes_per_diocese, 0);
        assert_eq!(cli.num_parishes_for_schedule, 100);
        assert_eq!(cli.pool_size, 4);
        assert_eq!(cli.batch_size, 8);
        assert!(!cli.disable_monitoring);
    }

    #[test]
    fn worker_type_parses_all_roles() {
        for (flag, role) in [
            ("discovery", WorkerRole::Discovery),
            ("extraction", WorkerRole::Extraction),
            ("schedule", WorkerRole::Schedule),
            ("reporting", WorkerRole::Reporting),
            ("all", WorkerRole::All),
        ] {
            let cli = Cli::parse_from(["vitality-worker", "--worker-type", flag]);
            assert_eq!(cli.worker_type, role);
        }
    }
}
