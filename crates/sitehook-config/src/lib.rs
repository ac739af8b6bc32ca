//! KDL configuration parsing for sitehook.
//!
//! This crate handles parsing of:
//! - The deployment file (server, webhook secret, targets)
//! - Build schedules
//! - Human-readable durations

pub mod deploy;
pub mod duration;
pub mod error;

pub use deploy::{
    BasicAuth, CronSchedule, DeployConfig, MAX_SCHEDULE_PERIOD, Schedule, ScheduledBuild,
    SecretSource, ServerConfig, load_deploy_config, parse_cron, parse_deploy_config,
};
pub use duration::parse_duration;
pub use error::{ConfigError, ConfigResult};
