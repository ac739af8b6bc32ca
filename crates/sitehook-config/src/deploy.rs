//! Deployment file parsing.
//!
//! ```kdl
//! server host="0.0.0.0" port=8000
//! webhook secret-env="SITEHOOK_SECRET"
//! status-auth user="admin" password="hunter2"
//! git timeout="5m"
//!
//! target "website_master" {
//!     working-directory "/srv/sitehook"
//!     clone-url "https://github.com/example/website.git"
//!     branch "master"
//!     build-command "make html OUTPUTDIR={output}"
//!     install-command "rsync --delete-delay -r '{output}/' /var/www/site"
//!     env {
//!         SITEURL "https://example.com"
//!     }
//!     schedule every="30m"
//!     schedule cron="0 0 3 * * *"
//!     schedule "startup"
//! }
//! ```
//!
//! Cron expressions have a leading seconds field and are evaluated in the
//! server's local time zone.

use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use sitehook_core::TargetConfig;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub use cron::Schedule as CronSchedule;

use crate::{ConfigError, ConfigResult, parse_duration};

/// Everything needed to start a sitehook server.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployConfig {
    pub server: ServerConfig,
    /// Shared secret for webhook signatures.
    pub webhook_secret: Option<SecretSource>,
    /// Credentials guarding per-target status views and actions.
    pub status_auth: Option<BasicAuth>,
    /// Upper bound for every git invocation.
    pub git_timeout: Option<Duration>,
    pub targets: Vec<TargetConfig>,
    pub schedules: Vec<ScheduledBuild>,
}

impl DeployConfig {
    pub fn target(&self, name: &str) -> Option<&TargetConfig> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub fn schedules_for<'a>(&'a self, target: &'a str) -> impl Iterator<Item = &'a ScheduledBuild> {
        self.schedules.iter().filter(move |s| s.target == target)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// Where the webhook secret comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    Literal(String),
    /// Read from this environment variable at startup.
    Env(String),
}

impl SecretSource {
    pub fn resolve(&self) -> ConfigResult<String> {
        match self {
            SecretSource::Literal(secret) => Ok(secret.clone()),
            SecretSource::Env(var) => {
                std::env::var(var).map_err(|_| ConfigError::MissingEnv(var.clone()))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub user: String,
    pub password: String,
}

/// Longest accepted `every=` period.
pub const MAX_SCHEDULE_PERIOD: Duration = Duration::from_secs(366 * 86400);

/// When a target is rebuilt without an external trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Schedule {
    /// Once, right after startup.
    Startup,
    /// Periodically, starting one period after startup.
    Every {
        #[serde(with = "secs")]
        period: Duration,
    },
    /// At the calendar times matched by a cron expression.
    Cron { expression: String },
}

impl Schedule {
    /// Whether the scheduler can drive this schedule.
    pub fn validate(&self) -> ConfigResult<()> {
        match self {
            Schedule::Startup => Ok(()),
            Schedule::Every { period } if period.is_zero() => Err(ConfigError::InvalidValue {
                field: "schedule every".to_string(),
                message: "period must be greater than zero".to_string(),
            }),
            Schedule::Every { period } if *period > MAX_SCHEDULE_PERIOD => {
                Err(ConfigError::InvalidValue {
                    field: "schedule every".to_string(),
                    message: format!(
                        "period must not exceed {} days",
                        MAX_SCHEDULE_PERIOD.as_secs() / 86400
                    ),
                })
            }
            Schedule::Every { .. } => Ok(()),
            Schedule::Cron { expression } => parse_cron(expression).map(drop),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Startup => write!(f, "once at startup"),
            Schedule::Every { period } => write!(f, "every {}s", period.as_secs()),
            Schedule::Cron { expression } => write!(f, "cron '{}'", expression),
        }
    }
}

/// Parse a cron expression with a leading seconds field.
pub fn parse_cron(expression: &str) -> ConfigResult<CronSchedule> {
    CronSchedule::from_str(expression.trim()).map_err(|e| ConfigError::InvalidValue {
        field: "schedule cron".to_string(),
        message: format!("{}: {}", expression, e),
    })
}

/// One schedule of one target. `(target, index)` identifies the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledBuild {
    pub target: String,
    pub index: usize,
    pub schedule: Schedule,
}

impl ScheduledBuild {
    /// Display name of the scheduled job.
    pub fn job_name(&self) -> String {
        format!("{} ({})", self.target, self.index)
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// Read and parse a deployment file.
pub fn load_deploy_config(path: &Path) -> ConfigResult<DeployConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_deploy_config(&text)
}

/// Parse a deployment configuration from KDL text.
pub fn parse_deploy_config(kdl: &str) -> ConfigResult<DeployConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut server = ServerConfig::default();
    let mut webhook_secret = None;
    let mut status_auth = None;
    let mut git_timeout = None;
    let mut targets: Vec<TargetConfig> = Vec::new();
    let mut schedules = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "server" => {
                if let Some(host) = get_string_prop(node, "host") {
                    server.host = host;
                }
                if let Some(port) = node.get("port") {
                    server.port = port
                        .as_integer()
                        .and_then(|p| u16::try_from(p).ok())
                        .ok_or_else(|| ConfigError::InvalidValue {
                            field: "server port".to_string(),
                            message: format!("{:?} is not a valid port", port),
                        })?;
                }
            }
            "webhook" => {
                webhook_secret = match (
                    get_string_prop(node, "secret"),
                    get_string_prop(node, "secret-env"),
                ) {
                    (Some(secret), None) => Some(SecretSource::Literal(secret)),
                    (None, Some(var)) => Some(SecretSource::Env(var)),
                    (Some(_), Some(_)) => {
                        return Err(ConfigError::InvalidValue {
                            field: "webhook".to_string(),
                            message: "use either secret or secret-env, not both".to_string(),
                        });
                    }
                    (None, None) => {
                        return Err(ConfigError::MissingField("webhook secret".to_string()));
                    }
                };
            }
            "status-auth" => {
                let user = get_string_prop(node, "user")
                    .ok_or_else(|| ConfigError::MissingField("status-auth user".to_string()))?;
                let password = get_string_prop(node, "password").ok_or_else(|| {
                    ConfigError::MissingField("status-auth password".to_string())
                })?;
                status_auth = Some(BasicAuth { user, password });
            }
            "git" => {
                if let Some(timeout) = get_string_prop(node, "timeout") {
                    git_timeout = Some(parse_duration(&timeout)?);
                }
            }
            "target" => {
                let (target, target_schedules) = parse_target(node)?;
                if targets.iter().any(|t| t.name == target.name) {
                    return Err(ConfigError::Duplicate(format!("target '{}'", target.name)));
                }
                schedules.extend(target_schedules);
                targets.push(target);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    if targets.is_empty() {
        return Err(ConfigError::MissingField("at least one target".to_string()));
    }

    Ok(DeployConfig {
        server,
        webhook_secret,
        status_auth,
        git_timeout,
        targets,
        schedules,
    })
}

fn parse_target(node: &KdlNode) -> ConfigResult<(TargetConfig, Vec<ScheduledBuild>)> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("target name".to_string()))?;

    let mut working_directory = None;
    let mut clone_url = None;
    let mut branch = None;
    let mut build_command = None;
    let mut install_command = None;
    let mut build_env = BTreeMap::new();
    let mut schedules = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "working-directory" => working_directory = get_first_string_arg(child),
                "clone-url" => clone_url = get_first_string_arg(child),
                "branch" => branch = get_first_string_arg(child),
                "build-command" => build_command = get_first_string_arg(child),
                "install-command" => install_command = get_first_string_arg(child),
                "env" => {
                    if let Some(vars) = child.children() {
                        for var in vars.nodes() {
                            let key = var.name().value().to_string();
                            if let Some(val) = get_first_string_arg(var) {
                                build_env.insert(key, val);
                            }
                        }
                    }
                }
                "schedule" => {
                    schedules.push(ScheduledBuild {
                        target: name.clone(),
                        index: schedules.len(),
                        schedule: parse_schedule(child)?,
                    });
                }
                _ => {}
            }
        }
    }

    let require = |value: Option<String>, field: &str| {
        value.ok_or_else(|| ConfigError::MissingField(format!("{} for target '{}'", field, name)))
    };

    let target = TargetConfig {
        working_directory: PathBuf::from(require(working_directory, "working-directory")?),
        clone_url: require(clone_url, "clone-url")?,
        branch: require(branch, "branch")?,
        build_command: require(build_command, "build-command")?,
        install_command: require(install_command, "install-command")?,
        build_env,
        name,
    };
    target.validate()?;

    Ok((target, schedules))
}

fn parse_schedule(node: &KdlNode) -> ConfigResult<Schedule> {
    let schedule = if let Some(every) = get_string_prop(node, "every") {
        Schedule::Every {
            period: parse_duration(&every)?,
        }
    } else if let Some(expression) = get_string_prop(node, "cron") {
        Schedule::Cron { expression }
    } else {
        match get_first_string_arg(node).as_deref() {
            Some("startup") => Schedule::Startup,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    field: "schedule".to_string(),
                    message: format!("unknown schedule: {}", other),
                });
            }
            None => {
                return Err(ConfigError::MissingField(
                    "schedule needs every=<duration>, cron=<expression> or \"startup\"".to_string(),
                ));
            }
        }
    };
    schedule.validate()?;
    Ok(schedule)
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}
