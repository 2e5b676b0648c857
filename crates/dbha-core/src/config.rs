//! YAML configuration for both run modes.
//!
//! Loaded with figment: the YAML file first, then `DBHA_`-prefixed
//! environment variables (`__` separates nesting levels, e.g.
//! `DBHA_CONTROLLER__PORT=50000`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use serde::Deserialize;

use crate::error::ConfigError;

/// Process run mode, selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Detector,
    Controller,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    pub detector: Option<DetectorConfig>,
    pub controller: Option<ControllerConfig>,
    #[serde(default)]
    pub engines: BTreeMap<String, EngineConfig>,
    pub services: ServicesConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    /// Filter directive; `RUST_LOG` wins when set.
    pub level: Option<String>,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Address this detector registers under.
    pub ip: String,
    /// Failure domain covered by this detector.
    pub idc: String,
    /// Engine types to probe; each must have a registered engine.
    pub engine_types: Vec<String>,
    #[serde(default = "defaults::detect_interval", deserialize_with = "crate::duration::deserialize")]
    pub detect_interval: Duration,
    /// How often instances and rosters are re-fetched (re-sharding).
    #[serde(default = "defaults::fetch_interval", deserialize_with = "crate::duration::deserialize")]
    pub fetch_interval: Duration,
    /// Unchanged statuses are re-shipped at most this often.
    #[serde(default = "defaults::report_interval", deserialize_with = "crate::duration::deserialize")]
    pub report_interval: Duration,
    #[serde(default = "defaults::heartbeat_interval", deserialize_with = "crate::duration::deserialize")]
    pub heartbeat_interval: Duration,
    /// Deadline of the guard around one probe.
    #[serde(default = "defaults::probe_timeout", deserialize_with = "crate::duration::deserialize")]
    pub probe_timeout: Duration,
    /// Connect and ack timeout towards controllers.
    #[serde(default = "defaults::send_timeout", deserialize_with = "crate::duration::deserialize")]
    pub send_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Address this controller registers under and detectors dial.
    pub ip: String,
    pub port: u16,
    #[serde(default = "defaults::listen_addr")]
    pub listen_addr: String,
    pub idc: String,
    #[serde(default = "defaults::dup_expire", deserialize_with = "crate::duration::deserialize")]
    pub dup_expire: Duration,
    #[serde(default = "defaults::dup_scan_interval", deserialize_with = "crate::duration::deserialize")]
    pub dup_scan_interval: Duration,
    /// Capacity of each inter-stage queue.
    #[serde(default = "defaults::queue_capacity")]
    pub queue_capacity: usize,
    /// Deadline of the controller-side re-probe.
    #[serde(default = "defaults::probe_timeout", deserialize_with = "crate::duration::deserialize")]
    pub reprobe_timeout: Duration,
    #[serde(default = "defaults::heartbeat_interval", deserialize_with = "crate::duration::deserialize")]
    pub heartbeat_interval: Duration,
    #[serde(default)]
    pub admission: AdmissionConfig,
}

/// Storm-control limits of the admission stage.
#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
    #[serde(default = "defaults::single_switch_interval", deserialize_with = "crate::duration::deserialize")]
    pub single_switch_interval: Duration,
    #[serde(default = "defaults::single_switch_limit")]
    pub single_switch_limit: u64,
    #[serde(default = "defaults::all_switch_interval", deserialize_with = "crate::duration::deserialize")]
    pub all_switch_interval: Duration,
    #[serde(default = "defaults::all_host_switch_limit")]
    pub all_host_switch_limit: u64,
    #[serde(default = "defaults::single_switch_idc_interval", deserialize_with = "crate::duration::deserialize")]
    pub single_switch_idc_interval: Duration,
    #[serde(default = "defaults::single_switch_idc")]
    pub single_switch_idc: u64,
    #[serde(default = "defaults::idc_cooldown_expire", deserialize_with = "crate::duration::deserialize")]
    pub idc_cooldown_expire: Duration,
    /// How far back the executor looks for an open ticket on the same
    /// instance before opening another.
    #[serde(default = "defaults::open_ticket_window", deserialize_with = "crate::duration::deserialize")]
    pub open_ticket_window: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            single_switch_interval: defaults::single_switch_interval(),
            single_switch_limit: defaults::single_switch_limit(),
            all_switch_interval: defaults::all_switch_interval(),
            all_host_switch_limit: defaults::all_host_switch_limit(),
            single_switch_idc_interval: defaults::single_switch_idc_interval(),
            single_switch_idc: defaults::single_switch_idc(),
            idc_cooldown_expire: defaults::idc_cooldown_expire(),
            open_ticket_window: defaults::open_ticket_window(),
        }
    }
}

/// Credentials and timeouts of one engine.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub user: Option<String>,
    pub password: Option<String>,
    #[serde(default = "defaults::ssh_port")]
    pub ssh_port: u16,
    #[serde(default = "defaults::connect_timeout", deserialize_with = "crate::duration::deserialize")]
    pub connect_timeout: Duration,
    #[serde(default = "defaults::connect_timeout", deserialize_with = "crate::duration::deserialize")]
    pub ssh_timeout: Duration,
}

impl EngineConfig {
    /// Longest a probe of a blackholed host can take: the engine connect
    /// times out, then the SSH connect and banner read do too.
    pub fn worst_case_probe(&self) -> Duration {
        self.connect_timeout + self.ssh_timeout * 2
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            user: None,
            password: None,
            ssh_port: defaults::ssh_port(),
            connect_timeout: defaults::connect_timeout(),
            ssh_timeout: defaults::connect_timeout(),
        }
    }
}

/// Where the inventory, status and name services live.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum ServicesConfig {
    /// Local redb file; single-controller deployments.
    Embedded { path: PathBuf },
    /// Remote HTTP JSON services.
    Http(HttpServicesConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpServicesConfig {
    pub inventory_url: String,
    pub status_url: String,
    pub name_url: String,
    #[serde(default = "defaults::request_timeout", deserialize_with = "crate::duration::deserialize")]
    pub timeout: Duration,
    #[serde(default)]
    pub retry: RetryConfig,
    pub tls: Option<TlsConfig>,
    /// Sent as a bearer token when set.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "defaults::base_delay", deserialize_with = "crate::duration::deserialize")]
    pub base_delay: Duration,
    #[serde(default = "defaults::max_delay", deserialize_with = "crate::duration::deserialize")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_delay: defaults::base_delay(),
            max_delay: defaults::max_delay(),
        }
    }
}

/// PEM material for service calls.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub ca_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

mod defaults {
    use std::time::Duration;

    pub fn detect_interval() -> Duration {
        Duration::from_secs(10)
    }
    pub fn fetch_interval() -> Duration {
        Duration::from_secs(60)
    }
    pub fn report_interval() -> Duration {
        Duration::from_secs(60)
    }
    pub fn heartbeat_interval() -> Duration {
        Duration::from_secs(10)
    }
    pub fn probe_timeout() -> Duration {
        Duration::from_secs(15)
    }
    pub fn send_timeout() -> Duration {
        Duration::from_secs(3)
    }
    pub fn listen_addr() -> String {
        "0.0.0.0".to_string()
    }
    pub fn dup_expire() -> Duration {
        Duration::from_secs(600)
    }
    pub fn dup_scan_interval() -> Duration {
        Duration::from_secs(60)
    }
    pub fn queue_capacity() -> usize {
        1024
    }
    pub fn single_switch_interval() -> Duration {
        Duration::from_secs(24 * 3600)
    }
    pub fn single_switch_limit() -> u64 {
        1
    }
    pub fn all_switch_interval() -> Duration {
        Duration::from_secs(3600)
    }
    pub fn all_host_switch_limit() -> u64 {
        50
    }
    pub fn single_switch_idc_interval() -> Duration {
        Duration::from_secs(60)
    }
    pub fn single_switch_idc() -> u64 {
        5
    }
    pub fn idc_cooldown_expire() -> Duration {
        Duration::from_secs(1800)
    }
    pub fn open_ticket_window() -> Duration {
        Duration::from_secs(3600)
    }
    pub fn ssh_port() -> u16 {
        22
    }
    pub fn connect_timeout() -> Duration {
        Duration::from_secs(2)
    }
    pub fn request_timeout() -> Duration {
        Duration::from_secs(5)
    }
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn base_delay() -> Duration {
        Duration::from_millis(200)
    }
    pub fn max_delay() -> Duration {
        Duration::from_secs(2)
    }
}

impl Config {
    /// Load the YAML file at `path`, overlaid with `DBHA_*` env vars.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::Missing(path.display().to_string()));
        }
        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("DBHA_").split("__"))
            .extract()
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Parse a YAML document without touching the environment.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Figment::new()
            .merge(Yaml::string(yaml))
            .extract()
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Settings of `engine_type`, or defaults when the file has none.
    pub fn engine(&self, engine_type: &str) -> EngineConfig {
        self.engines.get(engine_type).cloned().unwrap_or_default()
    }

    /// Reject configurations that cannot run in `mode`.
    pub fn validate(&self, mode: RunMode) -> Result<(), ConfigError> {
        match mode {
            RunMode::Detector => {
                let detector = self
                    .detector
                    .as_ref()
                    .ok_or_else(|| invalid("detector mode needs a `detector` section"))?;
                if detector.engine_types.is_empty() {
                    return Err(invalid("detector.engine_types is empty"));
                }
                if detector.idc.is_empty() || detector.ip.is_empty() {
                    return Err(invalid("detector.ip and detector.idc are required"));
                }
                non_zero("detector.detect_interval", detector.detect_interval)?;
                non_zero("detector.fetch_interval", detector.fetch_interval)?;
                non_zero("detector.heartbeat_interval", detector.heartbeat_interval)?;
                non_zero("detector.probe_timeout", detector.probe_timeout)?;
                for engine_type in &detector.engine_types {
                    covers_probe(
                        "detector.probe_timeout",
                        detector.probe_timeout,
                        engine_type,
                        &self.engine(engine_type),
                    )?;
                }
            }
            RunMode::Controller => {
                let controller = self
                    .controller
                    .as_ref()
                    .ok_or_else(|| invalid("controller mode needs a `controller` section"))?;
                if controller.port == 0 {
                    return Err(invalid("controller.port must be set"));
                }
                if controller.queue_capacity == 0 {
                    return Err(invalid("controller.queue_capacity must be positive"));
                }
                non_zero("controller.dup_expire", controller.dup_expire)?;
                non_zero("controller.dup_scan_interval", controller.dup_scan_interval)?;
                non_zero("controller.heartbeat_interval", controller.heartbeat_interval)?;
                non_zero("controller.reprobe_timeout", controller.reprobe_timeout)?;
                // The controller re-probes whatever engine a detector reports.
                let default = EngineConfig::default();
                covers_probe(
                    "controller.reprobe_timeout",
                    controller.reprobe_timeout,
                    "default",
                    &default,
                )?;
                for (engine_type, engine) in &self.engines {
                    covers_probe(
                        "controller.reprobe_timeout",
                        controller.reprobe_timeout,
                        engine_type,
                        engine,
                    )?;
                }

                let admission = &controller.admission;
                if admission.single_switch_limit == 0
                    || admission.all_host_switch_limit == 0
                    || admission.single_switch_idc == 0
                {
                    return Err(invalid("admission limits must be positive"));
                }
                if admission.single_switch_idc_interval > admission.all_switch_interval {
                    return Err(invalid(
                        "admission.single_switch_idc_interval exceeds all_switch_interval",
                    ));
                }
            }
        }

        if let ServicesConfig::Http(http) = &self.services {
            if http.retry.max_attempts == 0 {
                return Err(invalid("services.retry.max_attempts must be positive"));
            }
            if let Some(tls) = &http.tls {
                if tls.cert_file.is_some() != tls.key_file.is_some() {
                    return Err(invalid(
                        "services.tls.cert_file and key_file must be given together",
                    ));
                }
            }
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}

fn non_zero(name: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::Invalid(format!("{name} must be positive")));
    }
    Ok(())
}

fn covers_probe(
    name: &str,
    deadline: Duration,
    engine_type: &str,
    engine: &EngineConfig,
) -> Result<(), ConfigError> {
    let worst = engine.worst_case_probe();
    if deadline <= worst {
        return Err(ConfigError::Invalid(format!(
            "{name} ({deadline:?}) must exceed the worst-case {engine_type} probe \
             (connect_timeout + 2 * ssh_timeout = {worst:?})"
        )));
    }
    Ok(())
}
