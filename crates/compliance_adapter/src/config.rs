#![forbid(unsafe_code)]

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use compliance_kernel_contracts::common::validate_object_name;
use compliance_kernel_contracts::object::{validate_labels, Labels};
use compliance_kernel_contracts::ContractViolation;
use compliance_os::run_controller::RunControllerConfig;
use serde::{Deserialize, Serialize};

use crate::queue::RateLimiterConfig;

pub const ENV_LOG_LEVEL: &str = "COMPLIANCE_OPERATOR_LOG_LEVEL";
pub const ENV_HEALTH_BIND: &str = "COMPLIANCE_OPERATOR_HEALTH_BIND";

#[derive(Debug, thiserror::Error)]
pub enum OperatorConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid value '{value}' for {var}: {reason}")]
    Env {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("invalid configuration: {0}")]
    Invalid(#[from] ContractViolation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Error,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Error => "error",
        }
    }

    fn parse(v: &str) -> Option<Self> {
        match v.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_filter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    #[default]
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimiterSettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub qps: u32,
    pub burst: u32,
}

impl Default for RateLimiterSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 5_000,
            max_delay_ms: 120_000,
            qps: 10,
            burst: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ComplianceRunControllerSettings {
    pub max_concurrent_reconciles: u32,
    /// Seconds.
    pub reconciliation_timeout: u64,
    /// Seconds.
    pub sync_period: u64,
    pub config_namespace: String,
    pub labels: Labels,
    pub rate_limiter: RateLimiterSettings,
}

impl Default for ComplianceRunControllerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: 50,
            reconciliation_timeout: 600,
            sync_period: 3_600,
            config_namespace: "kube-system".to_string(),
            labels: Labels::new(),
            rate_limiter: RateLimiterSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControllersConfig {
    pub compliance_run: ComplianceRunControllerSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HealthProbesConfig {
    pub bind_address: IpAddr,
    pub port: u16,
}

impl Default for HealthProbesConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            port: 8081,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MetricsConfig {
    pub bind_address: IpAddr,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    pub health_probes: HealthProbesConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OperatorConfig {
    pub log: LogConfig,
    pub controllers: ControllersConfig,
    pub server: ServerConfig,
}

impl OperatorConfig {
    /// Defaults when `path` is `None`; environment overrides are applied on top either way.
    pub fn load(path: Option<&Path>) -> Result<Self, OperatorConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, OperatorConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| OperatorConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw).map_err(|source| OperatorConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        // An empty file is a valid, all-defaults config.
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), OperatorConfigError> {
        if let Some(value) = lookup(ENV_LOG_LEVEL) {
            self.log.level = LogLevel::parse(&value).ok_or(OperatorConfigError::Env {
                var: ENV_LOG_LEVEL,
                value: value.clone(),
                reason: "expected debug, info or error",
            })?;
        }
        if let Some(value) = lookup(ENV_HEALTH_BIND) {
            let addr: SocketAddr = value.trim().parse().map_err(|_| OperatorConfigError::Env {
                var: ENV_HEALTH_BIND,
                value: value.clone(),
                reason: "expected <ip>:<port>",
            })?;
            self.server.health_probes.bind_address = addr.ip();
            self.server.health_probes.port = addr.port();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ContractViolation> {
        let run = &self.controllers.compliance_run;
        if run.max_concurrent_reconciles == 0 || run.max_concurrent_reconciles > 1_024 {
            return Err(ContractViolation::InvalidRange {
                field: "controllers.complianceRun.maxConcurrentReconciles",
                min: 1,
                max: 1_024,
                got: u64::from(run.max_concurrent_reconciles),
            });
        }
        if run.reconciliation_timeout == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "controllers.complianceRun.reconciliationTimeout",
                reason: "must be greater than zero",
            });
        }
        if run.sync_period == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "controllers.complianceRun.syncPeriod",
                reason: "must be greater than zero",
            });
        }
        validate_object_name("controllers.complianceRun.configNamespace", &run.config_namespace)?;
        validate_labels("controllers.complianceRun.labels", &run.labels)?;

        let limiter = &run.rate_limiter;
        if limiter.base_delay_ms == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "controllers.complianceRun.rateLimiter.baseDelayMs",
                reason: "must be greater than zero",
            });
        }
        if limiter.max_delay_ms < limiter.base_delay_ms {
            return Err(ContractViolation::InvalidValue {
                field: "controllers.complianceRun.rateLimiter.maxDelayMs",
                reason: "must not be less than baseDelayMs",
            });
        }
        if limiter.qps == 0 || limiter.burst == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "controllers.complianceRun.rateLimiter",
                reason: "qps and burst must be greater than zero",
            });
        }
        if self.server.health_probes.port == self.server.metrics.port {
            return Err(ContractViolation::InvalidValue {
                field: "server.metrics.port",
                reason: "must differ from server.healthProbes.port",
            });
        }
        Ok(())
    }

    pub fn health_probe_addr(&self) -> SocketAddr {
        SocketAddr::new(
            self.server.health_probes.bind_address,
            self.server.health_probes.port,
        )
    }

    pub fn metrics_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.metrics.bind_address, self.server.metrics.port)
    }

    pub fn run_controller_config(&self) -> RunControllerConfig {
        let run = &self.controllers.compliance_run;
        RunControllerConfig {
            config_namespace: run.config_namespace.clone(),
            extra_labels: run.labels.clone(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.controllers.compliance_run.max_concurrent_reconciles as usize
    }

    pub fn reconciliation_timeout(&self) -> Duration {
        Duration::from_secs(self.controllers.compliance_run.reconciliation_timeout)
    }

    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        let limiter = &self.controllers.compliance_run.rate_limiter;
        RateLimiterConfig {
            base_delay: Duration::from_millis(limiter.base_delay_ms),
            max_delay: Duration::from_millis(limiter.max_delay_ms),
            qps: limiter.qps,
            burst: limiter.burst,
        }
    }
}
