//! stackcheck.toml configuration parser.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::{serde_str, serde_str_opt};
use crate::types::{Backoff, CheckKind, ProbeSpec, ProbeTarget, SingleShotCheck};

/// Longest fallback chain accepted, primary included.
pub const MAX_CHAIN_LEN: usize = 8;

/// Errors raised while loading or validating a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("primary service {0:?} is not among the configured services")]
    UnknownPrimary(String),

    #[error("service name {0:?} is used more than once")]
    DuplicateService(String),

    #[error("a service or check has an empty name")]
    EmptyServiceName,

    #[error("service {0:?} has max_attempts = 0 somewhere in its chain")]
    ZeroAttempts(String),

    #[error("service {service:?} has a fallback chain of {len} probes (max {MAX_CHAIN_LEN})")]
    FallbackTooDeep { service: String, len: usize },

    #[error("service {service:?} uses {endpoint}: only plain http:// and tcp:// are supported")]
    UnsupportedScheme { service: String, endpoint: String },

    #[error("service {0:?} probes an http endpoint with an empty expected pattern")]
    EmptyPattern(String),

    #[error("max_concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("reconcile path {0} must be relative and stay inside the root")]
    InvalidReconcilePath(PathBuf),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    pub stack: StackSettings,
    #[serde(default)]
    pub services: Vec<ProbeSpec>,
    #[serde(default)]
    pub checks: Vec<SingleShotCheck>,
    #[serde(default)]
    pub reconcile: Vec<ReconcileEntry>,
}

fn default_settle_delay() -> Duration {
    Duration::from_secs(15)
}

fn default_global_timeout() -> Option<Duration> {
    Some(Duration::from_secs(300))
}

fn default_max_concurrency() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackSettings {
    pub name: String,
    /// The application under test. Its being unreachable fails the run.
    pub primary_service: String,
    /// Deployment tree to reconcile, relative to the config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    #[serde(default = "default_settle_delay", with = "serde_str")]
    pub settle_delay: Duration,
    #[serde(
        default = "default_global_timeout",
        with = "serde_str_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub global_timeout: Option<Duration>,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

/// Expected kind of a reconciled path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
}

/// When a default file's content is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Only when the file is missing (or had to be removed as the wrong kind).
    #[default]
    IfAbsent,
    /// On every run.
    Always,
}

/// One path in the reconcile template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileEntry {
    /// Relative to the deployment root.
    pub path: PathBuf,
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    /// Unix permission bits, e.g. `0o644`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    #[serde(default)]
    pub policy: WritePolicy,
}

impl ReconcileEntry {
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Directory,
            content: String::new(),
            mode: None,
            policy: WritePolicy::IfAbsent,
        }
    }

    pub fn file(path: impl Into<PathBuf>, content: &str) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File,
            content: content.to_string(),
            mode: None,
            policy: WritePolicy::IfAbsent,
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_policy(mut self, policy: WritePolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Whether `path` is relative and never climbs out of its root.
pub fn is_contained(path: &Path) -> bool {
    use std::path::Component;

    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

impl StackConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse, fill inherited fallback names, and validate.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: StackConfig = toml::from_str(content)?;
        config.inherit_fallback_names();
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Fallbacks with no name report under the service that owns them.
    fn inherit_fallback_names(&mut self) {
        for spec in &mut self.services {
            let name = spec.service_name.clone();
            let mut next = spec.fallback.as_deref_mut();
            while let Some(fallback) = next {
                if fallback.service_name.is_empty() {
                    fallback.service_name = name.clone();
                }
                next = fallback.fallback.as_deref_mut();
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }

        let mut names = HashSet::new();
        let all_names = self
            .services
            .iter()
            .map(|s| s.service_name.as_str())
            .chain(self.checks.iter().map(|c| c.service_name.as_str()));
        for name in all_names {
            if name.is_empty() {
                return Err(ConfigError::EmptyServiceName);
            }
            if !names.insert(name) {
                return Err(ConfigError::DuplicateService(name.to_string()));
            }
        }

        if !names.contains(self.stack.primary_service.as_str()) {
            return Err(ConfigError::UnknownPrimary(self.stack.primary_service.clone()));
        }

        for spec in &self.services {
            let len = spec.chain_len();
            if len > MAX_CHAIN_LEN {
                return Err(ConfigError::FallbackTooDeep {
                    service: spec.service_name.clone(),
                    len,
                });
            }
            let mut next = Some(spec);
            while let Some(stage) = next {
                if stage.max_attempts == 0 {
                    return Err(ConfigError::ZeroAttempts(spec.service_name.clone()));
                }
                if let ProbeTarget::Http { url } = &stage.endpoint {
                    check_http(&spec.service_name, url, &stage.expected_pattern)?;
                }
                next = stage.fallback.as_deref();
            }
        }

        for check in &self.checks {
            if let CheckKind::HttpContains { url, pattern } = &check.kind {
                check_http(&check.service_name, url, pattern)?;
            }
        }

        for entry in &self.reconcile {
            if !is_contained(&entry.path) {
                return Err(ConfigError::InvalidReconcilePath(entry.path.clone()));
            }
        }

        Ok(())
    }

    /// Scaffold a config for a typical application + monitoring stack.
    pub fn scaffold(name: &str) -> Self {
        let app = ProbeSpec::new("app", http("http://localhost:8080/actuator/health"), "UP")
            .with_attempts(3, Duration::from_secs(10))
            .with_fallback(
                ProbeSpec::new("app", http("http://localhost:8080/"), name)
                    .with_attempts(2, Duration::from_secs(5)),
            );

        let grafana = ProbeSpec::new(
            "grafana",
            http("http://localhost:3000/api/health"),
            r#""database":\s*"ok""#,
        )
        .with_attempts(5, Duration::from_secs(5))
        .with_fallback(
            ProbeSpec::new("grafana", http("http://localhost:3000/login"), "Grafana")
                .with_attempts(2, Duration::from_secs(5)),
        );

        let prometheus = ProbeSpec::new(
            "prometheus",
            http("http://localhost:9090/-/ready"),
            "Ready",
        )
        .with_attempts(5, Duration::from_secs(2))
        .with_backoff(Backoff::Exponential {
            max: Duration::from_secs(30),
        })
        .with_fallback(
            ProbeSpec::new("prometheus", http("http://localhost:9090/graph"), "Prometheus")
                .with_attempts(2, Duration::from_secs(5)),
        );

        StackConfig {
            stack: StackSettings {
                name: name.to_string(),
                primary_service: "app".to_string(),
                root: None,
                settle_delay: default_settle_delay(),
                global_timeout: default_global_timeout(),
                max_concurrency: default_max_concurrency(),
            },
            services: vec![app, grafana, prometheus],
            checks: vec![
                SingleShotCheck::new(
                    "node-exporter",
                    CheckKind::HttpContains {
                        url: "http://localhost:9100/metrics".to_string(),
                        pattern: "node_".to_string(),
                    },
                ),
                SingleShotCheck::new(
                    "database",
                    CheckKind::TcpReachable {
                        host: "localhost".to_string(),
                        port: 5432,
                    },
                ),
            ],
            reconcile: vec![
                ReconcileEntry::directory("logs").with_mode(0o755),
                ReconcileEntry::directory("monitoring/prometheus"),
                ReconcileEntry::file("monitoring/prometheus/alert_rules.yml", DEFAULT_ALERT_RULES)
                    .with_mode(0o644),
                ReconcileEntry::directory("monitoring/grafana/provisioning/datasources"),
                ReconcileEntry::file(
                    "monitoring/grafana/provisioning/datasources/datasource.yml",
                    DEFAULT_DATASOURCE,
                )
                .with_mode(0o644),
            ],
        }
    }
}

/// An empty pattern matches any body, error pages included.
fn check_http(service: &str, url: &str, pattern: &str) -> Result<(), ConfigError> {
    if !url.starts_with("http://") {
        return Err(ConfigError::UnsupportedScheme {
            service: service.to_string(),
            endpoint: url.to_string(),
        });
    }
    if pattern.is_empty() {
        return Err(ConfigError::EmptyPattern(service.to_string()));
    }
    Ok(())
}

fn http(url: &str) -> ProbeTarget {
    ProbeTarget::Http {
        url: url.to_string(),
    }
}

/// Alerting rules written when the deployment tree has none.
pub const DEFAULT_ALERT_RULES: &str = r#"groups:
  - name: application
    rules:
      - alert: ApplicationDown
        expr: up{job="app"} == 0
        for: 1m
        labels:
          severity: critical
        annotations:
          summary: "Application instance {{ $labels.instance }} is down"
      - alert: HighErrorRate
        expr: rate(http_server_requests_seconds_count{status=~"5.."}[5m]) > 0.05
        for: 5m
        labels:
          severity: warning
        annotations:
          summary: "5xx rate above 5% on {{ $labels.instance }}"
  - name: host
    rules:
      - alert: HostHighCpu
        expr: 100 - (avg by (instance) (rate(node_cpu_seconds_total{mode="idle"}[5m])) * 100) > 85
        for: 10m
        labels:
          severity: warning
        annotations:
          summary: "CPU above 85% on {{ $labels.instance }}"
"#;

/// Grafana datasource provisioning pointing at the monitoring backend.
pub const DEFAULT_DATASOURCE: &str = r#"apiVersion: 1
datasources:
  - name: Prometheus
    type: prometheus
    access: proxy
    url: http://prometheus:9090
    isDefault: true
"#;
