//! Shared types used across stackcheck crates.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::serde_str;

/// Maximum characters kept from a response body for diagnostics.
pub const SNIPPET_LIMIT: usize = 200;

/// Where a probe points: an HTTP URL whose body is matched, or a raw TCP port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProbeTarget {
    /// `http://host:port/path`: the body is fetched and matched.
    Http { url: String },
    /// `tcp://host:port`: a successful connect counts as a match.
    Tcp { host: String, port: u16 },
}

impl ProbeTarget {
    /// The canonical URL reported for this target.
    pub fn canonical_url(&self) -> String {
        self.to_string()
    }
}

/// Error returned when an endpoint string is not a recognised target.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid probe endpoint {input:?}: {reason}")]
pub struct TargetParseError {
    pub input: String,
    pub reason: &'static str,
}

impl FromStr for ProbeTarget {
    type Err = TargetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let fail = |reason| TargetParseError {
            input: s.to_string(),
            reason,
        };

        if let Some(rest) = s.strip_prefix("tcp://") {
            let (host, port) = rest.rsplit_once(':').ok_or_else(|| fail("missing port"))?;
            if host.is_empty() {
                return Err(fail("missing host"));
            }
            let port = port.parse::<u16>().map_err(|_| fail("invalid port"))?;
            return Ok(ProbeTarget::Tcp {
                host: host.to_string(),
                port,
            });
        }

        let rest = s
            .strip_prefix("http://")
            .or_else(|| s.strip_prefix("https://"))
            .ok_or_else(|| fail("expected http://, https:// or tcp:// scheme"))?;
        if rest.is_empty() || rest.starts_with('/') {
            return Err(fail("missing host"));
        }
        Ok(ProbeTarget::Http { url: s.to_string() })
    }
}

impl TryFrom<String> for ProbeTarget {
    type Error = TargetParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProbeTarget> for String {
    fn from(target: ProbeTarget) -> Self {
        target.to_string()
    }
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeTarget::Http { url } => f.write_str(url),
            ProbeTarget::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
        }
    }
}

/// Delay policy between attempts of a single probe stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Backoff {
    /// Sleep `retry_interval` between every attempt.
    #[default]
    Fixed,
    /// Start at `retry_interval` and double after each failed attempt, up to `max`.
    Exponential {
        #[serde(with = "serde_str")]
        max: Duration,
    },
}

impl Backoff {
    /// The delay to use after `current`, given this policy.
    pub fn next(&self, current: Duration) -> Duration {
        match self {
            Backoff::Fixed => current,
            Backoff::Exponential { max } => current.saturating_mul(2).min(*max),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Declarative description of one health check and its retry/fallback policy.
///
/// The fallback is owned, so a chain is always finite and acyclic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSpec {
    /// Service this probe reports for. Fallbacks may leave it empty and
    /// inherit the name of the spec that owns them.
    #[serde(default)]
    pub service_name: String,
    pub endpoint: ProbeTarget,
    /// Regex (or literal substring, if not a valid regex) the body must contain.
    /// Required for HTTP targets since the status code is not checked; unused
    /// for TCP targets.
    #[serde(default)]
    pub expected_pattern: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_interval", with = "serde_str")]
    pub retry_interval: Duration,
    #[serde(default)]
    pub backoff: Backoff,
    /// Applies to establishing the connection only.
    #[serde(default = "default_connect_timeout", with = "serde_str")]
    pub connect_timeout: Duration,
    /// Applies to the whole request, connection included.
    #[serde(default = "default_request_timeout", with = "serde_str")]
    pub request_timeout: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Box<ProbeSpec>>,
}

impl ProbeSpec {
    /// Create a spec with default attempts, interval, and timeouts.
    pub fn new(service_name: &str, endpoint: ProbeTarget, expected_pattern: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            endpoint,
            expected_pattern: expected_pattern.to_string(),
            max_attempts: default_max_attempts(),
            retry_interval: default_retry_interval(),
            backoff: Backoff::default(),
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            fallback: None,
        }
    }

    pub fn with_attempts(mut self, max_attempts: u32, retry_interval: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.retry_interval = retry_interval;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, request: Duration) -> Self {
        self.connect_timeout = connect;
        self.request_timeout = request;
        self
    }

    pub fn with_fallback(mut self, fallback: ProbeSpec) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }

    /// Number of specs in the chain, this one included.
    pub fn chain_len(&self) -> usize {
        let mut len = 1;
        let mut next = self.fallback.as_deref();
        while let Some(spec) = next {
            len += 1;
            next = spec.fallback.as_deref();
        }
        len
    }
}

/// Health outcome of a single service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The expected pattern was found (or the port accepted a connection).
    Healthy,
    /// The service answered but not with the expected content.
    Degraded,
    /// Every attempt was exhausted without a match.
    Unreachable,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Healthy => "HEALTHY",
            Outcome::Degraded => "DEGRADED",
            Outcome::Unreachable => "UNREACHABLE",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Outcome::Healthy => "✅",
            Outcome::Degraded => "⚠️",
            Outcome::Unreachable => "❌",
        }
    }
}

/// Verdict for one service. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub service_name: String,
    pub outcome: Outcome,
    /// Attempts spent by the stage that produced `outcome`.
    pub attempts_used: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_response_snippet: Option<String>,
    #[serde(with = "serde_str")]
    pub elapsed: Duration,
    /// True when the outcome came from a fallback stage.
    #[serde(default)]
    pub via_fallback: bool,
    /// Endpoint of the stage that produced `outcome`.
    pub endpoint: String,
    /// Why the probe never finished, when it was cut short.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unresolved: Option<String>,
}

impl ProbeResult {
    /// Result for a service whose probe never finished (deadline, task failure).
    pub fn unresolved(service_name: &str, endpoint: &str, elapsed: Duration, reason: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            outcome: Outcome::Unreachable,
            attempts_used: 0,
            last_response_snippet: None,
            elapsed,
            via_fallback: false,
            endpoint: endpoint.to_string(),
            unresolved: Some(reason.to_string()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.outcome == Outcome::Healthy
    }
}

/// Truncate a response body to [`SNIPPET_LIMIT`] characters.
pub fn snippet(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(SNIPPET_LIMIT) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}

/// What a single-shot auxiliary check looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Fetch `url` once and look for `pattern` in the body.
    HttpContains { url: String, pattern: String },
    /// Open a TCP connection once.
    TcpReachable { host: String, port: u16 },
}

impl CheckKind {
    pub fn endpoint(&self) -> String {
        match self {
            CheckKind::HttpContains { url, .. } => url.clone(),
            CheckKind::TcpReachable { host, port } => format!("tcp://{host}:{port}"),
        }
    }
}

/// A non-retrying auxiliary check. Always reports `attempts_used = 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleShotCheck {
    pub service_name: String,
    pub kind: CheckKind,
    #[serde(default = "default_connect_timeout", with = "serde_str")]
    pub timeout: Duration,
}

impl SingleShotCheck {
    pub fn new(service_name: &str, kind: CheckKind) -> Self {
        Self {
            service_name: service_name.to_string(),
            kind,
            timeout: default_connect_timeout(),
        }
    }
}

/// Overall health of a deployment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Overall {
    AllHealthy,
    PartialDegradation,
    Failed,
}

impl Overall {
    /// Fold per-service results into an overall verdict.
    ///
    /// `Failed` iff the primary service is unreachable; `AllHealthy` iff
    /// every result is healthy; anything else is a partial degradation.
    pub fn aggregate(primary_service: &str, results: &[ProbeResult]) -> Self {
        let primary_down = results
            .iter()
            .any(|r| r.service_name == primary_service && r.outcome == Outcome::Unreachable);
        if primary_down {
            Overall::Failed
        } else if results.iter().all(ProbeResult::is_healthy) {
            Overall::AllHealthy
        } else {
            Overall::PartialDegradation
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Overall::AllHealthy => "ALL HEALTHY",
            Overall::PartialDegradation => "PARTIAL DEGRADATION",
            Overall::Failed => "FAILED",
        }
    }
}

/// Final categorized outcome of one health-check run.
///
/// Built once via [`DeploymentVerdict::new`] and only read afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentVerdict {
    stack_name: String,
    primary_service: String,
    overall: Overall,
    results: Vec<ProbeResult>,
    endpoints: BTreeMap<String, String>,
}

impl DeploymentVerdict {
    pub fn new(
        stack_name: &str,
        primary_service: &str,
        results: Vec<ProbeResult>,
        endpoints: BTreeMap<String, String>,
    ) -> Self {
        let overall = Overall::aggregate(primary_service, &results);
        Self {
            stack_name: stack_name.to_string(),
            primary_service: primary_service.to_string(),
            overall,
            results,
            endpoints,
        }
    }

    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    pub fn primary_service(&self) -> &str {
        &self.primary_service
    }

    pub fn overall(&self) -> Overall {
        self.overall
    }

    pub fn results(&self) -> &[ProbeResult] {
        &self.results
    }

    pub fn endpoints(&self) -> &BTreeMap<String, String> {
        &self.endpoints
    }

    pub fn result_for(&self, service_name: &str) -> Option<&ProbeResult> {
        self.results.iter().find(|r| r.service_name == service_name)
    }
}
