//! Single-service health probe.
//!
//! A [`ServiceProbe`] walks a [`ProbeSpec`] chain: the primary endpoint
//! gets up to `max_attempts` tries with a delay between them (never after
//! the last), and only once it is exhausted does the fallback get its own
//! independent budget. The first match ends the probe.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use stackcheck_core::{CheckKind, Outcome, ProbeResult, ProbeSpec, ProbeTarget, SingleShotCheck, snippet};

use crate::net::Network;

/// Compiled `expected_pattern`: a regex, or a literal when the pattern
/// does not compile.
#[derive(Debug, Clone)]
pub enum Matcher {
    Regex(Regex),
    Literal(String),
}

impl Matcher {
    pub fn new(pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(re) => Matcher::Regex(re),
            Err(_) => {
                debug!(%pattern, "pattern is not a valid regex, matching literally");
                Matcher::Literal(pattern.to_string())
            }
        }
    }

    pub fn is_match(&self, body: &str) -> bool {
        match self {
            Matcher::Regex(re) => re.is_match(body),
            Matcher::Literal(lit) => body.contains(lit.as_str()),
        }
    }
}

/// Result of a single attempt.
enum Attempt {
    Matched { body: Option<String> },
    Mismatch { body: String },
    NoResponse,
}

/// Result of running one stage of the chain to completion.
struct StageOutcome {
    matched: bool,
    attempts: u32,
}

/// Runs health checks against one service at a time.
#[derive(Clone)]
pub struct ServiceProbe {
    network: Arc<dyn Network>,
}

impl ServiceProbe {
    pub fn new(network: Arc<dyn Network>) -> Self {
        Self { network }
    }

    /// Probe `spec`, falling back down its chain, and return the verdict.
    pub async fn check(&self, spec: &ProbeSpec) -> ProbeResult {
        let started = Instant::now();
        let mut last_snippet = None;
        let mut stage = spec;
        let mut via_fallback = false;

        loop {
            let outcome = self.run_stage(&spec.service_name, stage, &mut last_snippet).await;

            if outcome.matched || stage.fallback.is_none() {
                let result = ProbeResult {
                    service_name: spec.service_name.clone(),
                    outcome: if outcome.matched {
                        Outcome::Healthy
                    } else {
                        Outcome::Unreachable
                    },
                    attempts_used: outcome.attempts,
                    last_response_snippet: last_snippet,
                    elapsed: started.elapsed(),
                    via_fallback,
                    endpoint: stage.endpoint.canonical_url(),
                    unresolved: None,
                };
                if result.is_healthy() {
                    info!(
                        service = %result.service_name,
                        attempts = result.attempts_used,
                        via_fallback,
                        "service healthy"
                    );
                } else {
                    warn!(
                        service = %result.service_name,
                        attempts = result.attempts_used,
                        "service unreachable, all attempts exhausted"
                    );
                }
                return result;
            }

            if let Some(next) = stage.fallback.as_deref() {
                info!(
                    service = %spec.service_name,
                    exhausted = %stage.endpoint,
                    fallback = %next.endpoint,
                    "primary check exhausted, trying fallback"
                );
                stage = next;
                via_fallback = true;
            }
        }
    }

    async fn run_stage(
        &self,
        service: &str,
        stage: &ProbeSpec,
        last_snippet: &mut Option<String>,
    ) -> StageOutcome {
        let matcher = Matcher::new(&stage.expected_pattern);
        let max_attempts = stage.max_attempts.max(1);
        let mut delay = stage.retry_interval;

        for attempt in 1..=max_attempts {
            match self.attempt(stage, &matcher).await {
                Attempt::Matched { body } => {
                    if let Some(body) = body {
                        *last_snippet = Some(snippet(&body));
                    }
                    return StageOutcome {
                        matched: true,
                        attempts: attempt,
                    };
                }
                Attempt::Mismatch { body } => {
                    debug!(%service, endpoint = %stage.endpoint, attempt, "response did not match expected pattern");
                    *last_snippet = Some(snippet(&body));
                }
                Attempt::NoResponse => {
                    debug!(%service, endpoint = %stage.endpoint, attempt, "no response");
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(delay).await;
                delay = stage.backoff.next(delay);
            }
        }

        StageOutcome {
            matched: false,
            attempts: max_attempts,
        }
    }

    async fn attempt(&self, stage: &ProbeSpec, matcher: &Matcher) -> Attempt {
        match &stage.endpoint {
            ProbeTarget::Http { url } => {
                let call = self
                    .network
                    .http_get(url, stage.connect_timeout, stage.request_timeout);
                // Guard against a collaborator that ignores its own timeout.
                match tokio::time::timeout(stage.request_timeout, call).await {
                    Ok(Ok(resp)) if matcher.is_match(&resp.body) => Attempt::Matched {
                        body: Some(resp.body),
                    },
                    Ok(Ok(resp)) => Attempt::Mismatch { body: resp.body },
                    Ok(Err(e)) => {
                        debug!(%url, error = %e, "http attempt failed");
                        Attempt::NoResponse
                    }
                    Err(_) => Attempt::NoResponse,
                }
            }
            ProbeTarget::Tcp { host, port } => {
                let call = self.network.tcp_connect(host, *port, stage.connect_timeout);
                match tokio::time::timeout(stage.connect_timeout, call).await {
                    Ok(Ok(())) => Attempt::Matched { body: None },
                    Ok(Err(e)) => {
                        debug!(%host, port, error = %e, "tcp attempt failed");
                        Attempt::NoResponse
                    }
                    Err(_) => Attempt::NoResponse,
                }
            }
        }
    }

    /// Run a non-retrying auxiliary check exactly once.
    pub async fn check_once(&self, check: &SingleShotCheck) -> ProbeResult {
        let started = Instant::now();
        let (outcome, last_snippet) = match &check.kind {
            CheckKind::HttpContains { url, pattern } => {
                let call = self.network.http_get(url, check.timeout, check.timeout);
                match tokio::time::timeout(check.timeout, call).await {
                    Ok(Ok(resp)) if Matcher::new(pattern).is_match(&resp.body) => {
                        (Outcome::Healthy, Some(snippet(&resp.body)))
                    }
                    Ok(Ok(resp)) => (Outcome::Degraded, Some(snippet(&resp.body))),
                    Ok(Err(e)) => {
                        debug!(%url, error = %e, "single-shot check failed");
                        (Outcome::Unreachable, None)
                    }
                    Err(_) => (Outcome::Unreachable, None),
                }
            }
            CheckKind::TcpReachable { host, port } => {
                let call = self.network.tcp_connect(host, *port, check.timeout);
                match tokio::time::timeout(check.timeout, call).await {
                    Ok(Ok(())) => (Outcome::Healthy, None),
                    _ => (Outcome::Unreachable, None),
                }
            }
        };

        info!(service = %check.service_name, outcome = outcome.label(), "single-shot check finished");
        ProbeResult {
            service_name: check.service_name.clone(),
            outcome,
            attempts_used: 1,
            last_response_snippet: last_snippet,
            elapsed: started.elapsed(),
            via_fallback: false,
            endpoint: check.kind.endpoint(),
            unresolved: None,
        }
    }
}

/// Total sleep a stage spends between attempts when nothing matches.
pub fn worst_case_wait(spec: &ProbeSpec) -> Duration {
    let mut total = Duration::ZERO;
    let mut stage = Some(spec);
    while let Some(s) = stage {
        let mut delay = s.retry_interval;
        for _ in 1..s.max_attempts.max(1) {
            total += delay;
            delay = s.backoff.next(delay);
        }
        stage = s.fallback.as_deref();
    }
    total
}
