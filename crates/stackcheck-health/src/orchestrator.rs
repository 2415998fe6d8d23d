//! Health orchestrator: probes the whole stack and folds the verdict.
//!
//! Waits a settle delay once, then runs every probe and single-shot check
//! as an independent task, bounded by a semaphore. A global deadline caps
//! the run; services still unresolved when it fires are reported
//! unreachable. Aggregation happens only after every task has finished or
//! been aborted, so no result is shared while probes run.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use stackcheck_core::{DeploymentVerdict, ProbeResult, ProbeSpec, SingleShotCheck, StackSettings};

use crate::net::Network;
use crate::probe::{ServiceProbe, worst_case_wait};

/// Run-wide knobs for a [`HealthOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub stack_name: String,
    /// The application under test. Unreachable here means `Failed`.
    pub primary_service: String,
    /// Waited once before the first probe.
    pub settle_delay: Duration,
    /// Wall-clock budget for the whole run, settle delay included.
    pub global_timeout: Option<Duration>,
    /// 1 reproduces strictly sequential probing.
    pub max_concurrency: usize,
}

impl OrchestratorSettings {
    pub fn new(stack_name: &str, primary_service: &str) -> Self {
        Self {
            stack_name: stack_name.to_string(),
            primary_service: primary_service.to_string(),
            settle_delay: Duration::ZERO,
            global_timeout: None,
            max_concurrency: 1,
        }
    }

    pub fn from_stack(stack: &StackSettings) -> Self {
        Self {
            stack_name: stack.name.clone(),
            primary_service: stack.primary_service.clone(),
            settle_delay: stack.settle_delay,
            global_timeout: stack.global_timeout,
            max_concurrency: stack.max_concurrency,
        }
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    pub fn with_global_timeout(mut self, global_timeout: Option<Duration>) -> Self {
        self.global_timeout = global_timeout;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }
}

/// One unit of probing work.
#[derive(Debug, Clone)]
enum Job {
    Probe(ProbeSpec),
    Check(SingleShotCheck),
}

impl Job {
    fn service_name(&self) -> &str {
        match self {
            Job::Probe(spec) => &spec.service_name,
            Job::Check(check) => &check.service_name,
        }
    }

    fn endpoint(&self) -> String {
        match self {
            Job::Probe(spec) => spec.endpoint.canonical_url(),
            Job::Check(check) => check.kind.endpoint(),
        }
    }
}

/// Runs [`ServiceProbe`]s across the stack and decides overall health.
pub struct HealthOrchestrator {
    probe: ServiceProbe,
    settings: OrchestratorSettings,
}

impl HealthOrchestrator {
    pub fn new(network: Arc<dyn Network>, settings: OrchestratorSettings) -> Self {
        Self {
            probe: ServiceProbe::new(network),
            settings,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Probe every spec and check, then aggregate.
    ///
    /// `results` follow input order: `specs` first, then `checks`.
    pub async fn run(&self, specs: &[ProbeSpec], checks: &[SingleShotCheck]) -> DeploymentVerdict {
        let started = Instant::now();
        let deadline = self.settings.global_timeout.map(|t| started + t);

        let jobs: Vec<Job> = specs
            .iter()
            .cloned()
            .map(Job::Probe)
            .chain(checks.iter().cloned().map(Job::Check))
            .collect();
        let endpoints: BTreeMap<String, String> = jobs
            .iter()
            .map(|job| (job.service_name().to_string(), job.endpoint()))
            .collect();

        if let Some(budget) = self.settings.global_timeout {
            let worst = specs.iter().map(worst_case_wait).max().unwrap_or_default();
            if self.settings.settle_delay + worst > budget {
                warn!(
                    budget = ?budget,
                    settle = ?self.settings.settle_delay,
                    slowest_retry_wait = ?worst,
                    "global timeout may cut retries short"
                );
            }
        }

        info!(
            stack = %self.settings.stack_name,
            services = jobs.len(),
            concurrency = self.settings.max_concurrency,
            "starting health verification"
        );

        if !self.settings.settle_delay.is_zero() {
            info!(delay = ?self.settings.settle_delay, "waiting for stack to settle");
            let settle = tokio::time::sleep(self.settings.settle_delay);
            match deadline {
                Some(deadline) => {
                    let _ = tokio::time::timeout_at(deadline, settle).await;
                }
                None => settle.await,
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let mut set = JoinSet::new();
        for (index, job) in jobs.iter().cloned().enumerate() {
            let probe = self.probe.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = match &job {
                    Job::Probe(spec) => probe.check(spec).await,
                    Job::Check(check) => probe.check_once(check).await,
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<ProbeResult>> = vec![None; jobs.len()];
        let mut unresolved_reason = "probe task failed";
        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, set.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(
                            unresolved = set.len(),
                            "global deadline exceeded, aborting remaining probes"
                        );
                        set.abort_all();
                        unresolved_reason = "global deadline exceeded before probe resolved";
                        break;
                    }
                },
                None => set.join_next().await,
            };

            match next {
                None => break,
                Some(Ok((index, result))) => {
                    debug!(service = %result.service_name, outcome = result.outcome.label(), "probe resolved");
                    slots[index] = Some(result);
                }
                Some(Err(e)) => {
                    error!(error = %e, "probe task failed");
                }
            }
        }

        let elapsed = started.elapsed();
        let results: Vec<ProbeResult> = slots
            .into_iter()
            .zip(&jobs)
            .map(|(slot, job)| {
                slot.unwrap_or_else(|| {
                    ProbeResult::unresolved(job.service_name(), &job.endpoint(), elapsed, unresolved_reason)
                })
            })
            .collect();

        let verdict = DeploymentVerdict::new(
            &self.settings.stack_name,
            &self.settings.primary_service,
            results,
            endpoints,
        );
        info!(
            stack = %self.settings.stack_name,
            overall = verdict.overall().label(),
            elapsed = ?elapsed,
            "health verification finished"
        );
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Reply, ScriptedNetwork, body};
    use stackcheck_core::{CheckKind, Outcome, Overall};
    use std::collections::HashSet;

    fn spec(name: &str, url: &str, pattern: &str) -> ProbeSpec {
        ProbeSpec::new(name, url.parse().unwrap(), pattern).with_attempts(3, Duration::from_secs(5))
    }

    /// Application, dashboard, and monitoring backend probes plus the two
    /// auxiliary checks.
    fn stack() -> (Vec<ProbeSpec>, Vec<SingleShotCheck>) {
        let specs = vec![
            spec("app", "http://app:8080/actuator/health", "UP").with_fallback(spec(
                "app",
                "http://app:8080/",
                "orders",
            )),
            spec("grafana", "http://grafana:3000/api/health", "ok"),
            spec("prometheus", "http://prom:9090/-/ready", "Ready"),
        ];
        let checks = vec![
            SingleShotCheck::new(
                "node-exporter",
                CheckKind::HttpContains {
                    url: "http://ne:9100/metrics".into(),
                    pattern: "node_".into(),
                },
            ),
            SingleShotCheck::new(
                "database",
                CheckKind::TcpReachable {
                    host: "db".into(),
                    port: 5432,
                },
            ),
        ];
        (specs, checks)
    }

    fn healthy_network() -> ScriptedNetwork {
        ScriptedNetwork::default()
            .script("http://app:8080/actuator/health", vec![body(r#"{"status":"UP"}"#)])
            .script("http://grafana:3000/api/health", vec![body(r#"{"database":"ok"}"#)])
            .script("http://prom:9090/-/ready", vec![body("Prometheus Server is Ready.")])
            .script("http://ne:9100/metrics", vec![body("node_cpu_seconds_total 1")])
            .script("tcp://db:5432", vec![body("")])
    }

    fn orchestrator(net: ScriptedNetwork, settings: OrchestratorSettings) -> HealthOrchestrator {
        HealthOrchestrator::new(Arc::new(net), settings)
    }

    fn settings() -> OrchestratorSettings {
        OrchestratorSettings::new("orders", "app")
    }

    #[tokio::test(start_paused = true)]
    async fn all_healthy() {
        let (specs, checks) = stack();
        let verdict = orchestrator(healthy_network(), settings()).run(&specs, &checks).await;

        assert_eq!(verdict.overall(), Overall::AllHealthy);
        assert_eq!(verdict.results().len(), 5);
        let names: Vec<_> = verdict.results().iter().map(|r| r.service_name.as_str()).collect();
        assert_eq!(names, vec!["app", "grafana", "prometheus", "node-exporter", "database"]);
        assert_eq!(verdict.result_for("database").unwrap().attempts_used, 1);
        assert_eq!(
            verdict.endpoints().get("app").map(String::as_str),
            Some("http://app:8080/actuator/health")
        );
        assert_eq!(
            verdict.endpoints().get("database").map(String::as_str),
            Some("tcp://db:5432")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn monitoring_backend_down_is_partial_degradation() {
        let (specs, checks) = stack();
        let net = healthy_network().script("http://prom:9090/-/ready", vec![Reply::Refused]);

        let verdict = orchestrator(net, settings()).run(&specs, &checks).await;

        assert_eq!(verdict.overall(), Overall::PartialDegradation);
        let prom = verdict.result_for("prometheus").unwrap();
        assert_eq!(prom.outcome, Outcome::Unreachable);
        assert_eq!(prom.attempts_used, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn primary_down_fails_regardless_of_sidecars() {
        let (specs, checks) = stack();
        let net = healthy_network()
            .script("http://app:8080/actuator/health", vec![Reply::Refused])
            .script("http://app:8080/", vec![Reply::Refused]);

        let verdict = orchestrator(net, settings()).run(&specs, &checks).await;

        assert_eq!(verdict.overall(), Overall::Failed);
        let app = verdict.result_for("app").unwrap();
        assert!(app.via_fallback);
        assert_eq!(app.outcome, Outcome::Unreachable);
    }

    #[tokio::test(start_paused = true)]
    async fn primary_rescued_by_fallback_with_degraded_metrics() {
        let (specs, checks) = stack();
        let net = healthy_network()
            .script("http://app:8080/actuator/health", vec![body("Not Found")])
            .script("http://app:8080/", vec![body("<h1>orders</h1>")])
            .script("http://ne:9100/metrics", vec![body("nothing here")]);

        let verdict = orchestrator(net, settings()).run(&specs, &checks).await;

        assert_eq!(verdict.overall(), Overall::PartialDegradation);
        assert!(verdict.result_for("app").unwrap().is_healthy());
        assert_eq!(
            verdict.result_for("node-exporter").unwrap().outcome,
            Outcome::Degraded
        );
    }

    #[tokio::test(start_paused = true)]
    async fn input_order_does_not_change_outcomes() {
        let (mut specs, mut checks) = stack();
        let scripted = || healthy_network().script("http://grafana:3000/api/health", vec![body("{}")]);

        let forward = orchestrator(scripted(), settings()).run(&specs, &checks).await;
        specs.reverse();
        checks.reverse();
        let reversed = orchestrator(scripted(), settings()).run(&specs, &checks).await;

        assert_eq!(forward.overall(), reversed.overall());
        let outcomes = |v: &DeploymentVerdict| -> HashSet<(String, Outcome)> {
            v.results()
                .iter()
                .map(|r| (r.service_name.clone(), r.outcome))
                .collect()
        };
        assert_eq!(outcomes(&forward), outcomes(&reversed));
        assert_eq!(reversed.results()[0].service_name, "prometheus");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_runs_match_sequential_verdict() {
        let (specs, checks) = stack();
        // Outcomes resolve at different times: the fallback and the retries
        // finish well after the single-shot checks.
        let scripted = || {
            healthy_network()
                .script("http://app:8080/actuator/health", vec![body("Not Found")])
                .script("http://app:8080/", vec![body("<h1>orders</h1>")])
                .script("http://grafana:3000/api/health", vec![body("{}")])
                .script("http://prom:9090/-/ready", vec![Reply::Refused])
        };
        let summary = |v: &DeploymentVerdict| -> Vec<(String, Outcome, u32, bool)> {
            let mut rows: Vec<_> = v
                .results()
                .iter()
                .map(|r| (r.service_name.clone(), r.outcome, r.attempts_used, r.via_fallback))
                .collect();
            rows.sort_by(|a, b| a.0.cmp(&b.0));
            rows
        };

        let sequential = orchestrator(scripted(), settings()).run(&specs, &checks).await;
        let concurrent = orchestrator(scripted(), settings().with_max_concurrency(5))
            .run(&specs, &checks)
            .await;

        let (mut rev_specs, mut rev_checks) = (specs.clone(), checks.clone());
        rev_specs.reverse();
        rev_checks.reverse();
        let concurrent_reversed = orchestrator(scripted(), settings().with_max_concurrency(5))
            .run(&rev_specs, &rev_checks)
            .await;

        assert_eq!(sequential.overall(), Overall::PartialDegradation);
        assert_eq!(concurrent.overall(), sequential.overall());
        assert_eq!(concurrent_reversed.overall(), sequential.overall());
        assert_eq!(summary(&concurrent), summary(&sequential));
        assert_eq!(summary(&concurrent_reversed), summary(&sequential));

        // Results keep input order even though tasks finish out of order.
        let names: Vec<_> = concurrent.results().iter().map(|r| r.service_name.as_str()).collect();
        assert_eq!(names, vec!["app", "grafana", "prometheus", "node-exporter", "database"]);
        assert_eq!(concurrent.endpoints(), sequential.endpoints());
    }

    #[tokio::test(start_paused = true)]
    async fn settle_delay_runs_once_before_probing() {
        let (specs, checks) = stack();
        let started = Instant::now();

        orchestrator(
            healthy_network(),
            settings().with_settle_delay(Duration::from_secs(15)),
        )
        .run(&specs, &checks)
        .await;

        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn global_deadline_marks_unresolved_services() {
        let (mut specs, checks) = stack();
        specs[1] = specs[1]
            .clone()
            .with_timeouts(Duration::from_secs(3600), Duration::from_secs(3600));
        let net = healthy_network().script("http://grafana:3000/api/health", vec![Reply::Hang]);
        let started = Instant::now();

        let verdict = orchestrator(
            net,
            settings()
                .with_global_timeout(Some(Duration::from_secs(30)))
                .with_max_concurrency(5),
        )
        .run(&specs, &checks)
        .await;

        assert_eq!(started.elapsed(), Duration::from_secs(30));
        assert_eq!(verdict.overall(), Overall::PartialDegradation);
        let grafana = verdict.result_for("grafana").unwrap();
        assert_eq!(grafana.outcome, Outcome::Unreachable);
        assert_eq!(grafana.attempts_used, 0);
        assert!(grafana.last_response_snippet.is_none());
        assert!(grafana.unresolved.as_deref().unwrap().contains("deadline"));
        assert!(verdict.result_for("app").unwrap().is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_overlaps_independent_probes() {
        let specs: Vec<ProbeSpec> = ["a", "b", "c"]
            .iter()
            .map(|name| {
                ProbeSpec::new(name, format!("http://{name}/health").parse().unwrap(), "UP")
                    .with_attempts(1, Duration::from_secs(1))
                    .with_timeouts(Duration::from_secs(10), Duration::from_secs(10))
            })
            .collect();
        let scripted = || {
            ScriptedNetwork::default()
                .script("http://a/health", vec![Reply::Hang])
                .script("http://b/health", vec![Reply::Hang])
                .script("http://c/health", vec![Reply::Hang])
        };

        let started = Instant::now();
        orchestrator(scripted(), OrchestratorSettings::new("s", "a").with_max_concurrency(3))
            .run(&specs, &[])
            .await;
        assert_eq!(started.elapsed(), Duration::from_secs(10));

        let started = Instant::now();
        let verdict = orchestrator(scripted(), OrchestratorSettings::new("s", "a"))
            .run(&specs, &[])
            .await;
        assert_eq!(started.elapsed(), Duration::from_secs(30));
        assert_eq!(verdict.overall(), Overall::Failed);
    }
}
