use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use stackcheck_core::{DeploymentVerdict, Overall, StackConfig};
use stackcheck_health::{HealthOrchestrator, HyperNetwork, Network, OrchestratorSettings};
use tracing::warn;

use super::load_config;
use crate::ReportFormat;

/// Probe the configured stack, print the report, and return the exit status.
pub async fn verify(
    config_path: &Path,
    format: ReportFormat,
    no_settle: bool,
    strict: bool,
) -> anyhow::Result<u8> {
    let config = load_config(config_path)?;
    let verdict = run_checks(Arc::new(HyperNetwork::default()), &config, no_settle).await;

    let rendered = match format {
        ReportFormat::Text => stackcheck_report::render(&verdict),
        ReportFormat::Json => stackcheck_report::render_json(&verdict)?,
    };
    println!("{rendered}");

    let status = exit_status(verdict.overall(), strict);
    if status != 0 {
        warn!(
            stack = %verdict.stack_name(),
            overall = verdict.overall().label(),
            strict,
            "verification did not pass"
        );
    }
    Ok(status)
}

fn settings_for(config: &StackConfig, no_settle: bool) -> OrchestratorSettings {
    let settings = OrchestratorSettings::from_stack(&config.stack);
    if no_settle {
        settings.with_settle_delay(Duration::ZERO)
    } else {
        settings
    }
}

pub async fn run_checks(
    network: Arc<dyn Network>,
    config: &StackConfig,
    no_settle: bool,
) -> DeploymentVerdict {
    HealthOrchestrator::new(network, settings_for(config, no_settle))
        .run(&config.services, &config.checks)
        .await
}

/// 0 on success, 1 when the primary service failed, 2 for a degraded
/// stack under `--strict`.
pub fn exit_status(overall: Overall, strict: bool) -> u8 {
    match overall {
        Overall::Failed => 1,
        Overall::PartialDegradation if strict => 2,
        Overall::PartialDegradation | Overall::AllHealthy => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackcheck_core::Outcome;
    use tokio::net::TcpListener;

    #[test]
    fn test_exit_status() {
        assert_eq!(exit_status(Overall::AllHealthy, false), 0);
        assert_eq!(exit_status(Overall::AllHealthy, true), 0);
        assert_eq!(exit_status(Overall::PartialDegradation, false), 0);
        assert_eq!(exit_status(Overall::PartialDegradation, true), 2);
        assert_eq!(exit_status(Overall::Failed, false), 1);
        assert_eq!(exit_status(Overall::Failed, true), 1);
    }

    #[test]
    fn test_no_settle_overrides_config() {
        let config = StackConfig::scaffold("orders");
        assert_eq!(settings_for(&config, false).settle_delay, Duration::from_secs(15));
        assert_eq!(settings_for(&config, true).settle_delay, Duration::ZERO);
        assert_eq!(settings_for(&config, true).primary_service, "app");
    }

    fn tcp_stack(app_port: u16, db_port: u16) -> StackConfig {
        StackConfig::from_toml_str(&format!(
            r#"
[stack]
name = "orders"
primary_service = "app"
global_timeout = "10s"

[[services]]
service_name = "app"
endpoint = "tcp://127.0.0.1:{app_port}"
expected_pattern = ""
max_attempts = 2
retry_interval = "10ms"
connect_timeout = "500ms"

[[checks]]
service_name = "database"
kind = {{ tcp_reachable = {{ host = "127.0.0.1", port = {db_port} }} }}
timeout = "500ms"
"#
        ))
        .unwrap()
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_run_checks_degraded_stack() {
        let app = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let app_port = app.local_addr().unwrap().port();
        let config = tcp_stack(app_port, closed_port().await);

        let verdict = run_checks(Arc::new(HyperNetwork::default()), &config, true).await;

        assert_eq!(verdict.overall(), Overall::PartialDegradation);
        assert_eq!(verdict.result_for("app").unwrap().outcome, Outcome::Healthy);
        assert_eq!(
            verdict.result_for("database").unwrap().outcome,
            Outcome::Unreachable
        );
        assert_eq!(exit_status(verdict.overall(), true), 2);
        drop(app);
    }

    #[tokio::test]
    async fn test_run_checks_primary_down_fails() {
        let db = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let db_port = db.local_addr().unwrap().port();
        let config = tcp_stack(closed_port().await, db_port);

        let verdict = run_checks(Arc::new(HyperNetwork::default()), &config, true).await;

        assert_eq!(verdict.overall(), Overall::Failed);
        assert_eq!(verdict.result_for("app").unwrap().attempts_used, 2);
        assert_eq!(exit_status(verdict.overall(), false), 1);
        drop(db);
    }

    #[tokio::test]
    async fn test_verify_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let err = verify(&dir.path().join("stackcheck.toml"), ReportFormat::Text, true, false)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("stackcheck.toml"));
    }
}
