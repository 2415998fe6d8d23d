//! Deployment report rendering.
//!
//! Pure functions over a finalized [`DeploymentVerdict`]: the same
//! verdict always renders the same text. Nothing here retries or touches
//! the network.

use stackcheck_core::{DeploymentVerdict, Outcome, Overall, ProbeResult};

/// Render the verdict as an operator-facing text report.
pub fn render(verdict: &DeploymentVerdict) -> String {
    let mut out = String::new();

    let rows = [
        ("Stack:", verdict.stack_name()),
        ("Primary:", verdict.primary_service()),
        ("Verdict:", verdict.overall().label()),
    ];
    // The box grows with the longest value so the right border stays aligned.
    let value_width = rows
        .iter()
        .map(|(_, value)| value.chars().count())
        .max()
        .unwrap_or(0)
        .max(30);
    let inner = value_width + 12;

    out.push_str(&format!("\n╔{}╗\n", "═".repeat(inner)));
    out.push_str(&format!("║{:<inner$}║\n", "  stackcheck Deployment Verification"));
    out.push_str(&format!("╠{}╣\n", "═".repeat(inner)));
    for (label, value) in rows {
        out.push_str(&format!("║  {label:<10}{value:<value_width$}║\n"));
    }
    out.push_str(&format!("╚{}╝\n\n", "═".repeat(inner)));

    let results = verdict.results();
    let count = |o: Outcome| results.iter().filter(|r| r.outcome == o).count();

    out.push_str(&format!("Services ({} total):\n", results.len()));
    out.push_str(&format!("  ✅ {} healthy\n", count(Outcome::Healthy)));
    out.push_str(&format!("  ⚠️  {} degraded\n", count(Outcome::Degraded)));
    out.push_str(&format!("  ❌ {} unreachable\n\n", count(Outcome::Unreachable)));

    let width = results
        .iter()
        .map(|r| r.service_name.len())
        .max()
        .unwrap_or(0);
    for r in results {
        render_result(&mut out, r, width, r.service_name == verdict.primary_service());
    }
    out.push('\n');

    if !verdict.endpoints().is_empty() {
        out.push_str("ENDPOINTS:\n\n");
        for (name, url) in verdict.endpoints() {
            out.push_str(&format!("  • {name:<width$}  {url}\n"));
        }
        out.push('\n');
    }

    out.push_str("NEXT STEPS:\n\n");
    for line in remediation(verdict) {
        out.push_str(&format!("  {line}\n"));
    }

    out
}

fn render_result(out: &mut String, r: &ProbeResult, width: usize, primary: bool) {
    let attempts = match r.attempts_used {
        1 => "1 attempt".to_string(),
        n => format!("{n} attempts"),
    };
    let mut notes = Vec::new();
    if primary {
        notes.push("primary");
    }
    if r.via_fallback {
        notes.push("via fallback");
    }
    let notes = if notes.is_empty() {
        String::new()
    } else {
        format!(" ({})", notes.join(", "))
    };

    out.push_str(&format!(
        "  {} {:<width$}  {:<11}  {:<11}  {:>6.1}s{}\n",
        r.outcome.symbol(),
        r.service_name,
        r.outcome.label(),
        attempts,
        r.elapsed.as_secs_f64(),
        notes,
    ));
    if r.outcome != Outcome::Healthy {
        out.push_str(&format!("     Endpoint: {}\n", r.endpoint));
        match (&r.unresolved, &r.last_response_snippet) {
            (Some(reason), _) => out.push_str(&format!("     Not resolved: {reason}\n")),
            (None, Some(snippet)) => out.push_str(&format!("     Last response: {snippet}\n")),
            (None, None) => out.push_str("     Last response: (none received)\n"),
        }
    }
}

/// Operator hints for the verdict's overall state.
pub fn remediation(verdict: &DeploymentVerdict) -> Vec<String> {
    let primary = verdict.primary_service();
    match verdict.overall() {
        Overall::AllHealthy => vec![
            "All services are up. Nothing to do.".to_string(),
            format!("Scale the application with: docker compose up -d --scale {primary}=<N>"),
        ],
        Overall::PartialDegradation => {
            let impaired: Vec<&str> = verdict
                .results()
                .iter()
                .filter(|r| !r.is_healthy())
                .map(|r| r.service_name.as_str())
                .collect();
            vec![
                format!("The application is serving, but {} need attention.", impaired.join(", ")),
                "Inspect their logs with: docker compose logs <service>".to_string(),
                "Restart a single sidecar with: docker compose restart <service>".to_string(),
            ]
        }
        Overall::Failed => vec![
            format!("The application '{primary}' never became healthy. The deployment failed."),
            format!("Inspect its logs with: docker compose logs {primary}"),
            "Check the last response above, fix the cause, then redeploy.".to_string(),
        ],
    }
}

/// Render the verdict as pretty-printed JSON for machine consumers.
pub fn render_json(verdict: &DeploymentVerdict) -> serde_json::Result<String> {
    serde_json::to_string_pretty(verdict)
}
