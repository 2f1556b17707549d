//! Prometheus text exposition format.
//!
//! Renders a [`ReleaseSnapshot`] into the Prometheus text exposition format
//! for scraping by a Prometheus server or compatible agent.

use crate::snapshot::ReleaseSnapshot;

/// Render a release snapshot into Prometheus text format.
///
/// Produces GAUGE metrics labelled by `namespace` and COUNTER metrics for
/// smoke probes and failed rollbacks.
pub fn render_prometheus(snapshot: &ReleaseSnapshot) -> String {
    let mut out = String::new();

    out.push_str("# HELP launchpad_executions Deployment executions by current state.\n");
    out.push_str("# TYPE launchpad_executions gauge\n");
    for ((namespace, state), count) in &snapshot.executions {
        out.push_str(&format!(
            "launchpad_executions{{namespace=\"{}\",state=\"{}\"}} {}\n",
            escape(namespace),
            state,
            count
        ));
    }

    out.push_str("# HELP launchpad_executions_in_flight Executions not yet in a terminal state.\n");
    out.push_str("# TYPE launchpad_executions_in_flight gauge\n");
    out.push_str(&format!(
        "launchpad_executions_in_flight {}\n",
        snapshot.in_flight()
    ));

    out.push_str("# HELP launchpad_smoke_results_total Smoke probe results by outcome.\n");
    out.push_str("# TYPE launchpad_smoke_results_total counter\n");
    for ((test, passed), count) in &snapshot.smoke_results {
        let result = if *passed { "pass" } else { "fail" };
        out.push_str(&format!(
            "launchpad_smoke_results_total{{test=\"{}\",result=\"{}\"}} {}\n",
            escape(test),
            result,
            count
        ));
    }

    out.push_str(
        "# HELP launchpad_rollback_failures_total Rollbacks that left a namespace unrestored.\n",
    );
    out.push_str("# TYPE launchpad_rollback_failures_total counter\n");
    for (namespace, count) in &snapshot.rollback_failures {
        out.push_str(&format!(
            "launchpad_rollback_failures_total{{namespace=\"{}\"}} {}\n",
            escape(namespace),
            count
        ));
    }

    out.push_str("# HELP launchpad_live_version Version currently serving each namespace.\n");
    out.push_str("# TYPE launchpad_live_version gauge\n");
    for live in &snapshot.live_versions {
        out.push_str(&format!(
            "launchpad_live_version{{namespace=\"{}\",version=\"{}\",artifact=\"{}\"}} 1\n",
            escape(&live.namespace),
            escape(&live.version.id),
            escape(&live.version.artifact_id)
        ));
    }

    out
}

/// Label values may not contain raw backslashes, quotes or newlines.
fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use launchpad_core::VersionHandle;
    use launchpad_state::{ExecutionState, LiveVersion};

    use super::*;

    fn test_snapshot() -> ReleaseSnapshot {
        let mut executions = BTreeMap::new();
        executions.insert(("prod".to_string(), ExecutionState::Completed), 3);
        executions.insert(("prod".to_string(), ExecutionState::SmokeTesting), 1);
        let mut smoke_results = BTreeMap::new();
        smoke_results.insert(("health".to_string(), true), 4);
        smoke_results.insert(("inference".to_string(), false), 1);
        let mut rollback_failures = BTreeMap::new();
        rollback_failures.insert("prod".to_string(), 2);
        ReleaseSnapshot {
            executions,
            smoke_results,
            rollback_failures,
            live_versions: vec![LiveVersion {
                namespace: "prod".to_string(),
                version: VersionHandle {
                    id: "prod-clf-2-1".to_string(),
                    artifact_id: "clf-2".to_string(),
                    namespace: "prod".to_string(),
                    endpoint: "127.0.0.1:8500".to_string(),
                },
                execution_id: "e1".to_string(),
                promoted_at: 1000,
            }],
        }
    }

    #[test]
    fn render_empty() {
        let output = render_prometheus(&ReleaseSnapshot::default());
        // Should still have type declarations.
        assert!(output.contains("# HELP launchpad_executions "));
        assert!(output.contains("# TYPE launchpad_executions gauge"));
        assert!(output.contains("launchpad_executions_in_flight 0"));
    }

    #[test]
    fn render_snapshot() {
        let output = render_prometheus(&test_snapshot());

        assert!(output.contains("launchpad_executions{namespace=\"prod\",state=\"completed\"} 3"));
        assert!(output.contains("launchpad_executions{namespace=\"prod\",state=\"smoke_testing\"} 1"));
        assert!(output.contains("launchpad_executions_in_flight 1"));
        assert!(output.contains("launchpad_smoke_results_total{test=\"health\",result=\"pass\"} 4"));
        assert!(output.contains("launchpad_smoke_results_total{test=\"inference\",result=\"fail\"} 1"));
        assert!(output.contains("launchpad_rollback_failures_total{namespace=\"prod\"} 2"));
        assert!(output.contains(
            "launchpad_live_version{namespace=\"prod\",version=\"prod-clf-2-1\",artifact=\"clf-2\"} 1"
        ));
    }

    #[test]
    fn label_values_are_escaped() {
        assert_eq!(escape("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
    }

    #[test]
    fn render_format_is_prometheus_compatible() {
        let output = render_prometheus(&test_snapshot());

        // Every sample line is `name{labels} value` or `name value`.
        for line in output.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let value = line.rsplit(' ').next().unwrap();
            assert!(value.parse::<f64>().is_ok(), "bad value in line: {line}");
            if line.contains('{') {
                assert!(line.contains('}'), "unbalanced labels: {line}");
            }
        }
    }
}
