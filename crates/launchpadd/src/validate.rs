//! `launchpadd validate`: run the validation gate against one artifact
//! directory without touching the state store or the cluster.

use std::path::Path;

use anyhow::Context;
use tracing::{info, warn};

use launchpad_core::{FsArtifactRegistry, ThresholdPolicy};
use launchpad_release::gate;
use launchpad_state::ValidationReport;

/// Verify the checksum of the artifact stored in `dir` and run the gate.
///
/// The directory name is the artifact id; its parent is treated as the
/// registry root.
pub async fn validate_artifact_dir(
    dir: &Path,
    policy: &ThresholdPolicy,
) -> anyhow::Result<ValidationReport> {
    let id = dir
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("{} does not name an artifact", dir.display()))?;
    let root = dir.parent().unwrap_or_else(|| Path::new("."));
    let registry = FsArtifactRegistry::new(root);

    let (report, failures) = gate::evaluate(&registry, id, policy).await;
    if report.passed {
        info!(artifact = %id, policy = %policy.version, "artifact passed validation");
    } else {
        for failure in &failures {
            warn!(artifact = %id, %failure, "validation check failed");
        }
    }
    Ok(report)
}
