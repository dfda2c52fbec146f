//! Writes a starter configuration file.

use std::path::Path;

use serde_json::json;
use tracing::info;

use cronmesh_config::CronMeshConfig;
use cronmesh_types::Response;

pub fn init(path: &Path, force: bool) -> anyhow::Result<Response> {
    if path.exists() && !force {
        anyhow::bail!(
            "config already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    let config = CronMeshConfig::default();
    cronmesh_config::save_config_to(&config, path)?;
    info!(path = %path.display(), "config written");
    Ok(Response::ok(json!({ "path": path, "config": config })))
}
