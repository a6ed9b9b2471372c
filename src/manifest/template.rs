//! Starter manifest written by `init`

use super::parser::DEFAULT_MANIFEST_FILES;
use crate::error::{ClusterError, Result};
use std::path::{Path, PathBuf};

/// Starter manifest contents
pub const INIT_MANIFEST: &str = r#"applications:
  - name: kubernetes-dashboard
    namespace: kube-system
    workdir: dashboard
    nodedir: dashboard
    service: dashboard
    port: 80
"#;

/// Write the starter manifest into `dir`
///
/// An existing manifest is only replaced when `force` is set.
pub fn write_template(dir: &Path, force: bool) -> Result<PathBuf> {
    let path = dir.join(DEFAULT_MANIFEST_FILES[0]);

    if path.exists() && !force {
        return Err(ClusterError::Template(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }

    std::fs::write(&path, INIT_MANIFEST)?;
    tracing::info!("Wrote {}", path.display());
    Ok(path)
}
