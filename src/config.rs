//! Per-invocation settings
//!
//! Built once from the command line and passed by reference into the
//! loader and the controller.

use std::path::PathBuf;
use std::time::Duration;

/// Default local work directory
pub const DEFAULT_WORKDIR: &str = "./";

/// Default work directory destination inside a node
pub const DEFAULT_NODEDIR: &str = "/workdir";

/// Default service highlighted after `up`
pub const DEFAULT_SERVICE: &str = "dashboard.kube-system";

/// Default node image
pub const DEFAULT_IMAGE: &str = "kindest/node:v1.29.2";

/// Default runtime binary
pub const DEFAULT_RUNTIME: &str = "docker";

/// Default timeout for a single runtime call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default timeout for pulling a node image
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Settings for one command invocation
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base directory for relative application work directories
    pub workdir: PathBuf,
    /// Base directory inside the node for relative node directories
    pub nodedir: PathBuf,
    /// Manifest file or directory
    pub manifests: PathBuf,
    /// Service to highlight after `up` (`service` or `service.namespace`)
    pub service: String,
    /// Image used when an application does not name one
    pub image: String,
    /// Runtime binary
    pub runtime: String,
    /// Upper bound on concurrent runtime calls
    pub parallelism: usize,
    /// Timeout for a single runtime call
    pub timeout: Duration,
    /// Timeout for pulling a node image
    pub pull_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from(DEFAULT_WORKDIR),
            nodedir: PathBuf::from(DEFAULT_NODEDIR),
            manifests: PathBuf::from("."),
            service: DEFAULT_SERVICE.to_string(),
            image: DEFAULT_IMAGE.to_string(),
            runtime: DEFAULT_RUNTIME.to_string(),
            parallelism: num_cpus::get(),
            timeout: DEFAULT_TIMEOUT,
            pull_timeout: DEFAULT_PULL_TIMEOUT,
        }
    }
}

impl Settings {
    /// Set the manifest path
    pub fn manifests(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifests = path.into();
        self
    }

    /// Set the workdir base
    pub fn workdir(mut self, path: impl Into<PathBuf>) -> Self {
        self.workdir = path.into();
        self
    }

    /// Set the nodedir base
    pub fn nodedir(mut self, path: impl Into<PathBuf>) -> Self {
        self.nodedir = path.into();
        self
    }

    /// Set the worker pool size; zero falls back to the CPU count
    pub fn parallelism(mut self, workers: usize) -> Self {
        self.parallelism = if workers == 0 { num_cpus::get() } else { workers };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.workdir, PathBuf::from("./"));
        assert_eq!(settings.nodedir, PathBuf::from("/workdir"));
        assert_eq!(settings.service, "dashboard.kube-system");
        assert!(settings.parallelism >= 1);
    }

    #[test]
    fn test_zero_parallelism_uses_cpu_count() {
        let settings = Settings::default().parallelism(0);
        assert_eq!(settings.parallelism, num_cpus::get());

        let settings = Settings::default().parallelism(3);
        assert_eq!(settings.parallelism, 3);
    }
}
