//! Cluster manifest loader

use super::config::{ApplicationSpec, ClusterManifest, ManifestFile, RawApplication, DEFAULT_NAMESPACE};
use crate::config::Settings;
use crate::error::ValidationError;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Default manifest file names
pub const DEFAULT_MANIFEST_FILES: &[&str] = &["cluster-compose.yml", "cluster-compose.yaml"];

/// Allowed characters for application names
pub const NAME_PATTERN: &str = r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$";

/// Allowed characters for namespaces; no dots, so node ids stay unambiguous
pub const NAMESPACE_PATTERN: &str = r"^[a-zA-Z0-9][a-zA-Z0-9_-]*$";

/// Loads and validates cluster manifests
pub struct ManifestLoader<'a> {
    settings: &'a Settings,
}

impl<'a> ManifestLoader<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Find the manifest file in a directory
    pub fn find_manifest_file(dir: &Path) -> Option<PathBuf> {
        DEFAULT_MANIFEST_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    /// Manifest files behind `path`
    ///
    /// A file is returned as is. A directory holding `cluster-compose.yml`
    /// (or `.yaml`) yields only that file; any other directory yields every
    /// `*.yml`/`*.yaml` file directly inside it, sorted by file name.
    pub fn manifest_files(path: &Path) -> Result<Vec<PathBuf>, ValidationError> {
        if path.is_file() {
            return Ok(vec![path.to_path_buf()]);
        }

        if !path.is_dir() {
            return Err(ValidationError::single(
                path.display().to_string(),
                "manifest path does not exist",
            ));
        }

        if let Some(file) = Self::find_manifest_file(path) {
            return Ok(vec![file]);
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(path).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                ValidationError::single(path.display().to_string(), format!("cannot read directory: {}", e))
            })?;
            let is_yaml = entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext == "yml" || ext == "yaml")
                .unwrap_or(false);
            if entry.file_type().is_file() && is_yaml {
                files.push(entry.into_path());
            }
        }

        if files.is_empty() {
            return Err(ValidationError::single(
                path.display().to_string(),
                format!(
                    "no manifest found (expected {} or a directory of *.yml files)",
                    DEFAULT_MANIFEST_FILES.join(" or ")
                ),
            ));
        }

        Ok(files)
    }

    /// Load and validate the manifest at `path`
    ///
    /// Nothing is returned unless every file decodes and every application
    /// validates; all problems are reported at once.
    pub fn load(&self, path: &Path) -> Result<ClusterManifest, ValidationError> {
        let files = Self::manifest_files(path)?;
        let mut errors = ValidationError::new();
        let mut entries = Vec::new();

        for file in &files {
            let source = file.display().to_string();
            let content = match std::fs::read_to_string(file) {
                Ok(content) => content,
                Err(e) => {
                    errors.push(source, format!("failed to read file: {}", e));
                    continue;
                }
            };

            match Self::decode(&content) {
                Ok(parsed) => {
                    for (idx, raw) in parsed.applications.into_iter().enumerate() {
                        entries.push((format!("{}: applications[{}]", source, idx), raw));
                    }
                }
                Err(message) => errors.push(source, message),
            }
        }

        let manifest = self.validate(entries, errors)?;
        tracing::debug!(
            "Loaded {} application(s) from {} file(s)",
            manifest.len(),
            files.len()
        );
        Ok(manifest.with_sources(files))
    }

    /// Parse and validate a manifest from a string
    pub fn parse_str(&self, content: &str) -> Result<ClusterManifest, ValidationError> {
        let parsed = Self::decode(content).map_err(|m| ValidationError::single("manifest", m))?;
        let entries = parsed
            .applications
            .into_iter()
            .enumerate()
            .map(|(idx, raw)| (format!("applications[{}]", idx), raw))
            .collect();
        self.validate(entries, ValidationError::new())
    }

    fn decode(content: &str) -> Result<ManifestFile, String> {
        if content.trim().is_empty() {
            return Ok(ManifestFile::default());
        }
        serde_yaml::from_str(content).map_err(|e| format!("failed to parse YAML: {}", e))
    }

    /// Validate raw entries, appending to `errors`
    fn validate(
        &self,
        entries: Vec<(String, RawApplication)>,
        mut errors: ValidationError,
    ) -> Result<ClusterManifest, ValidationError> {
        let name_re = Regex::new(NAME_PATTERN)
            .map_err(|e| ValidationError::single("internal", e.to_string()))?;
        let namespace_re = Regex::new(NAMESPACE_PATTERN)
            .map_err(|e| ValidationError::single("internal", e.to_string()))?;
        let mut first_seen: HashMap<String, String> = HashMap::new();
        let mut applications = Vec::with_capacity(entries.len());

        for (location, raw) in entries {
            let at = |field: &str| format!("{}.{}", location, field);

            for key in raw.unknown.keys() {
                errors.push(at(key), "unknown field");
            }

            let name = raw.name.unwrap_or_default().trim().to_string();
            if name.is_empty() {
                errors.push(at("name"), "must not be empty");
            } else if !name_re.is_match(&name) {
                errors.push(at("name"), format!("'{}' must match {}", name, NAME_PATTERN));
            } else if let Some(previous) = first_seen.get(&name) {
                errors.push(
                    at("name"),
                    format!("duplicate application name '{}' (first declared at {})", name, previous),
                );
            } else {
                first_seen.insert(name.clone(), location.clone());
            }

            let namespace = raw
                .namespace
                .map(|ns| ns.trim().to_string())
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
            if !namespace_re.is_match(&namespace) {
                errors.push(at("namespace"), format!("'{}' must match {}", namespace, NAMESPACE_PATTERN));
            }

            let workdir = match raw.workdir {
                Some(dir) if dir.trim().is_empty() => {
                    errors.push(at("workdir"), "must not be empty");
                    None
                }
                Some(dir) if dir.contains('\0') => {
                    errors.push(at("workdir"), "must not contain NUL bytes");
                    None
                }
                Some(dir) => Some(self.settings.workdir.join(dir)),
                None => Some(self.settings.workdir.clone()),
            };

            let nodedir = match raw.nodedir {
                Some(dir) if dir.contains('\0') => {
                    errors.push(at("nodedir"), "must not contain NUL bytes");
                    None
                }
                Some(dir) if !dir.trim().is_empty() => Some(self.settings.nodedir.join(dir.trim())),
                _ => Some(self.settings.nodedir.clone()),
            };
            let nodedir = nodedir.filter(|dir| {
                let absolute = dir.to_string_lossy().starts_with('/');
                if !absolute {
                    errors.push(at("nodedir"), format!("'{}' must be an absolute path", dir.display()));
                }
                absolute
            });

            let port = match raw.port.as_ref() {
                Some(value) => match parse_port(value) {
                    Ok(port) => Some(port),
                    Err(message) => {
                        errors.push(at("port"), message);
                        None
                    }
                },
                None => {
                    errors.push(at("port"), "is required");
                    None
                }
            };

            let host_port = match raw.host_port.as_ref().map(parse_port) {
                Some(Ok(port)) => Some(port),
                Some(Err(message)) => {
                    errors.push(at("host_port"), message);
                    None
                }
                None => port,
            };

            let image = raw
                .image
                .map(|i| i.trim().to_string())
                .unwrap_or_else(|| self.settings.image.clone());
            if image.is_empty() {
                errors.push(at("image"), "must not be empty");
            }

            let service = raw
                .service
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| name.clone());

            if let (Some(workdir), Some(nodedir), Some(port), Some(host_port)) =
                (workdir, nodedir, port, host_port)
            {
                applications.push(ApplicationSpec {
                    name,
                    namespace,
                    workdir,
                    nodedir,
                    service,
                    port,
                    host_port,
                    image,
                });
            }
        }

        errors.into_result()?;
        ClusterManifest::new(applications)
    }
}

/// Parse a port from a YAML scalar
///
/// Integers and integer strings in 1-65535 are accepted.
pub fn parse_port(value: &serde_yaml::Value) -> Result<u16, String> {
    let parsed = match value {
        serde_yaml::Value::Number(n) => n.as_u64(),
        serde_yaml::Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    match parsed {
        Some(port) if (1..=65535).contains(&port) => Ok(port as u16),
        Some(port) => Err(format!("{} is outside 1-65535", port)),
        None => Err(format!("expected an integer between 1 and 65535, got {}", describe(value))),
    }
}

fn describe(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => format!("\"{}\"", s),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        _ => "a non-scalar value".to_string(),
    }
}
