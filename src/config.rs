use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::archive::ArchiveFormat;

/// Result artifacts excluded from the archive unless the configuration says
/// otherwise. Both are large binary outputs that live elsewhere.
pub static DEFAULT_IGNORED_ARTIFACTS: Lazy<Vec<String>> = Lazy::new(|| {
    vec![
        "package-artifacts".to_string(),
        "image-tar-file".to_string(),
    ]
});

/// Workflow-level configuration, loaded from a YAML file with kebab-case
/// keys. Step ordering and per-step configuration precedence are the pipeline
/// driver's concern, not this tool's.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkflowConfig {
    pub organization: String,
    pub application_name: String,
    pub service_name: String,
    pub version: String,
    #[serde(default = "default_archive_format")]
    pub archive_format: ArchiveFormat,
    #[serde(default = "default_ignored_artifacts")]
    pub archive_ignored_artifacts: Vec<String>,
    #[serde(default)]
    pub evidence_destination_url: Option<String>,
    #[serde(default)]
    pub evidence_destination_username: Option<String>,
    #[serde(default)]
    pub evidence_destination_password: Option<String>,
    #[serde(default)]
    pub transparency: Option<TransparencyConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TransparencyConfig {
    pub rekor_server: String,
    pub gpg_user: String,
    /// Path to the public key material embedded in each entry.
    pub gpg_key: PathBuf,
}

fn default_archive_format() -> ArchiveFormat {
    ArchiveFormat::Zip
}

fn default_ignored_artifacts() -> Vec<String> {
    DEFAULT_IGNORED_ARTIFACTS.clone()
}

impl WorkflowConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config YAML: {}", path.display()))?;
        Ok(config)
    }

    /// Namespacing prefix shared by the archive and the evidence document.
    pub fn archive_name(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.organization, self.application_name, self.service_name, self.version
        )
    }

    pub fn evidence_file_name(&self) -> String {
        format!("{}-evidence.json", self.archive_name())
    }
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check the configuration before any step executes. Missing required values
/// are configuration errors; the step never runs on an invalid config.
pub fn validate_config(config: &WorkflowConfig) -> ValidationReport {
    let mut report = ValidationReport::default();

    let required = [
        ("organization", &config.organization),
        ("application-name", &config.application_name),
        ("service-name", &config.service_name),
        ("version", &config.version),
    ];
    for (key, value) in required {
        if value.trim().is_empty() {
            report.errors.push(format!("'{key}' must not be empty"));
        }
    }

    if let Some(url) = &config.evidence_destination_url {
        let supported = url.starts_with('/')
            || url.starts_with("file://")
            || url.starts_with("http://")
            || url.starts_with("https://");
        if !supported {
            report.errors.push(format!(
                "'evidence-destination-url' ('{url}') must start with /, file://, http:// or https://"
            ));
        }
    }
    if config.evidence_destination_password.is_some()
        && config.evidence_destination_username.is_none()
    {
        report
            .warnings
            .push("'evidence-destination-password' is set without a username".to_string());
    }

    if let Some(transparency) = &config.transparency {
        if transparency.rekor_server.trim().is_empty() {
            report
                .errors
                .push("'transparency.rekor-server' must not be empty".to_string());
        }
        if transparency.gpg_user.trim().is_empty() {
            report
                .errors
                .push("'transparency.gpg-user' must not be empty".to_string());
        }
        if !transparency.gpg_key.exists() {
            report.errors.push(format!(
                "'transparency.gpg-key' ('{}') does not exist",
                transparency.gpg_key.display()
            ));
        }
    }

    report
}
