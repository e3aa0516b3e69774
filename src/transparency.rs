use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::TransparencyConfig;
use crate::digest::{file_base64, file_sha256_hex};
use crate::jsonio::write_json_atomic;
use crate::merge::merged_results;
use crate::results::{StepResult, WorkflowResult};
use crate::values::ArtifactValue;

pub const ENTRY_KIND: &str = "rekord";
pub const ENTRY_API_VERSION: &str = "0.0.1";

const STEP_NAME: &str = "automated-governance";
const SUB_STEP_NAME: &str = "Rekor";

/// Produces a detached signature over a payload file. Failure is fatal to
/// the enclosing operation; there is no silent continuation without a
/// signature.
pub trait Signer {
    fn sign_detached(&self, payload: &Path, signature_out: &Path) -> Result<()>;
}

/// Detached signing through the external `gpg` program.
#[derive(Debug, Clone)]
pub struct GpgSigner {
    user: String,
}

impl GpgSigner {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }
}

impl Signer for GpgSigner {
    fn sign_detached(&self, payload: &Path, signature_out: &Path) -> Result<()> {
        let output = Command::new("gpg")
            .args(["--armor", "-u", &self.user, "--output"])
            .arg(signature_out)
            .arg("--detach-sign")
            .arg(payload)
            .output()
            .context("Failed to run gpg")?;
        if !output.status.success() {
            bail!(
                "gpg detached signing failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Append-only transparency log collaborator. Returns the service's free-text
/// response to an entry submission.
pub trait TransparencyLog {
    fn submit(&self, entry_path: &Path) -> Result<String>;
}

/// Entry submission through the external `rekor` CLI.
#[derive(Debug, Clone)]
pub struct RekorCli {
    server: String,
}

impl RekorCli {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
        }
    }
}

impl TransparencyLog for RekorCli {
    fn submit(&self, entry_path: &Path) -> Result<String> {
        let output = Command::new("rekor")
            .args(["upload", "--rekor_server", &self.server, "--entry"])
            .arg(entry_path)
            .output()
            .context("Failed to run rekor")?;
        if !output.status.success() {
            bail!(
                "rekor upload failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransparencyEntry {
    pub kind: String,
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub spec: EntrySpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySpec {
    pub signature: SignatureSpec,
    pub data: DataSpec,
    #[serde(rename = "extraData")]
    pub extra_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureSpec {
    pub format: String,
    pub content: String,
    #[serde(rename = "publicKey")]
    pub public_key: PublicKeySpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeySpec {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSpec {
    pub content: String,
    pub hash: HashSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashSpec {
    pub algorithm: String,
    pub value: String,
}

/// Hash the payload, obtain a detached signature over it, and assemble the
/// signed, hash-addressed entry. `data.content` and `spec.extraData` are
/// base64 projections of the exact bytes that were hashed.
pub fn create_entry(
    payload: &Path,
    public_key_path: &Path,
    signer: &dyn Signer,
) -> Result<TransparencyEntry> {
    let hash = file_sha256_hex(payload)?;

    let signature_path = signature_path_for(payload);
    if signature_path.exists() {
        std::fs::remove_file(&signature_path).with_context(|| {
            format!(
                "Failed to remove stale signature: {}",
                signature_path.display()
            )
        })?;
    }
    signer.sign_detached(payload, &signature_path)?;

    let payload_base64 = file_base64(payload)?;
    let entry = TransparencyEntry {
        kind: ENTRY_KIND.to_string(),
        api_version: ENTRY_API_VERSION.to_string(),
        spec: EntrySpec {
            signature: SignatureSpec {
                format: "pgp".to_string(),
                content: file_base64(&signature_path)?,
                public_key: PublicKeySpec {
                    content: file_base64(public_key_path)?,
                },
            },
            data: DataSpec {
                content: payload_base64.clone(),
                hash: HashSpec {
                    algorithm: "sha256".to_string(),
                    value: hash,
                },
            },
            extra_data: payload_base64,
        },
    };
    Ok(entry)
}

fn signature_path_for(payload: &Path) -> PathBuf {
    let mut os_string = payload.as_os_str().to_owned();
    os_string.push(".asc");
    PathBuf::from(os_string)
}

/// Extract the log identifier from the collaborator's free-text response:
/// the final `/`-delimited segment, trimmed. The collaborator defines no
/// stable contract for this text, so the parse is intentionally loose.
pub fn parse_log_identifier(response: &str) -> String {
    response
        .rsplit('/')
        .next()
        .unwrap_or(response)
        .trim()
        .to_string()
}

/// Create the entry for `payload`, write it to `entry.json` under `work_dir`
/// and submit it. Returns the entry document together with the parsed log
/// identifier.
pub fn record(
    payload: &Path,
    public_key_path: &Path,
    signer: &dyn Signer,
    log: &dyn TransparencyLog,
    work_dir: &Path,
) -> Result<(TransparencyEntry, String)> {
    let entry = create_entry(payload, public_key_path, signer)?;
    let entry_path = work_dir.join("entry.json");
    write_json_atomic(&entry_path, &entry)?;
    debug!(entry = %entry_path.display(), "Transparency entry written");

    let response = log.submit(&entry_path)?;
    let identifier = parse_log_identifier(&response);
    info!(identifier = identifier.as_str(), "Transparency log entry recorded");
    Ok((entry, identifier))
}

/// Record the merged all-results document in the transparency log and
/// produce the automated-governance step's result. Collaborator failures
/// surface as a failed step result, not a crash.
pub fn run_transparency_step(
    transparency: &TransparencyConfig,
    workflow: &WorkflowResult,
    work_dir: &Path,
    signer: &dyn Signer,
    log: &dyn TransparencyLog,
) -> Result<StepResult> {
    let mut step_result = StepResult::new(STEP_NAME, SUB_STEP_NAME, SUB_STEP_NAME);

    let merged = merged_results(workflow)?;
    let payload_path = work_dir.join(format!("{STEP_NAME}.json"));
    write_json_atomic(&payload_path, &merged)?;

    match record(
        &payload_path,
        &transparency.gpg_key,
        signer,
        log,
        work_dir,
    ) {
        Ok((entry, identifier)) => {
            let entry_value = serde_json::to_value(&entry)
                .context("Failed to project transparency entry as JSON")?;
            let entry_value = ArtifactValue::from_json(&entry_value)
                .context("Transparency entry projected to an empty value")?;
            step_result.add_artifact(
                "transparency-entry",
                entry_value,
                "Signed, hash-addressed transparency log entry.",
            )?;
            step_result.add_artifact(
                "transparency-log-uuid",
                identifier,
                "Identifier returned by the transparency log service.",
            )?;
            step_result.message =
                "Workflow results recorded in the transparency log.".to_string();
        }
        Err(error) => {
            step_result.success = false;
            step_result.message = format!("{error:#}");
        }
    }

    Ok(step_result)
}
