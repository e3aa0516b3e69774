use std::path::Path;

use anyhow::Result;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::config::WorkflowConfig;
use crate::jsonio::write_json_atomic;
use crate::results::{StepResult, WorkflowResult};
use crate::upload::Uploader;

pub const EVIDENCE_API_VERSION: &str = "automated-governance/v1alpha1";
pub const EVIDENCE_KIND: &str = "WorkflowEvidence";

const STEP_NAME: &str = "generate-evidence";
const SUB_STEP_NAME: &str = "GenerateEvidence";

/// Scan a workflow result for steps carrying evidence and project it into a
/// normalized nested document. Returns `None` when no step collected any
/// evidence; that outcome is first-class, not an error.
pub fn gather_evidence(workflow: &WorkflowResult) -> Option<Value> {
    let documents: Vec<Value> = workflow
        .workflow_list()
        .iter()
        .map(StepResult::to_document)
        .collect();
    gather_from_documents(&documents)
}

/// Gather evidence from serialized step result documents. Within a sub-step,
/// the last evidence item with a duplicate name wins; items missing a `name`
/// field are dropped.
pub fn gather_from_documents(documents: &[Value]) -> Option<Value> {
    let mut workflow_doc = Map::new();

    for document in documents {
        let Some(steps) = document.as_object() else {
            continue;
        };
        for (step_name, sub_steps) in steps {
            let Some(sub_steps) = sub_steps.as_object() else {
                continue;
            };
            for (sub_step_name, body) in sub_steps {
                let Some(evidence) = body.get("evidence").and_then(Value::as_array) else {
                    continue;
                };
                if evidence.is_empty() {
                    continue;
                }

                let mut attestations = Map::new();
                for item in evidence {
                    let Some(name) = item.get("name").and_then(Value::as_str) else {
                        warn!(step = step_name.as_str(), "Dropping evidence item without a name");
                        continue;
                    };
                    attestations.insert(name.to_string(), item.clone());
                }

                let step_entry = workflow_doc
                    .entry(step_name.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Some(step_map) = step_entry.as_object_mut() {
                    step_map.insert(
                        sub_step_name.clone(),
                        json!({ "attestations": attestations }),
                    );
                }
            }
        }
    }

    if workflow_doc.is_empty() {
        return None;
    }
    Some(json!({
        "apiVersion": EVIDENCE_API_VERSION,
        "kind": EVIDENCE_KIND,
        "workflow": workflow_doc,
    }))
}

/// Gather evidence from all prior steps, write it to the deterministically
/// named evidence file and optionally upload it. Produces the step result for
/// the generate-evidence step.
pub fn run_generate_evidence_step(
    config: &WorkflowConfig,
    workflow: &WorkflowResult,
    work_dir: &Path,
    uploader: &dyn Uploader,
) -> Result<StepResult> {
    let mut step_result = StepResult::new(STEP_NAME, SUB_STEP_NAME, SUB_STEP_NAME);

    let Some(evidence) = gather_evidence(workflow) else {
        step_result.add_artifact(
            "result-generate-evidence",
            "No evidence to generate.",
            "Evidence from all previously run steps.",
        )?;
        step_result.message = "No evidence generated from previously run steps".to_string();
        info!("No evidence found in any previously run step");
        return Ok(step_result);
    };

    let evidence_file_name = config.evidence_file_name();
    let evidence_path = work_dir.join(&evidence_file_name);
    write_json_atomic(&evidence_path, &evidence)?;
    info!(file = %evidence_path.display(), "Evidence document written");

    let mut uploaded = false;
    if let Some(destination_url) = &config.evidence_destination_url {
        let destination_uri = format!(
            "{}/{}/{}/{}/{}",
            destination_url,
            config.organization,
            config.application_name,
            config.service_name,
            evidence_file_name
        );
        match uploader.upload(
            &evidence_path,
            &destination_uri,
            config.evidence_destination_username.as_deref(),
            config.evidence_destination_password.as_deref(),
        ) {
            Ok(upload_result) => {
                step_result.add_artifact(
                    "results-evidence-upload-results",
                    upload_result,
                    "Results of uploading the evidence JSON file to the given destination.",
                )?;
                step_result.add_artifact(
                    "evidence-uri",
                    destination_uri,
                    "URI of the uploaded evidence document.",
                )?;
                uploaded = true;
            }
            Err(error) => {
                step_result.success = false;
                step_result.message = error.to_string();
                return Ok(step_result);
            }
        }
    }

    step_result.message = if uploaded {
        "Evidence successfully packaged in JSON file and uploaded to data store.".to_string()
    } else {
        "Evidence successfully packaged in JSON file.".to_string()
    };
    step_result.add_artifact(
        "result-generate-evidence-path",
        evidence_path.to_string_lossy().to_string(),
        "File path of evidence.",
    )?;

    Ok(step_result)
}
