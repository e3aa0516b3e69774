use std::path::Path;

use serde_json::json;
use stepledger::archive::ArchiveFormat;
use stepledger::config::WorkflowConfig;
use stepledger::evidence::{
    EVIDENCE_API_VERSION, EVIDENCE_KIND, gather_evidence, gather_from_documents,
    run_generate_evidence_step,
};
use stepledger::results::{StepResult, WorkflowResult};
use stepledger::upload::{UploadError, Uploader};
use tempfile::tempdir;

fn test_config() -> WorkflowConfig {
    WorkflowConfig {
        organization: "test-ORG".to_string(),
        application_name: "test-APP".to_string(),
        service_name: "test-SERVICE".to_string(),
        version: "42.0-test".to_string(),
        archive_format: ArchiveFormat::Zip,
        archive_ignored_artifacts: Vec::new(),
        evidence_destination_url: None,
        evidence_destination_username: None,
        evidence_destination_password: None,
        transparency: None,
    }
}

struct OkUploader;

impl Uploader for OkUploader {
    fn upload(
        &self,
        _file_path: &Path,
        _destination_uri: &str,
        _username: Option<&str>,
        _password: Option<&str>,
    ) -> Result<String, UploadError> {
        Ok("upload accepted".to_string())
    }
}

struct FailingUploader;

impl Uploader for FailingUploader {
    fn upload(
        &self,
        _file_path: &Path,
        destination_uri: &str,
        _username: Option<&str>,
        _password: Option<&str>,
    ) -> Result<String, UploadError> {
        Err(UploadError::Transfer {
            uri: destination_uri.to_string(),
            reason: "connection refused".to_string(),
        })
    }
}

fn workflow_with_evidence() -> WorkflowResult {
    let mut step_result = StepResult::new("test-step", "test-sub-step", "test-implementer");
    step_result
        .add_evidence("test-evidence", "test-value", "test-description")
        .unwrap();
    step_result
        .add_evidence("test-evidence2", "test-value2", "test-description2")
        .unwrap();

    let mut workflow = WorkflowResult::new();
    workflow.add_step_result(step_result);
    workflow
}

#[test]
fn no_evidence_yields_absent_result() {
    let mut workflow = WorkflowResult::new();
    let mut step_result = StepResult::new("build", "Maven", "Maven");
    step_result.add_artifact("version", "1.0", "").unwrap();
    workflow.add_step_result(step_result);

    assert_eq!(gather_evidence(&workflow), None);
}

#[test]
fn gathered_evidence_is_nested_under_attestations() {
    let workflow = workflow_with_evidence();
    let evidence = gather_evidence(&workflow).expect("evidence should be gathered");

    assert_eq!(evidence["apiVersion"], EVIDENCE_API_VERSION);
    assert_eq!(evidence["kind"], EVIDENCE_KIND);

    let attestations = &evidence["workflow"]["test-step"]["test-sub-step"]["attestations"];
    assert_eq!(attestations["test-evidence"]["value"], "test-value");
    assert_eq!(attestations["test-evidence2"]["value"], "test-value2");
}

#[test]
fn sub_steps_of_the_same_step_accumulate() {
    let mut workflow = WorkflowResult::new();

    let mut first = StepResult::new("scan", "OpenSCAP", "OpenSCAP");
    first.add_evidence("compliance", "passed", "").unwrap();
    workflow.add_step_result(first);

    let mut second = StepResult::new("scan", "Clair", "Clair");
    second.add_evidence("vulnerabilities", "none", "").unwrap();
    workflow.add_step_result(second);

    let evidence = gather_evidence(&workflow).unwrap();
    let scan = &evidence["workflow"]["scan"];
    assert!(scan["OpenSCAP"]["attestations"]["compliance"].is_object());
    assert!(scan["Clair"]["attestations"]["vulnerabilities"].is_object());
}

// Pins the known sharp edge: within a sub-step the last evidence item with a
// duplicate name wins, and items without a name are dropped.
#[test]
fn duplicate_evidence_names_last_item_wins() {
    let documents = vec![json!({
        "scan": {
            "OpenSCAP": {
                "success": true,
                "message": "",
                "artifacts": [],
                "evidence": [
                    {"name": "report", "value": "first", "description": ""},
                    {"value": "nameless", "description": "dropped"},
                    {"name": "report", "value": "second", "description": ""}
                ]
            }
        }
    })];

    let evidence = gather_from_documents(&documents).unwrap();
    let attestations = &evidence["workflow"]["scan"]["OpenSCAP"]["attestations"];
    assert_eq!(attestations["report"]["value"], "second");
    assert_eq!(attestations.as_object().unwrap().len(), 1);
}

#[test]
fn evidence_step_without_evidence_is_a_successful_outcome() {
    let temp = tempdir().unwrap();
    let config = test_config();
    let workflow = WorkflowResult::new();

    let step_result =
        run_generate_evidence_step(&config, &workflow, temp.path(), &OkUploader).unwrap();

    assert!(step_result.success);
    assert_eq!(
        step_result.message,
        "No evidence generated from previously run steps"
    );
    assert_eq!(
        step_result
            .get_artifact_value("result-generate-evidence")
            .and_then(|value| value.as_str()),
        Some("No evidence to generate.")
    );
    // no file written for the absent outcome
    assert!(
        !temp
            .path()
            .join("test-ORG-test-APP-test-SERVICE-42.0-test-evidence.json")
            .exists()
    );
}

#[test]
fn evidence_step_writes_the_deterministically_named_file() {
    let temp = tempdir().unwrap();
    let config = test_config();
    let workflow = workflow_with_evidence();

    let step_result =
        run_generate_evidence_step(&config, &workflow, temp.path(), &OkUploader).unwrap();

    assert!(step_result.success);
    assert_eq!(
        step_result.message,
        "Evidence successfully packaged in JSON file."
    );

    let evidence_path = temp
        .path()
        .join("test-ORG-test-APP-test-SERVICE-42.0-test-evidence.json");
    assert!(evidence_path.exists());
    assert_eq!(
        step_result
            .get_artifact_value("result-generate-evidence-path")
            .and_then(|value| value.as_str()),
        Some(evidence_path.to_string_lossy().as_ref())
    );

    let content = std::fs::read_to_string(&evidence_path).unwrap();
    assert!(content.contains("    \"apiVersion\": \"automated-governance/v1alpha1\""));
    let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(parsed["kind"], EVIDENCE_KIND);
}

#[test]
fn evidence_step_records_upload_results() {
    let temp = tempdir().unwrap();
    let mut config = test_config();
    config.evidence_destination_url = Some("https://evidence.example.org/store".to_string());
    let workflow = workflow_with_evidence();

    let step_result =
        run_generate_evidence_step(&config, &workflow, temp.path(), &OkUploader).unwrap();

    assert!(step_result.success);
    assert_eq!(
        step_result.message,
        "Evidence successfully packaged in JSON file and uploaded to data store."
    );
    assert_eq!(
        step_result
            .get_artifact_value("results-evidence-upload-results")
            .and_then(|value| value.as_str()),
        Some("upload accepted")
    );
    assert_eq!(
        step_result
            .get_artifact_value("evidence-uri")
            .and_then(|value| value.as_str()),
        Some(
            "https://evidence.example.org/store/test-ORG/test-APP/test-SERVICE/\
             test-ORG-test-APP-test-SERVICE-42.0-test-evidence.json"
        )
    );
}

#[test]
fn upload_failure_fails_the_step_without_retry() {
    let temp = tempdir().unwrap();
    let mut config = test_config();
    config.evidence_destination_url = Some("https://evidence.example.org/store".to_string());
    let workflow = workflow_with_evidence();

    let step_result =
        run_generate_evidence_step(&config, &workflow, temp.path(), &FailingUploader).unwrap();

    assert!(!step_result.success);
    assert!(step_result.message.contains("connection refused"));
    assert!(step_result.get_artifact_value("evidence-uri").is_none());
}
