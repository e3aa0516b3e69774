use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::jsonio::write_json_atomic;
use crate::values::ArtifactValue;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StepResultError {
    #[error("artifact name cannot be empty")]
    EmptyArtifactName,
    #[error("artifact '{0}' was already recorded for this step result")]
    DuplicateArtifact(String),
    #[error("evidence name cannot be empty")]
    EmptyEvidenceName,
}

/// A named value produced by a step, immutable once added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub value: ArtifactValue,
    #[serde(default)]
    pub description: String,
}

/// A structured attestation item collected by a step for later evidence
/// gathering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub name: String,
    pub value: ArtifactValue,
    #[serde(default)]
    pub description: String,
}

/// Outcome of one step/sub-step execution. Mutated only by the step that
/// created it; treated as immutable once appended to a [`WorkflowResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StepResult {
    step_name: String,
    sub_step_name: String,
    sub_step_implementer_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    environment: Option<String>,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    artifacts: IndexMap<String, Artifact>,
    #[serde(default)]
    evidence: IndexMap<String, EvidenceItem>,
}

fn default_success() -> bool {
    true
}

impl StepResult {
    pub fn new(
        step_name: impl Into<String>,
        sub_step_name: impl Into<String>,
        sub_step_implementer_name: impl Into<String>,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            sub_step_name: sub_step_name.into(),
            sub_step_implementer_name: sub_step_implementer_name.into(),
            environment: None,
            success: true,
            message: String::new(),
            artifacts: IndexMap::new(),
            evidence: IndexMap::new(),
        }
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn sub_step_name(&self) -> &str {
        &self.sub_step_name
    }

    pub fn sub_step_implementer_name(&self) -> &str {
        &self.sub_step_implementer_name
    }

    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    pub fn artifacts(&self) -> &IndexMap<String, Artifact> {
        &self.artifacts
    }

    pub fn evidence(&self) -> &IndexMap<String, EvidenceItem> {
        &self.evidence
    }

    /// Record an artifact. Re-adding a name is rejected rather than silently
    /// overwriting the earlier value.
    pub fn add_artifact(
        &mut self,
        name: impl Into<String>,
        value: impl Into<ArtifactValue>,
        description: impl Into<String>,
    ) -> Result<(), StepResultError> {
        let name = name.into();
        if name.is_empty() {
            return Err(StepResultError::EmptyArtifactName);
        }
        if self.artifacts.contains_key(&name) {
            return Err(StepResultError::DuplicateArtifact(name));
        }
        let artifact = Artifact {
            name: name.clone(),
            value: value.into(),
            description: description.into(),
        };
        self.artifacts.insert(name, artifact);
        Ok(())
    }

    /// Record an evidence item. A duplicate name replaces the earlier item
    /// (last write wins).
    pub fn add_evidence(
        &mut self,
        name: impl Into<String>,
        value: impl Into<ArtifactValue>,
        description: impl Into<String>,
    ) -> Result<(), StepResultError> {
        let name = name.into();
        if name.is_empty() {
            return Err(StepResultError::EmptyEvidenceName);
        }
        let item = EvidenceItem {
            name: name.clone(),
            value: value.into(),
            description: description.into(),
        };
        self.evidence.insert(name, item);
        Ok(())
    }

    pub fn get_artifact_value(&self, name: &str) -> Option<&ArtifactValue> {
        self.artifacts.get(name).map(|artifact| &artifact.value)
    }

    /// Nested document form keyed by step name and sub-step name, with
    /// artifacts and evidence projected as ordered lists.
    pub fn to_document(&self) -> Value {
        let artifacts: Vec<Value> = self
            .artifacts
            .values()
            .map(|artifact| {
                json!({
                    "name": artifact.name,
                    "value": artifact.value.to_json(),
                    "description": artifact.description,
                })
            })
            .collect();
        let evidence: Vec<Value> = self
            .evidence
            .values()
            .map(|item| {
                json!({
                    "name": item.name,
                    "value": item.value.to_json(),
                    "description": item.description,
                })
            })
            .collect();

        let mut body = Map::new();
        body.insert(
            "sub-step-implementer-name".to_string(),
            Value::String(self.sub_step_implementer_name.clone()),
        );
        if let Some(environment) = &self.environment {
            body.insert("environment".to_string(), Value::String(environment.clone()));
        }
        body.insert("success".to_string(), Value::Bool(self.success));
        body.insert("message".to_string(), Value::String(self.message.clone()));
        body.insert("artifacts".to_string(), Value::Array(artifacts));
        body.insert("evidence".to_string(), Value::Array(evidence));

        let mut sub_steps = Map::new();
        sub_steps.insert(self.sub_step_name.clone(), Value::Object(body));
        let mut document = Map::new();
        document.insert(self.step_name.clone(), Value::Object(sub_steps));
        Value::Object(document)
    }
}

/// Append-only, ordered sequence of step results accumulated across one
/// pipeline run. Insertion order is execution order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowResult {
    workflow_list: Vec<StepResult>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct WorkflowResultFile {
    generated_at: DateTime<Utc>,
    workflow: Vec<StepResult>,
}

impl WorkflowResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_step_result(&mut self, step_result: StepResult) {
        self.workflow_list.push(step_result);
    }

    pub fn workflow_list(&self) -> &[StepResult] {
        &self.workflow_list
    }

    pub fn is_empty(&self) -> bool {
        self.workflow_list.is_empty()
    }

    /// Look up an artifact value by name across all recorded step results,
    /// latest first, so a rerun step shadows earlier values.
    pub fn get_artifact_value(&self, name: &str) -> Option<&ArtifactValue> {
        self.workflow_list
            .iter()
            .rev()
            .find_map(|step_result| step_result.get_artifact_value(name))
    }

    /// Load a persisted workflow result. A missing file yields an empty
    /// result, matching the first step of a fresh run.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow result file: {}", path.display()))?;
        let file: WorkflowResultFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse workflow result file: {}", path.display()))?;
        Ok(Self {
            workflow_list: file.workflow,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = WorkflowResultFile {
            generated_at: Utc::now(),
            workflow: self.workflow_list.clone(),
        };
        write_json_atomic(path, &file)
            .with_context(|| format!("Failed to write workflow result file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_step_result() -> StepResult {
        let mut step_result = StepResult::new("build", "Maven", "Maven");
        step_result
            .add_artifact("image-tag", "registry.example.org/app:1.0", "Pushed tag")
            .unwrap();
        step_result
    }

    #[test]
    fn duplicate_artifact_is_rejected() {
        let mut step_result = sample_step_result();
        let error = step_result
            .add_artifact("image-tag", "other", "")
            .unwrap_err();
        assert_eq!(
            error,
            StepResultError::DuplicateArtifact("image-tag".to_string())
        );
        // the original value survives the rejected write
        assert_eq!(
            step_result.get_artifact_value("image-tag"),
            Some(&ArtifactValue::from("registry.example.org/app:1.0"))
        );
    }

    #[test]
    fn empty_artifact_name_is_rejected() {
        let mut step_result = sample_step_result();
        let error = step_result.add_artifact("", "value", "").unwrap_err();
        assert_eq!(error, StepResultError::EmptyArtifactName);
    }

    #[test]
    fn duplicate_evidence_last_write_wins() {
        let mut step_result = sample_step_result();
        step_result.add_evidence("sbom", "first", "").unwrap();
        step_result.add_evidence("sbom", "second", "").unwrap();
        assert_eq!(step_result.evidence().len(), 1);
        assert_eq!(
            step_result.evidence().get("sbom").map(|item| &item.value),
            Some(&ArtifactValue::from("second"))
        );
    }

    #[test]
    fn document_form_is_keyed_by_step_and_sub_step() {
        let mut step_result = sample_step_result();
        step_result.message = "done".to_string();
        let document = step_result.to_document();

        let body = &document["build"]["Maven"];
        assert_eq!(body["sub-step-implementer-name"], "Maven");
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "done");
        assert_eq!(body["artifacts"][0]["name"], "image-tag");
        assert_eq!(body["artifacts"][0]["value"], "registry.example.org/app:1.0");
        assert_eq!(body["evidence"], serde_json::json!([]));
    }

    #[test]
    fn environment_appears_in_document() {
        let step_result = StepResult::new("deploy", "ArgoCD", "ArgoCD").with_environment("prod");
        let document = step_result.to_document();
        assert_eq!(document["deploy"]["ArgoCD"]["environment"], "prod");
    }

    #[test]
    fn workflow_artifact_lookup_prefers_latest() {
        let mut workflow = WorkflowResult::new();

        let mut first = StepResult::new("build", "Maven", "Maven");
        first.add_artifact("version", "1.0", "").unwrap();
        workflow.add_step_result(first);

        let mut rerun = StepResult::new("build", "Maven", "Maven");
        rerun.add_artifact("version", "1.1", "").unwrap();
        workflow.add_step_result(rerun);

        assert_eq!(
            workflow.get_artifact_value("version"),
            Some(&ArtifactValue::from("1.1"))
        );
    }

    #[test]
    fn persistence_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("workflow-result.json");

        let mut workflow = WorkflowResult::new();
        workflow.add_step_result(sample_step_result());
        workflow.save(&path).unwrap();

        let loaded = WorkflowResult::load(&path).unwrap();
        assert_eq!(loaded, workflow);
    }

    #[test]
    fn loading_missing_file_yields_empty_result() {
        let temp = tempfile::tempdir().unwrap();
        let loaded = WorkflowResult::load(&temp.path().join("absent.json")).unwrap();
        assert!(loaded.is_empty());
    }
}
