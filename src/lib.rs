pub mod archive;
pub mod config;
pub mod digest;
pub mod evidence;
pub mod jsonio;
pub mod merge;
pub mod results;
pub mod transparency;
pub mod upload;
pub mod values;

pub use results::{Artifact, EvidenceItem, StepResult, WorkflowResult};
pub use values::ArtifactValue;
