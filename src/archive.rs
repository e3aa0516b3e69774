use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;

use crate::config::WorkflowConfig;
use crate::jsonio::to_json_indented;
use crate::results::{Artifact, StepResult, WorkflowResult};
use crate::values::ArtifactValue;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArchiveError {
    #[error("unsupported archive format '{0}': expected zip, tar or tar.gz")]
    UnsupportedFormat(String),
}

/// Archive container format. An unrecognized configuration value is a
/// configuration error, surfaced before any artifact is staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveFormat {
    #[serde(rename = "zip")]
    Zip,
    #[serde(rename = "tar")]
    Tar,
    #[serde(rename = "tar.gz")]
    TarGz,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::TarGz => "tar.gz",
        }
    }
}

impl FromStr for ArchiveFormat {
    type Err = ArchiveError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "zip" => Ok(ArchiveFormat::Zip),
            "tar" => Ok(ArchiveFormat::Tar),
            "tar.gz" | "targz" | "gztar" => Ok(ArchiveFormat::TarGz),
            other => Err(ArchiveError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Stage every non-ignored artifact of every step result into a directory
/// tree under `working_dir` and compress it into a single archive rooted at
/// `archive_name`. Returns `None` when no artifact was staged; absence is not
/// an error.
pub fn build_archive(
    workflow: &WorkflowResult,
    ignored_artifact_names: &[String],
    format: ArchiveFormat,
    archive_name: &str,
    working_dir: &Path,
) -> Result<Option<PathBuf>> {
    let staging_root = working_dir.join(archive_name);
    if staging_root.exists() {
        fs::remove_dir_all(&staging_root).with_context(|| {
            format!(
                "Failed to clear stale staging directory: {}",
                staging_root.display()
            )
        })?;
    }

    let mut staged = false;
    for step_result in workflow.workflow_list() {
        let sub_step_dir = staging_root.join(step_dir(step_result));
        for artifact in step_result.artifacts().values() {
            if ignored_artifact_names.iter().any(|name| name == &artifact.name) {
                debug!(artifact = artifact.name.as_str(), "Skipping ignored artifact");
                continue;
            }
            stage_artifact(&sub_step_dir, artifact)?;
            staged = true;
        }
    }

    if !staged {
        return Ok(None);
    }

    let archive_path = working_dir.join(format!("{archive_name}.{}", format.extension()));
    compress(&staging_root, archive_name, format, &archive_path)?;
    info!(archive = %archive_path.display(), "Result artifacts archive written");
    Ok(Some(archive_path))
}

fn step_dir(step_result: &StepResult) -> PathBuf {
    let mut dir = PathBuf::from(step_result.step_name()).join(step_result.sub_step_name());
    if let Some(environment) = step_result.environment() {
        dir.push(environment);
    }
    dir
}

fn stage_artifact(sub_step_dir: &Path, artifact: &Artifact) -> Result<()> {
    // The name becomes a path segment inside the staging tree; anything that
    // could traverse out of it is rejected.
    if !is_plain_path_segment(&artifact.name) {
        bail!(
            "Artifact name is not usable as a path segment: '{}'",
            artifact.name
        );
    }

    // A string value naming an existing path is archived as the file(s) at
    // that path, under a directory named after the artifact. Anything else is
    // rendered into a file named after the artifact.
    if let Some(text) = artifact.value.as_str() {
        let source = Path::new(text);
        if source.is_file() {
            let dest_dir = sub_step_dir.join(&artifact.name);
            fs::create_dir_all(&dest_dir)
                .with_context(|| format!("Failed to create directory: {}", dest_dir.display()))?;
            let file_name = source
                .file_name()
                .with_context(|| format!("Artifact path has no file name: {}", source.display()))?;
            fs::copy(source, dest_dir.join(file_name)).with_context(|| {
                format!("Failed to copy artifact file: {}", source.display())
            })?;
            return Ok(());
        }
        if source.is_dir() {
            let dest_dir = sub_step_dir.join(&artifact.name);
            let base_name = source.file_name().with_context(|| {
                format!("Artifact directory has no base name: {}", source.display())
            })?;
            copy_tree(source, &dest_dir.join(base_name))?;
            return Ok(());
        }
    }

    fs::create_dir_all(sub_step_dir)
        .with_context(|| format!("Failed to create directory: {}", sub_step_dir.display()))?;
    let content = render_artifact_value(&artifact.value)?;
    let file_path = sub_step_dir.join(&artifact.name);
    fs::write(&file_path, content)
        .with_context(|| format!("Failed to write artifact file: {}", file_path.display()))?;
    Ok(())
}

fn is_plain_path_segment(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

fn render_artifact_value(value: &ArtifactValue) -> Result<String> {
    match value {
        ArtifactValue::String(text) => Ok(text.clone()),
        ArtifactValue::Map(_) | ArtifactValue::List(_) => to_json_indented(&value.to_json()),
        ArtifactValue::Bool(flag) => Ok(flag.to_string()),
        ArtifactValue::Number(number) => Ok(number.to_string()),
    }
}

fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create directory: {}", dest.display()))?;
    let mut entries: Vec<_> = fs::read_dir(source)
        .with_context(|| format!("Failed to read directory: {}", source.display()))?
        .collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());
    for entry in entries {
        let path = entry.path();
        let target = dest.join(entry.file_name());
        if path.is_dir() {
            copy_tree(&path, &target)?;
        } else {
            fs::copy(&path, &target)
                .with_context(|| format!("Failed to copy file: {}", path.display()))?;
        }
    }
    Ok(())
}

struct ArchiveEntry {
    source: PathBuf,
    name: String,
    is_dir: bool,
}

// Sorted depth-first walk so the container's member order is identical
// across runs.
fn collect_entries(root: &Path, prefix: &str) -> Result<Vec<ArchiveEntry>> {
    let mut collected = Vec::new();
    let mut entries: Vec<_> = fs::read_dir(root)
        .with_context(|| format!("Failed to read directory: {}", root.display()))?
        .collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());
    for entry in entries {
        let path = entry.path();
        let name = format!("{prefix}/{}", entry.file_name().to_string_lossy());
        if path.is_dir() {
            collected.push(ArchiveEntry {
                source: path.clone(),
                name: name.clone(),
                is_dir: true,
            });
            collected.extend(collect_entries(&path, &name)?);
        } else {
            collected.push(ArchiveEntry {
                source: path,
                name,
                is_dir: false,
            });
        }
    }
    Ok(collected)
}

fn compress(
    staging_root: &Path,
    archive_name: &str,
    format: ArchiveFormat,
    archive_path: &Path,
) -> Result<()> {
    let entries = collect_entries(staging_root, archive_name)?;
    match format {
        ArchiveFormat::Zip => write_zip(archive_path, &entries)?,
        ArchiveFormat::Tar => {
            let file = File::create(archive_path).with_context(|| {
                format!("Failed to create archive file: {}", archive_path.display())
            })?;
            write_tar(file, &entries)?;
        }
        ArchiveFormat::TarGz => {
            let file = File::create(archive_path).with_context(|| {
                format!("Failed to create archive file: {}", archive_path.display())
            })?;
            let encoder = write_tar(GzEncoder::new(file, Compression::default()), &entries)?;
            encoder
                .finish()
                .context("Failed to finish gzip compression")?;
        }
    }
    Ok(())
}

fn write_zip(archive_path: &Path, entries: &[ArchiveEntry]) -> Result<()> {
    let file = File::create(archive_path)
        .with_context(|| format!("Failed to create archive file: {}", archive_path.display()))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    for entry in entries {
        if entry.is_dir {
            writer
                .add_directory(entry.name.as_str(), options)
                .with_context(|| format!("Failed to add archive directory: {}", entry.name))?;
        } else {
            writer
                .start_file(entry.name.as_str(), options)
                .with_context(|| format!("Failed to add archive member: {}", entry.name))?;
            let mut source = File::open(&entry.source).with_context(|| {
                format!("Failed to open staged file: {}", entry.source.display())
            })?;
            io::copy(&mut source, &mut writer)
                .with_context(|| format!("Failed to compress member: {}", entry.name))?;
        }
    }
    writer.finish().context("Failed to finish zip archive")?;
    Ok(())
}

fn write_tar<W: Write>(writer: W, entries: &[ArchiveEntry]) -> Result<W> {
    let mut builder = tar::Builder::new(writer);
    for entry in entries {
        if entry.is_dir {
            builder
                .append_dir(&entry.name, &entry.source)
                .with_context(|| format!("Failed to add archive directory: {}", entry.name))?;
        } else {
            builder
                .append_path_with_name(&entry.source, &entry.name)
                .with_context(|| format!("Failed to add archive member: {}", entry.name))?;
        }
    }
    builder.into_inner().context("Failed to finish tar archive")
}

/// Build the result artifacts archive for everything accumulated so far and
/// produce the report step's result.
pub fn run_archive_step(
    config: &WorkflowConfig,
    workflow: &WorkflowResult,
    work_dir: &Path,
) -> Result<StepResult> {
    let mut step_result =
        StepResult::new("report", "ResultArtifactsArchive", "ResultArtifactsArchive");

    let archive = build_archive(
        workflow,
        &config.archive_ignored_artifacts,
        config.archive_format,
        &config.archive_name(),
        work_dir,
    )?;

    let value: ArtifactValue = match archive {
        Some(path) => path.to_string_lossy().to_string().into(),
        None => "No result artifact values to archive.".into(),
    };
    step_result.add_artifact(
        "result-artifacts-archive",
        value,
        "Archive of all of the step result artifacts marked for archiving.",
    )?;

    Ok(step_result)
}
