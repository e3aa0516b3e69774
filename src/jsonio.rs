use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tempfile::NamedTempFile;

/// Serialize a value as UTF-8 JSON indented with four spaces, the indentation
/// used by every document this tool persists.
pub fn to_json_indented<T: Serialize>(value: &T) -> Result<String> {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    value
        .serialize(&mut serializer)
        .context("Failed to serialize document as JSON")?;
    String::from_utf8(buffer).context("Serialized JSON was not valid UTF-8")
}

/// Write a JSON document atomically: the full document is staged in a
/// temporary file next to the destination and renamed into place, so a
/// partially written file is never observable.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let content = to_json_indented(value)?;
    let staging_dir = parent.unwrap_or_else(|| Path::new("."));
    let temp = NamedTempFile::new_in(staging_dir)
        .with_context(|| format!("Failed to stage JSON file in {}", staging_dir.display()))?;
    std::fs::write(temp.path(), content)
        .with_context(|| format!("Failed to write staged JSON for {}", path.display()))?;
    temp.persist(path)
        .with_context(|| format!("Failed to move staged JSON into place: {}", path.display()))?;
    Ok(())
}
