use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use harmony_beam::{DecodeOutcome, DecoderConfig};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct LabelsMeta<'a> {
    pub source: String,
    pub generated_at: String,
    pub config: &'a DecoderConfig,
}

#[derive(Debug, Serialize)]
pub struct LabelsFile<'a> {
    pub meta: LabelsMeta<'a>,
    #[serde(flatten)]
    pub outcome: &'a DecodeOutcome,
}

pub fn write_labels(path: &Path, labels: &LabelsFile<'_>) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            format!(
                "Failed to create output directory '{}': {err}",
                parent.display()
            )
        })?;
    }

    let mut file = File::create(path)
        .map_err(|err| format!("Failed to create labels file '{}': {err}", path.display()))?;
    serde_json::to_writer_pretty(&mut file, labels).map_err(|err| {
        format!(
            "Failed to serialize labels JSON '{}': {err}",
            path.display()
        )
    })?;
    file.write_all(b"\n")
        .map_err(|err| format!("Failed to finalize labels file '{}': {err}", path.display()))?;
    Ok(())
}
