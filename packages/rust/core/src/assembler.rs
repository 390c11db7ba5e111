//! Output directory assembler.
//!
//! Writes `report.json` and `metadata.json` under the output directory. Each
//! file is written to a temp file and renamed into place; the report checksum
//! is recorded in the metadata record.

use std::path::{Path, PathBuf};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use modeldoc_shared::{ArtifactChecksum, CURRENT_SCHEMA_VERSION, ModelDocError, ReportMetadata, Result};

use crate::report::{FinalReport, REQUIRED_FIELDS};

pub const REPORT_FILE: &str = "report.json";
pub const METADATA_FILE: &str = "metadata.json";

/// Paths and final metadata of a written run.
#[derive(Debug, Clone)]
pub struct WrittenOutput {
    pub out_dir: PathBuf,
    pub report_path: PathBuf,
    pub metadata_path: PathBuf,
    pub metadata: ReportMetadata,
}

/// Write the report and its metadata record.
#[instrument(skip_all, fields(out_dir = %out_dir.display()))]
pub fn write_output(out_dir: &Path, report: &FinalReport, metadata: &ReportMetadata) -> Result<WrittenOutput> {
    std::fs::create_dir_all(out_dir).map_err(|e| ModelDocError::io(out_dir, e))?;

    let report_path = out_dir.join(REPORT_FILE);
    let checksum = write_json(&report_path, report)?;

    let mut metadata = metadata.clone();
    metadata.artifacts = vec![checksum];
    let metadata_path = out_dir.join(METADATA_FILE);
    write_json(&metadata_path, &metadata)?;

    info!(
        measures = metadata.counts.measures,
        confidence = metadata.confidence,
        "report written"
    );

    Ok(WrittenOutput {
        out_dir: out_dir.to_path_buf(),
        report_path,
        metadata_path,
        metadata,
    })
}

/// Verify that an output directory holds a well-formed report.
pub fn validate_output(out_dir: &Path) -> Result<ReportMetadata> {
    let report_path = out_dir.join(REPORT_FILE);
    let metadata_path = out_dir.join(METADATA_FILE);

    if !report_path.exists() {
        return Err(ModelDocError::validation(format!("missing {REPORT_FILE}")));
    }
    if !metadata_path.exists() {
        return Err(ModelDocError::validation(format!("missing {METADATA_FILE}")));
    }

    let content =
        std::fs::read_to_string(&metadata_path).map_err(|e| ModelDocError::io(&metadata_path, e))?;
    let metadata: ReportMetadata = serde_json::from_str(&content)
        .map_err(|e| ModelDocError::validation(format!("invalid {METADATA_FILE}: {e}")))?;

    if metadata.schema_version != CURRENT_SCHEMA_VERSION {
        return Err(ModelDocError::validation(format!(
            "unsupported schemaVersion: {} (expected {})",
            metadata.schema_version, CURRENT_SCHEMA_VERSION
        )));
    }

    let bytes = std::fs::read(&report_path).map_err(|e| ModelDocError::io(&report_path, e))?;
    if let Some(recorded) = metadata.artifacts.iter().find(|a| a.filename == REPORT_FILE) {
        if recorded.sha256 != sha256_hex(&bytes) {
            return Err(ModelDocError::validation(format!("{REPORT_FILE} checksum mismatch")));
        }
    }

    let report: Value = serde_json::from_slice(&bytes)
        .map_err(|e| ModelDocError::validation(format!("invalid {REPORT_FILE}: {e}")))?;
    for key in REQUIRED_FIELDS {
        let well_formed = match report.get(key) {
            Some(Value::Object(_)) => key == "overview",
            Some(Value::Array(_)) => key != "overview",
            _ => false,
        };
        if !well_formed {
            return Err(ModelDocError::validation(format!("{REPORT_FILE}: missing or malformed `{key}`")));
        }
    }

    let measures = report["measures"].as_array().map_or(0, Vec::len);
    if measures != metadata.counts.measures {
        return Err(ModelDocError::validation(format!(
            "{REPORT_FILE} has {measures} measures, metadata records {}",
            metadata.counts.measures
        )));
    }

    Ok(metadata)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Write a JSON file (pretty-printed) via temp file and rename.
fn write_json<T: serde::Serialize>(path: &Path, data: &T) -> Result<ArtifactChecksum> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| ModelDocError::validation(format!("JSON serialization failed: {e}")))?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{filename}.tmp"));
    std::fs::write(&temp, &json).map_err(|e| ModelDocError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| ModelDocError::io(path, e))?;

    debug!(path = %path.display(), size = json.len(), "wrote JSON file");
    Ok(ArtifactChecksum {
        sha256: sha256_hex(json.as_bytes()),
        size_bytes: json.len(),
        filename,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use modeldoc_ingest::check;
    use modeldoc_shared::{Measure, ModelData, RunId};
    use serde_json::json;

    use crate::coerce::coerce;
    use crate::context::PipelineContext;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("modeldoc-assembler-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn fixture() -> (FinalReport, ReportMetadata) {
        let model = ModelData {
            measures: vec![Measure {
                name: "Total Sales".into(),
                expression: "SUM(Sales[Amount])".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let counts = model.counts();
        let integrity = check(&model);
        let ctx = PipelineContext::new(model, integrity, None);
        let report = coerce(&json!({}), &ctx);
        let metadata = ReportMetadata {
            schema_version: CURRENT_SCHEMA_VERSION,
            run_id: RunId::new(),
            generated_at: Utc::now(),
            tool_version: "0.1.0-test".into(),
            model: "offline".into(),
            counts,
            domain: report.overview.domain.clone(),
            input_fingerprint: None,
            skipped_rows: 0,
            confidence: 0.1,
            stages: Vec::new(),
            artifacts: Vec::new(),
        };
        (report, metadata)
    }

    #[test]
    fn writes_report_and_metadata_with_checksum() {
        let tmp = temp_dir();
        let (report, metadata) = fixture();

        let written = write_output(&tmp.join("out"), &report, &metadata).unwrap();
        assert!(written.report_path.exists());
        assert!(written.metadata_path.exists());
        assert!(!tmp.join("out").join(".report.json.tmp").exists());
        assert_eq!(written.metadata.artifacts.len(), 1);
        assert_eq!(written.metadata.artifacts[0].sha256.len(), 64);

        let validated = validate_output(&written.out_dir).unwrap();
        assert_eq!(validated.counts.measures, 1);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rewrite_is_idempotent() {
        let tmp = temp_dir();
        let (report, metadata) = fixture();
        let first = write_output(&tmp, &report, &metadata).unwrap();
        let second = write_output(&tmp, &report, &metadata).unwrap();
        assert_eq!(first.metadata.artifacts, second.metadata.artifacts);
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn validate_rejects_tampered_report() {
        let tmp = temp_dir();
        let (report, metadata) = fixture();
        write_output(&tmp, &report, &metadata).unwrap();
        std::fs::write(tmp.join(REPORT_FILE), "{\"overview\": {}}").unwrap();

        let err = validate_output(&tmp).unwrap_err();
        assert!(err.to_string().contains("checksum"));
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn validate_missing_metadata() {
        let tmp = temp_dir();
        std::fs::write(tmp.join(REPORT_FILE), "{}").unwrap();
        let err = validate_output(&tmp).unwrap_err();
        assert!(err.to_string().contains(METADATA_FILE));
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
