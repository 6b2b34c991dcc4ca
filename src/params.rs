//! Parameter-file materialization.
//!
//! Serializes a job's resolved inputs, processing parameters and output
//! targets into the tab-delimited text file read by the external pipeline
//! binary. The file is written once, at a path derived deterministically
//! from study id, pipeline kind and submission timestamp.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::PipelineKind;

/// Errors that can occur while materializing a parameter file.
#[derive(Debug, Error)]
pub enum ParamError {
    /// Creating or writing the file failed. The submission must not
    /// proceed to job insertion or execution.
    #[error("Failed to write parameter file '{path}': {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Processing parameters chosen at submission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingParams {
    pub normalization: String,
    pub summarization: String,
    /// Only meaningful for variant-calling pipelines.
    pub read_depth: u32,
    /// Only meaningful for variant-calling pipelines.
    pub variant_depth: u32,
    /// Only meaningful for variant-calling pipelines.
    pub exclude_db: bool,
}

impl ProcessingParams {
    /// Flattened key/value summary stored on the job record.
    pub fn summary(&self) -> String {
        format!(
            "NORMALIZATION={};SUMMARIZATION={};READ_DEPTH={};VARIANT_DEPTH={};EXCLUDE_DB={}",
            self.normalization,
            self.summarization,
            self.read_depth,
            self.variant_depth,
            yes_no(self.exclude_db),
        )
    }
}

/// Everything the materializer needs to write one parameter file.
#[derive(Debug, Clone)]
pub struct ParamFileSpec {
    pub study_id: String,
    /// Genome annotation version, e.g. "hg38".
    pub annotation: String,
    pub kind: PipelineKind,
    /// Directory holding the resolved raw input files.
    pub input_path: String,
    pub ctrl_file: String,
    pub samples_annot_file: String,
    pub interval_file: String,
    pub gtf_file: String,
    /// Raw filenames the user chose to exclude from a reused package.
    pub exclude_files: Vec<String>,
    pub processing: ProcessingParams,
    pub output_path: String,
    pub report_path: String,
}

/// Deterministic parameter-file path for a submission.
pub fn param_file_path(
    work_dir: &Path,
    study_id: &str,
    kind: PipelineKind,
    stamp: DateTime<Utc>,
) -> PathBuf {
    work_dir.join(format!(
        "{}_{}_{}.params",
        study_id,
        kind.code(),
        stamp.format("%Y%m%d%H%M%S"),
    ))
}

/// Writes the parameter file at `path` and returns the path on success.
///
/// The format is one `SECTION\tKEY\t=\tVALUE` line per field, with a blank
/// line between sections. Section and key order are fixed; the external
/// binary parses the file positionally.
pub fn write_param_file(path: &Path, spec: &ParamFileSpec) -> Result<PathBuf, ParamError> {
    let mut buf = Vec::new();

    let input: [(&str, &str); 9] = [
        ("STUDY_ID", &spec.study_id),
        ("ANNOTATION", &spec.annotation),
        ("TYPE", spec.kind.code()),
        ("INPUT", &spec.input_path),
        ("CTRL_FILE", &spec.ctrl_file),
        ("SAMPLES_ANNOT_FILE", &spec.samples_annot_file),
        ("INTERVAL_FILE", &spec.interval_file),
        ("GTF_FILE", &spec.gtf_file),
        ("EXCLUDE_FILES", &spec.exclude_files.join(",")),
    ];
    for (key, value) in input {
        write_line(&mut buf, "INPUT", key, value);
    }
    buf.push(b'\n');

    let read_depth = spec.processing.read_depth.to_string();
    let variant_depth = spec.processing.variant_depth.to_string();
    let processing: [(&str, &str); 5] = [
        ("NORMALIZATION", &spec.processing.normalization),
        ("SUMMARIZATION", &spec.processing.summarization),
        ("READ_DEPTH", &read_depth),
        ("VARIANT_DEPTH", &variant_depth),
        ("EXCLUDE_DB", yes_no(spec.processing.exclude_db)),
    ];
    for (key, value) in processing {
        write_line(&mut buf, "PROCESSING", key, value);
    }
    buf.push(b'\n');

    write_line(&mut buf, "OUTPUT", "OUTPUT", &spec.output_path);
    buf.push(b'\n');

    write_line(&mut buf, "REPORT", "REP_FILENAME", &spec.report_path);

    std::fs::write(path, &buf).map_err(|source| ParamError::WriteFailed {
        path: path.display().to_string(),
        source,
    })?;

    Ok(path.to_path_buf())
}

fn write_line(buf: &mut Vec<u8>, section: &str, key: &str, value: &str) {
    // Vec<u8> writes cannot fail
    let _ = writeln!(buf, "{section}\t{key}\t=\t{value}");
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "YES"
    } else {
        "NO"
    }
}
