//! Raw-data packages and input selection.
//!
//! A submission either references a freshly uploaded package or reuses a
//! previously uploaded one, optionally excluding some of its raw files.
//! Structural files (sample annotation, control probes, capture intervals,
//! GTF) live alongside the raw files but are never exclusion candidates.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::PipelineKind;

/// Errors that can occur while resolving a job's input data.
#[derive(Debug, Error)]
pub enum SelectError {
    /// Neither new data nor a reused package was chosen.
    #[error("No input data selected for submission")]
    NoSelection,

    /// The package directory could not be listed.
    #[error("Failed to read package directory '{path}': {source}")]
    PackageUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The sample annotation file could not be read.
    #[error("Failed to read sample annotation file '{path}': {source}")]
    AnnotationUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// An excluded filename is not a raw file of the package.
    #[error("Excluded file '{0}' is not a raw file of the selected package")]
    UnknownExclusion(String),

    /// An excluded filename names a structural file.
    #[error("File '{0}' is structural and cannot be excluded")]
    StructuralExclusion(String),
}

/// One uploaded set of raw data files for a study and pipeline.
///
/// Created once at upload time; read-only during job submission. The
/// serial number is monotonically increasing within (study, pipeline).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDataPackage {
    pub study_id: String,
    pub pipeline: PipelineKind,
    pub serial_number: i32,
    /// Directory holding the raw files and structural files.
    pub filepath: PathBuf,
    pub description: String,
    pub upload_time: DateTime<Utc>,
    pub owner_user_id: String,
    /// Sample annotation filename within `filepath`.
    pub samples_annot_file: String,
    /// Control-probe filename; empty when the kind has none.
    pub ctrl_file: String,
    /// Capture-interval filename; empty when the kind has none.
    pub interval_file: String,
    /// GTF transcript model filename; empty when the kind has none.
    pub gtf_file: String,
}

impl InputDataPackage {
    /// The package's structural filenames (non-empty ones only).
    pub fn structural_files(&self) -> Vec<&str> {
        [
            self.samples_annot_file.as_str(),
            self.ctrl_file.as_str(),
            self.interval_file.as_str(),
            self.gtf_file.as_str(),
        ]
        .into_iter()
        .filter(|name| !name.is_empty())
        .collect()
    }

    /// Whether `name` is one of the package's structural files.
    ///
    /// Comparison is case-insensitive, matching the receipt check.
    pub fn is_structural(&self, name: &str) -> bool {
        self.structural_files()
            .iter()
            .any(|s| s.eq_ignore_ascii_case(name))
    }

    /// Lists the package's candidate raw files: everything in the package
    /// directory with one of the kind's raw extensions, minus structural
    /// files. This is the list presented to the user for exclusion.
    pub fn raw_file_names(&self) -> Result<Vec<String>, SelectError> {
        let entries = list_file_names(&self.filepath)?;
        let mut raw: Vec<String> = entries
            .into_iter()
            .filter(|name| has_raw_extension(name, self.pipeline))
            .filter(|name| !self.is_structural(name))
            .collect();
        raw.sort();
        Ok(raw)
    }

    /// Filenames referenced by the sample annotation file.
    ///
    /// The annotation file is tab-delimited with a header row; the first
    /// column of each subsequent row is a raw filename.
    pub fn annotated_file_names(&self) -> Result<Vec<String>, SelectError> {
        let path = self.filepath.join(&self.samples_annot_file);
        let content =
            std::fs::read_to_string(&path).map_err(|source| SelectError::AnnotationUnreadable {
                path: path.display().to_string(),
                source,
            })?;

        Ok(content
            .lines()
            .skip(1)
            .filter_map(|line| line.split('\t').next())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Annotated filenames that were not actually received.
    ///
    /// Informational only; a submission with missing files still proceeds,
    /// but the list is surfaced to the user. Filenames are compared
    /// case-insensitively.
    pub fn missing_files(&self) -> Result<Vec<String>, SelectError> {
        let present: HashSet<String> = list_file_names(&self.filepath)?
            .into_iter()
            .map(|name| name.to_ascii_lowercase())
            .collect();

        Ok(self
            .annotated_file_names()?
            .into_iter()
            .filter(|name| !present.contains(&name.to_ascii_lowercase()))
            .collect())
    }
}

/// The user's input-data choice for one submission.
#[derive(Debug, Clone)]
pub enum RawDataSelection {
    /// Data uploaded as part of this submission.
    FreshUpload { package: InputDataPackage },
    /// A previously uploaded package, optionally customized by excluding
    /// some of its raw files for this job only.
    Reuse {
        package: InputDataPackage,
        excluded: Vec<String>,
    },
}

impl RawDataSelection {
    pub fn package(&self) -> &InputDataPackage {
        match self {
            RawDataSelection::FreshUpload { package } => package,
            RawDataSelection::Reuse { package, .. } => package,
        }
    }
}

/// The effective input for a job, produced by [`resolve`].
#[derive(Debug, Clone)]
pub struct ResolvedInput {
    pub package: InputDataPackage,
    /// Raw filenames omitted from this job's processing.
    pub excluded: Vec<String>,
    /// Annotated filenames that were never received (fresh uploads only).
    pub missing: Vec<String>,
    /// Whether the user customized a reused package.
    pub customized: bool,
}

/// Resolves the effective input reference for a job.
///
/// A fresh upload is checked against its sample annotation file for
/// missing raw files (informational). A reused package's exclusion list is
/// validated: every name must be a raw file of the package, and structural
/// files can never be excluded. No selection at all is rejected.
pub fn resolve(selection: Option<&RawDataSelection>) -> Result<ResolvedInput, SelectError> {
    match selection {
        None => Err(SelectError::NoSelection),
        Some(RawDataSelection::FreshUpload { package }) => Ok(ResolvedInput {
            missing: package.missing_files()?,
            package: package.clone(),
            excluded: Vec::new(),
            customized: false,
        }),
        Some(RawDataSelection::Reuse { package, excluded }) => {
            let raw: HashSet<String> = package
                .raw_file_names()?
                .into_iter()
                .map(|name| name.to_ascii_lowercase())
                .collect();

            for name in excluded {
                if package.is_structural(name) {
                    return Err(SelectError::StructuralExclusion(name.clone()));
                }
                if !raw.contains(&name.to_ascii_lowercase()) {
                    return Err(SelectError::UnknownExclusion(name.clone()));
                }
            }

            Ok(ResolvedInput {
                package: package.clone(),
                excluded: excluded.clone(),
                missing: Vec::new(),
                customized: !excluded.is_empty(),
            })
        }
    }
}

fn list_file_names(dir: &Path) -> Result<Vec<String>, SelectError> {
    let entries = std::fs::read_dir(dir).map_err(|source| SelectError::PackageUnreadable {
        path: dir.display().to_string(),
        source,
    })?;

    Ok(entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect())
}

fn has_raw_extension(name: &str, kind: PipelineKind) -> bool {
    let lower = name.to_ascii_lowercase();
    kind.raw_extensions()
        .iter()
        .any(|ext| lower.ends_with(&format!(".{ext}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_package(dir: &Path, raw: &[&str], annotated: &[&str]) -> InputDataPackage {
        let mut annot = String::from("filename\tsample\tgroup\n");
        for (i, name) in annotated.iter().enumerate() {
            annot.push_str(&format!("{name}\tS{i}\tcontrol\n"));
        }
        std::fs::write(dir.join("samples.txt"), annot).unwrap();
        std::fs::write(dir.join("controls.txt"), "probe data").unwrap();
        for name in raw {
            std::fs::write(dir.join(name), "raw").unwrap();
        }

        InputDataPackage {
            study_id: "STU-1".to_string(),
            pipeline: PipelineKind::ExpressionArray,
            serial_number: 1,
            filepath: dir.to_path_buf(),
            description: "test upload".to_string(),
            upload_time: Utc::now(),
            owner_user_id: "user-1".to_string(),
            samples_annot_file: "samples.txt".to_string(),
            ctrl_file: "controls.txt".to_string(),
            interval_file: String::new(),
            gtf_file: String::new(),
        }
    }

    #[test]
    fn test_raw_files_exclude_structural() {
        let dir = TempDir::new().unwrap();
        let pkg = write_package(dir.path(), &["a.CEL", "b.cel"], &["a.CEL", "b.cel"]);

        let raw = pkg.raw_file_names().unwrap();
        assert_eq!(raw, vec!["a.CEL".to_string(), "b.cel".to_string()]);
        assert!(!raw.contains(&"samples.txt".to_string()));
        assert!(!raw.contains(&"controls.txt".to_string()));
    }

    #[test]
    fn test_missing_files_case_insensitive() {
        let dir = TempDir::new().unwrap();
        // Annotation lists three files, only two arrived (one differing in case)
        let pkg = write_package(dir.path(), &["a.cel", "B.CEL"], &["A.CEL", "b.cel", "c.cel"]);

        let missing = pkg.missing_files().unwrap();
        assert_eq!(missing, vec!["c.cel".to_string()]);
    }

    #[test]
    fn test_fresh_upload_with_missing_still_resolves() {
        let dir = TempDir::new().unwrap();
        let pkg = write_package(dir.path(), &["a.cel"], &["a.cel", "gone.cel"]);

        let selection = RawDataSelection::FreshUpload { package: pkg };
        let resolved = resolve(Some(&selection)).unwrap();
        assert_eq!(resolved.missing, vec!["gone.cel".to_string()]);
        assert!(resolved.excluded.is_empty());
        assert!(!resolved.customized);
    }

    #[test]
    fn test_reuse_validates_exclusions() {
        let dir = TempDir::new().unwrap();
        let pkg = write_package(dir.path(), &["a.cel", "b.cel"], &["a.cel", "b.cel"]);

        let ok = RawDataSelection::Reuse {
            package: pkg.clone(),
            excluded: vec!["A.CEL".to_string()],
        };
        let resolved = resolve(Some(&ok)).unwrap();
        assert!(resolved.customized);
        assert_eq!(resolved.excluded, vec!["A.CEL".to_string()]);

        let unknown = RawDataSelection::Reuse {
            package: pkg.clone(),
            excluded: vec!["nope.cel".to_string()],
        };
        assert!(matches!(
            resolve(Some(&unknown)),
            Err(SelectError::UnknownExclusion(name)) if name == "nope.cel"
        ));

        let structural = RawDataSelection::Reuse {
            package: pkg,
            excluded: vec!["samples.txt".to_string()],
        };
        assert!(matches!(
            resolve(Some(&structural)),
            Err(SelectError::StructuralExclusion(name)) if name == "samples.txt"
        ));
    }

    #[test]
    fn test_no_selection_rejected() {
        assert!(matches!(resolve(None), Err(SelectError::NoSelection)));
    }

    #[test]
    fn test_reuse_without_exclusions_is_not_customized() {
        let dir = TempDir::new().unwrap();
        let pkg = write_package(dir.path(), &["a.cel"], &["a.cel"]);

        let selection = RawDataSelection::Reuse {
            package: pkg,
            excluded: Vec::new(),
        };
        let resolved = resolve(Some(&selection)).unwrap();
        assert!(!resolved.customized);
    }
}
