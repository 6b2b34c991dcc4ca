//! Pipeline kinds and their per-kind field tables.
//!
//! The portal supports a small, fixed set of pipeline technologies. Each
//! kind determines which raw-file extensions a package may contain, which
//! auxiliary files apply, and whether the sequencing-depth fields of the
//! parameter file carry meaning.

use serde::{Deserialize, Serialize};

/// The pipeline technology a job runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    /// Microarray expression profiling.
    ExpressionArray,
    /// RNA-seq expression profiling.
    ExpressionSeq,
    /// DNA-seq variant calling.
    VariantSeq,
    /// RNA-seq fusion detection.
    FusionSeq,
}

impl PipelineKind {
    /// All supported kinds, in display order.
    pub const ALL: [PipelineKind; 4] = [
        PipelineKind::ExpressionArray,
        PipelineKind::ExpressionSeq,
        PipelineKind::VariantSeq,
        PipelineKind::FusionSeq,
    ];

    /// Stable code used in storage and parameter files.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineKind::ExpressionArray => "expression_array",
            PipelineKind::ExpressionSeq => "expression_seq",
            PipelineKind::VariantSeq => "variant_seq",
            PipelineKind::FusionSeq => "fusion_seq",
        }
    }

    /// Human-readable name used in notifications and the job list.
    pub fn display_name(&self) -> &'static str {
        match self {
            PipelineKind::ExpressionArray => "Expression Profiling (Array)",
            PipelineKind::ExpressionSeq => "Expression Profiling (RNA-seq)",
            PipelineKind::VariantSeq => "Variant Calling (DNA-seq)",
            PipelineKind::FusionSeq => "Fusion Detection (RNA-seq)",
        }
    }

    /// File extensions accepted as raw data for this kind (lowercase).
    pub fn raw_extensions(&self) -> &'static [&'static str] {
        match self {
            PipelineKind::ExpressionArray => &["cel"],
            PipelineKind::ExpressionSeq | PipelineKind::FusionSeq => &["fastq", "fq", "bam"],
            PipelineKind::VariantSeq => &["fastq", "fq", "bam", "vcf"],
        }
    }

    /// Whether a control-probe file applies to this kind.
    pub fn uses_control_file(&self) -> bool {
        matches!(self, PipelineKind::ExpressionArray)
    }

    /// Whether a capture-interval file applies to this kind.
    pub fn uses_interval_file(&self) -> bool {
        matches!(self, PipelineKind::VariantSeq)
    }

    /// Whether a GTF transcript model applies to this kind.
    pub fn uses_gtf_file(&self) -> bool {
        matches!(self, PipelineKind::ExpressionSeq | PipelineKind::FusionSeq)
    }

    /// Whether READ_DEPTH / VARIANT_DEPTH / EXCLUDE_DB carry meaning.
    pub fn variant_fields_apply(&self) -> bool {
        matches!(self, PipelineKind::VariantSeq)
    }

    /// Parses a stable code back into a kind.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.code() == code)
    }
}

impl std::fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}
