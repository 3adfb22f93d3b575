use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use lazy_static::lazy_static;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::cli::Arguments;

// External software
pub const FASTP_TAG: &str = "fastp";
pub const BBSPLIT_TAG: &str = "bbsplit.sh";
pub const REFORMAT_TAG: &str = "reformat.sh";
pub const FASTQC_TAG: &str = "fastqc";
pub const MULTIQC_TAG: &str = "multiqc";


lazy_static! {
    pub static ref TOOL_VERSIONS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert(FASTP_TAG, "0.23");
        m.insert(BBSPLIT_TAG, "39.01");
        m.insert(REFORMAT_TAG, "39.01");
        m.insert(FASTQC_TAG, "0.12");
        m.insert(MULTIQC_TAG, "1.14");

        m
    };
}

// Static Filenames
pub const REGISTRY_FILE_NAME: &str = "ref_genomes_db.json";

// Stage layout under the base directory
pub const DEFAULT_BASE_DIR: &str = "Variant_Calling";
pub const QUALITY_SUB_DIR: &str = "00_quality_check_reports";
pub const PREPROCESS_SUB_DIR: &str = "01_pre_processing";
pub const STAGE_SUB_DIRS: &[&'static str] = &[
    QUALITY_SUB_DIR,
    PREPROCESS_SUB_DIR,
    "02_alignment",
    "03_bam_filtering",
    "04_variant_calling",
    "05_results",
    "06_logs",
];


// Static Parameters

pub const FQ_TERMINATIONS: &[&'static str] = &[".fastq", ".fastq.gz", ".fq", ".fq.gz"];
pub const REF_GENOME_EXTENSIONS: &[&'static str] = &[".fa", ".fasta", ".gff3", ".gbk", ".gb"];

pub const DEFAULT_FORWARD_MARKER: &str = "_R1";
pub const DEFAULT_REVERSE_MARKER: &str = "_R2";

pub const TRIMMED_PREFIX: &str = "processed_";
pub const UNMAPPED_PREFIX: &str = "unmapped_";
pub const SPLIT_TERMINATION: &str = ".fq.gz";

// Fixed trimming/dedup settings handed to fastp for every sample
pub const FASTP_STATIC_ARGS: &[&'static str] = &[
    "-q", "20",
    "-u", "50",
    "--dedup", "1",
    "--detect_adapter_for_pe",
    "-p", "3",
    "-5",
    "-M", "20",
    "-W", "4",
    "-c",
];

pub const STDERR_TAIL_LINES: usize = 8;

/// Pipeline stages that shell out to an external tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Trim,
    Split,
    Reformat,
    QualityReport,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Trim => write!(f, "trim"),
            Stage::Split => write!(f, "split"),
            Stage::Reformat => write!(f, "reformat"),
            Stage::QualityReport => write!(f, "quality_report"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Pairing marker '{marker}' occurs more than once in {file}")]
    NamingConflict { file: String, marker: String },
    #[error("Invalid reference genome entry: {0}")]
    Validation(String),
    #[error("Tag '{0}' is not in the reference registry")]
    UnknownTag(String),
    #[error("No registered reference tag matches {0}")]
    UnresolvedReference(String),
    #[error("{stage} stage failed: {tool} exited with status {status}")]
    StageFailure {
        stage: Stage,
        tool: String,
        status: i32,
        stderr_tail: String,
    },
    #[error("{stage} stage timed out: {tool} exceeded {secs}s")]
    StageTimeout {
        stage: Stage,
        tool: String,
        secs: u64,
    },
    #[error("Failed to spawn {tool}: {source}. Is it installed and on PATH?")]
    ToolSpawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Registry store error: {0}")]
    Store(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub struct RunConfig {
    pub cwd: PathBuf,
    pub input_dir: Option<PathBuf>,
    pub preprocess_dir: PathBuf,
    pub quality_dir: PathBuf,
    pub registry_path: PathBuf,
    pub sample_semaphore: Arc<Semaphore>,
    pub args: Arguments,
}
