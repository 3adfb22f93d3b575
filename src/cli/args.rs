use clap::{Parser, ValueEnum};

use crate::config::defs::{DEFAULT_BASE_DIR, DEFAULT_FORWARD_MARKER, DEFAULT_REVERSE_MARKER};

/// How reference genomes are picked for each sample pair.
#[derive(Debug, Clone, ValueEnum, Default, PartialEq)]
pub enum SelectionMode {
    #[default]
    Direct,
    #[value(alias = "hgt")]
    CoEvolution,
}

/// bbsplit policy for reads that map equally well to several references.
#[derive(Debug, Clone, ValueEnum, Default, PartialEq)]
pub enum AmbiguousPolicy {
    #[default]
    Best,
    Toss,
}

impl AmbiguousPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AmbiguousPolicy::Best => "best",
            AmbiguousPolicy::Toss => "toss",
        }
    }
}

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "vcseek-pipelines", version = "0.1.0")]
pub struct Arguments {

    #[arg(short, long)]
    pub module: String,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(short = 'i', long = "input", help = "Directory holding the raw FASTQ files")]
    pub input: Option<String>,

    #[arg(short = 'b', long = "base-dir", default_value = DEFAULT_BASE_DIR, help = "Root directory for all pipeline stage outputs")]
    pub base_dir: String,

    #[arg(short = 'o', long = "out", help = "Output directory for the selected module. If not specified, the matching stage directory under the base directory is used.")]
    pub out_dir: Option<String>,

    #[arg(long, help = "Reference registry JSON path. Defaults to <base-dir>/ref_genomes_db.json")]
    pub registry: Option<String>,

    #[arg(long = "mode", default_value = "direct", value_enum)]
    pub mode: SelectionMode,

    #[clap(
        long,
        value_delimiter = ',',
        help = "Comma-separated registry tags to split against (e.g., _I_,_R_); overrides filename matching in co-evolution mode"
    )]
    pub ref_tags: Vec<String>,

    #[arg(long = "forward-marker", default_value = DEFAULT_FORWARD_MARKER)]
    pub forward_marker: String,

    #[arg(long = "reverse-marker", default_value = DEFAULT_REVERSE_MARKER)]
    pub reverse_marker: String,

    #[arg(long = "ambiguous", default_value = "best", value_enum)]
    pub ambiguous: AmbiguousPolicy,

    #[arg(long, default_value_t = false, help = "Also write reads that matched no reference")]
    pub keep_unmapped: bool,

    #[arg(long, default_value_t = false, help = "Delete trimmed and split intermediates once a sample has its final outputs")]
    pub remove_intermediates: bool,

    #[arg(short = 'j', long, default_value_t = 1, help = "Samples processed concurrently; capped to physical cores")]
    pub jobs: usize,

    #[arg(long, default_value_t = 0, help = "Per-tool timeout in seconds; 0 disables it")]
    pub tool_timeout: u64,

    #[arg(short = 'g', long, help = "Reference genome file to register (register_reference module)")]
    pub genome: Option<String>,

    #[arg(short = 't', long = "tag", help = "Tag to file --genome under (register_reference module)")]
    pub ref_tag: Option<String>,
}
