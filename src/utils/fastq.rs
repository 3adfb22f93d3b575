use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::defs::FQ_TERMINATIONS;

/// Raw FASTQ file names found in one input directory, sorted by name.
#[derive(Debug, Clone)]
pub struct SampleFileSet {
    pub dir: PathBuf,
    pub files: Vec<String>,
}

/// Forward/reverse pairs plus the file names that could not be paired safely.
#[derive(Debug, Default)]
pub struct PairingOutcome {
    pub pairs: BTreeMap<String, String>,
    pub conflicts: Vec<String>,
}

pub fn has_fastq_termination(name: &str) -> bool {
    FQ_TERMINATIONS.iter().any(|t| name.ends_with(t))
}

/// Collects FASTQ file names directly under `dir`.
/// Subdirectories and files without a FASTQ termination are ignored.
pub fn scan_fastq_dir(dir: &Path) -> io::Result<SampleFileSet> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.path().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if has_fastq_termination(&name) {
            files.push(name);
        }
    }
    files.sort();
    Ok(SampleFileSet {
        dir: dir.to_path_buf(),
        files,
    })
}

/// Pairs forward reads with their reverse mates by marker substitution.
///
/// A forward name must contain the forward marker exactly once. Names where
/// it occurs more than once go into `conflicts` and produce no pair; forward
/// files whose derived mate is absent from the set are dropped.
///
/// # Arguments
///
/// * `set` - FASTQ files from one input directory.
/// * `forward_marker` - Substring identifying forward reads, e.g. "_R1".
/// * `reverse_marker` - Substring identifying reverse reads, e.g. "_R2".
///
/// # Returns
/// PairingOutcome: forward -> reverse map plus conflicted file names.
pub fn pair_reads(set: &SampleFileSet, forward_marker: &str, reverse_marker: &str) -> PairingOutcome {
    let names: HashSet<&str> = set.files.iter().map(|f| f.as_str()).collect();
    let mut outcome = PairingOutcome::default();

    for name in &set.files {
        match name.matches(forward_marker).count() {
            0 => continue,
            1 => {
                let mate = name.replace(forward_marker, reverse_marker);
                // A name can never be its own mate.
                if mate != *name && names.contains(mate.as_str()) {
                    outcome.pairs.insert(name.clone(), mate);
                }
            }
            _ => outcome.conflicts.push(name.clone()),
        }
    }

    outcome
}

/// Prefix of a forward file name before the forward marker.
pub fn sample_tag(forward_name: &str, forward_marker: &str) -> Option<String> {
    forward_name
        .split_once(forward_marker)
        .map(|(prefix, _)| prefix.to_string())
}
