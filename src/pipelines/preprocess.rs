use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use futures::future::try_join_all;
use log::{debug, error, info, warn};
use tokio::sync::Mutex;

use crate::cli::SelectionMode;
use crate::config::defs::{
    PipelineError, RunConfig, Stage, BBSPLIT_TAG, FASTP_TAG, REFORMAT_TAG, SPLIT_TERMINATION,
    TRIMMED_PREFIX, UNMAPPED_PREFIX,
};
use crate::reference::registry::ReferenceRegistry;
use crate::reference::selector::select_references;
use crate::utils::command::bbsplit::BbsplitConfig;
use crate::utils::command::fastp::FastpConfig;
use crate::utils::command::reformat::ReformatConfig;
use crate::utils::command::{bbsplit, fastp, log_tool_versions, reformat, run_tool};
use crate::utils::fastq::{pair_reads, sample_tag, scan_fastq_dir};
use crate::utils::file::reference_short_name;

/// Samples sharing a tag write the same derived file names, so they take
/// turns even when --jobs allows more parallelism.
type TagLocks = Mutex<HashMap<String, Arc<Mutex<()>>>>;

#[derive(Debug)]
enum SampleOutcome {
    Processed { sample: String, finals: usize },
    Skipped { sample: String, reason: String },
    Failed { sample: String, reason: String },
}

/// Runs the pre-processing pipeline over every read pair in the input
/// directory: fastp trim/dedup, bbsplit by reference genome, one clean
/// pair per reference via reformat, then optional intermediate cleanup.
///
/// A sample that fails is reported and does not stop the others; the run
/// only errors out when no sample finished at all.
pub async fn run(config: Arc<RunConfig>) -> Result<(), PipelineError> {
    println!("\n-------------\n Pre-processing\n-------------\n");

    let args = &config.args;
    if args.forward_marker.is_empty() || args.reverse_marker.is_empty() {
        return Err(PipelineError::InvalidConfig(
            "Pairing markers must not be empty".to_string(),
        ));
    }
    if args.forward_marker == args.reverse_marker {
        return Err(PipelineError::InvalidConfig(
            "Forward and reverse markers must differ".to_string(),
        ));
    }
    if !args.ref_tags.is_empty() && args.mode == SelectionMode::Direct {
        warn!("--ref-tags has no effect in direct mode");
    }

    let input_dir = config.input_dir.clone().ok_or_else(|| {
        PipelineError::InvalidConfig("--input <dir> is required for the preprocess module".to_string())
    })?;

    log_tool_versions(&[FASTP_TAG, BBSPLIT_TAG, REFORMAT_TAG]).await;

    let file_set = scan_fastq_dir(&input_dir)?;
    info!(
        "Found {} FASTQ file(s) in {}",
        file_set.files.len(),
        file_set.dir.display()
    );

    let pairing = pair_reads(&file_set, &args.forward_marker, &args.reverse_marker);
    info!("Paired {} sample(s)", pairing.pairs.len());

    let registry = Arc::new(ReferenceRegistry::load(&config.registry_path)?);
    if registry.is_empty() {
        warn!(
            "Reference registry {} is empty; add genomes with the register_reference module",
            config.registry_path.display()
        );
    }

    let mut outcomes: Vec<SampleOutcome> = Vec::new();
    for file in &pairing.conflicts {
        let err = PipelineError::NamingConflict {
            file: file.clone(),
            marker: args.forward_marker.clone(),
        };
        outcomes.push(SampleOutcome::Failed {
            sample: file.clone(),
            reason: err.to_string(),
        });
    }

    let tag_locks: Arc<TagLocks> = Arc::new(Mutex::new(HashMap::new()));
    let mut handles = Vec::new();
    for (forward, reverse) in pairing.pairs {
        let config = config.clone();
        let registry = registry.clone();
        let tag_locks = tag_locks.clone();
        // The scanned set owns the directory its file names are relative to
        let input_dir = file_set.dir.clone();
        handles.push(tokio::spawn(async move {
            let _permit = config
                .sample_semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("Semaphore closed");
            run_sample(&config, &registry, &tag_locks, &input_dir, &forward, &reverse).await
        }));
    }

    let results = try_join_all(handles)
        .await
        .map_err(|e| PipelineError::Other(anyhow!("Sample task panicked: {}", e)))?;
    outcomes.extend(results);

    let (processed, _skipped, _failed) = report(&outcomes);
    if processed == 0 && !outcomes.is_empty() {
        return Err(PipelineError::Other(anyhow!("No sample finished pre-processing")));
    }
    Ok(())
}

/// Serializes on the sample tag, then runs the stages and folds the result
/// into a per-sample outcome.
async fn run_sample(
    config: &RunConfig,
    registry: &ReferenceRegistry,
    tag_locks: &TagLocks,
    input_dir: &Path,
    forward: &str,
    reverse: &str,
) -> SampleOutcome {
    // pair_reads only emits forwards containing the marker
    let tag = match sample_tag(forward, &config.args.forward_marker) {
        Some(tag) => tag,
        None => {
            return SampleOutcome::Failed {
                sample: forward.to_string(),
                reason: format!("No '{}' marker in file name", config.args.forward_marker),
            };
        }
    };

    let lock = {
        let mut locks = tag_locks.lock().await;
        locks
            .entry(tag.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    };
    let _guard = lock.lock().await;

    match process_sample(config, registry, input_dir, &tag, forward, reverse).await {
        Ok(finals) => SampleOutcome::Processed {
            sample: forward.to_string(),
            finals: finals.len(),
        },
        Err(e) => classify(forward, e),
    }
}

/// The three tool stages plus cleanup for one read pair.
///
/// Returns the final forward -> reverse output files, one pair per
/// reference that received reads.
async fn process_sample(
    config: &RunConfig,
    registry: &ReferenceRegistry,
    input_dir: &Path,
    tag: &str,
    forward: &str,
    reverse: &str,
) -> Result<BTreeMap<PathBuf, PathBuf>, PipelineError> {
    let args = &config.args;
    let out_dir = &config.preprocess_dir;

    let refs = select_references(forward, &args.mode, registry, &args.ref_tags)?;
    if refs.is_empty() {
        return Err(PipelineError::UnresolvedReference(forward.to_string()));
    }
    debug!("Sample {} splits against {} reference(s)", forward, refs.len());

    // Stage 1: trim, quality-filter and deduplicate
    let in1 = input_dir.join(forward);
    let in2 = input_dir.join(reverse);
    let trimmed1 = out_dir.join(trimmed_name(forward));
    let trimmed2 = out_dir.join(trimmed_name(reverse));
    let fastp_config = FastpConfig {
        in1: &in1,
        in2: &in2,
        out1: &trimmed1,
        out2: &trimmed2,
    };
    run_tool(
        Stage::Trim,
        FASTP_TAG,
        fastp::arg_generator(&fastp_config),
        args.tool_timeout,
    )
    .await?;

    // Stage 2: split the trimmed pair across the selected references
    let pattern = out_dir
        .join(split_basename_pattern(tag))
        .to_string_lossy()
        .into_owned();
    let unmapped = if args.keep_unmapped {
        Some((
            out_dir.join(unmapped_name(forward)),
            out_dir.join(unmapped_name(reverse)),
        ))
    } else {
        None
    };
    let bbsplit_config = BbsplitConfig {
        in1: &trimmed1,
        in2: &trimmed2,
        refs: &refs,
        basename_pattern: &pattern,
        ambiguous: &args.ambiguous,
        unmapped,
    };
    run_tool(
        Stage::Split,
        BBSPLIT_TAG,
        bbsplit::arg_generator(&bbsplit_config),
        args.tool_timeout,
    )
    .await?;

    // Stage 3: re-pair each per-reference interleaved file
    let mut finals: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();
    let mut split_files: Vec<PathBuf> = Vec::new();
    for reference in &refs {
        let short = reference_short_name(reference);
        let split_file = out_dir.join(split_output_name(tag, &short));
        if !split_file.is_file() {
            warn!(
                "Sample {}: no reads were split to reference {} ({} not written)",
                forward,
                short,
                split_file.display()
            );
            continue;
        }

        let out1 = out_dir.join(final_name(&short, forward));
        let out2 = out_dir.join(final_name(&short, reverse));
        let reformat_config = ReformatConfig {
            input: &split_file,
            out1: &out1,
            out2: &out2,
        };
        run_tool(
            Stage::Reformat,
            REFORMAT_TAG,
            reformat::arg_generator(&reformat_config),
            args.tool_timeout,
        )
        .await?;

        split_files.push(split_file);
        finals.insert(out1, out2);
    }
    info!("Sample {}: {} final pair(s)", forward, finals.len());

    // Stage 4: only reached once every reformat for this sample is done
    if args.remove_intermediates {
        let mut intermediates = vec![trimmed1, trimmed2];
        intermediates.extend(split_files);
        remove_intermediates(&intermediates, &finals);
    }

    Ok(finals)
}

/// Selection problems skip a sample; everything else failed it.
fn classify(sample: &str, err: PipelineError) -> SampleOutcome {
    match err {
        PipelineError::UnknownTag(_)
        | PipelineError::UnresolvedReference(_)
        | PipelineError::Validation(_) => SampleOutcome::Skipped {
            sample: sample.to_string(),
            reason: err.to_string(),
        },
        _ => SampleOutcome::Failed {
            sample: sample.to_string(),
            reason: err.to_string(),
        },
    }
}

/// Deletes per-sample intermediates. Best effort: a file that is already
/// gone is fine, and a final output is never deleted.
fn remove_intermediates(paths: &[PathBuf], finals: &BTreeMap<PathBuf, PathBuf>) {
    let keep: HashSet<&PathBuf> = finals.iter().flat_map(|(out1, out2)| [out1, out2]).collect();
    for path in paths {
        if keep.contains(path) {
            continue;
        }
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Removed intermediate {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", path.display(), e),
        }
    }
}

fn report(outcomes: &[SampleOutcome]) -> (usize, usize, usize) {
    let mut processed = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;

    for outcome in outcomes {
        match outcome {
            SampleOutcome::Processed { sample, finals } => {
                processed += 1;
                info!("Processed {}: {} final pair(s)", sample, finals);
            }
            SampleOutcome::Skipped { sample, reason } => {
                skipped += 1;
                warn!("Skipped {}: {}", sample, reason);
            }
            SampleOutcome::Failed { sample, reason } => {
                failed += 1;
                error!("Failed {}: {}", sample, reason);
            }
        }
    }

    println!(
        "\nPre-processing summary: {} processed, {} skipped, {} failed.",
        processed, skipped, failed
    );
    (processed, skipped, failed)
}

// Derived file names are pure functions of the inputs, so reruns and
// concurrent samples always agree on them.

fn trimmed_name(original: &str) -> String {
    format!("{}{}", TRIMMED_PREFIX, original)
}

fn split_basename_pattern(tag: &str) -> String {
    format!("{}%{}", tag, SPLIT_TERMINATION)
}

fn split_output_name(tag: &str, reference_short: &str) -> String {
    format!("{}{}{}", tag, reference_short, SPLIT_TERMINATION)
}

fn final_name(reference_short: &str, original: &str) -> String {
    format!("{}_{}", reference_short, original)
}

fn unmapped_name(original: &str) -> String {
    format!("{}{}", UNMAPPED_PREFIX, original)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_derived_names_are_deterministic() {
        assert_eq!(trimmed_name("S1_R1.fastq.gz"), "processed_S1_R1.fastq.gz");
        assert_eq!(split_basename_pattern("S1"), "S1%.fq.gz");
        assert_eq!(split_output_name("S1", "NC_000913"), "S1NC_000913.fq.gz");
        assert_eq!(
            final_name("NC_000913", "S1_R1.fastq.gz"),
            "NC_000913_S1_R1.fastq.gz"
        );
        assert_eq!(unmapped_name("S1_R1.fastq.gz"), "unmapped_S1_R1.fastq.gz");
    }

    #[test]
    fn test_final_names_differ_per_reference() {
        let forward = "S1_R1.fastq.gz";
        assert_ne!(final_name("A", forward), final_name("B", forward));
    }

    #[test]
    fn test_split_pattern_substitution_matches_split_output_name() {
        let pattern = split_basename_pattern("S1");
        assert_eq!(pattern.replace('%', "NC"), split_output_name("S1", "NC"));
    }

    #[test]
    fn test_classify_selection_problems_as_skips() {
        let skipped = classify("S1_R1.fq", PipelineError::UnresolvedReference("S1_R1.fq".into()));
        assert!(matches!(skipped, SampleOutcome::Skipped { .. }));

        let skipped = classify("S1_R1.fq", PipelineError::UnknownTag("_Z_".into()));
        assert!(matches!(skipped, SampleOutcome::Skipped { .. }));

        let failed = classify(
            "S1_R1.fq",
            PipelineError::StageFailure {
                stage: Stage::Split,
                tool: BBSPLIT_TAG.to_string(),
                status: 1,
                stderr_tail: String::new(),
            },
        );
        assert!(matches!(failed, SampleOutcome::Failed { .. }));
    }

    #[test]
    fn test_remove_intermediates_spares_finals_and_missing_files() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("processed_S1_R1.fastq.gz");
        let kept = dir.path().join("NC_S1_R1.fastq.gz");
        let absent = dir.path().join("S1NC.fq.gz");
        fs::write(&gone, b"x").unwrap();
        fs::write(&kept, b"x").unwrap();

        let mut finals = BTreeMap::new();
        finals.insert(kept.clone(), dir.path().join("NC_S1_R2.fastq.gz"));

        remove_intermediates(&[gone.clone(), kept.clone(), absent], &finals);

        assert!(!gone.exists());
        assert!(kept.exists());
    }
}
