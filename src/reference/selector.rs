use std::collections::HashSet;
use std::path::PathBuf;

use crate::cli::SelectionMode;
use crate::config::defs::PipelineError;
use crate::reference::registry::ReferenceRegistry;

/// Chooses the reference genomes one sample pair will be split against.
///
/// Direct mode takes every registered genome in registry order. Co-evolution
/// mode takes the explicit tags when any were given, otherwise the tags that
/// occur as substrings of the forward file name.
///
/// # Arguments
///
/// * `forward_name` - Forward FASTQ file name of the sample.
/// * `mode` - Selection mode from the CLI.
/// * `registry` - Loaded reference registry.
/// * `explicit_tags` - Tags from --ref-tags; empty means none given.
///
/// # Returns
/// Vec<PathBuf>: genome paths, first occurrence order, no duplicates.
pub fn select_references(
    forward_name: &str,
    mode: &SelectionMode,
    registry: &ReferenceRegistry,
    explicit_tags: &[String],
) -> Result<Vec<PathBuf>, PipelineError> {
    match mode {
        SelectionMode::Direct => Ok(dedup_paths(
            registry.entries().iter().map(|e| e.path.clone()),
        )),
        SelectionMode::CoEvolution => {
            if !explicit_tags.is_empty() {
                let paths = registry.paths_for_tags(explicit_tags)?;
                Ok(dedup_paths(paths.into_iter()))
            } else {
                let matched: Vec<PathBuf> = registry
                    .entries()
                    .iter()
                    .filter(|e| forward_name.contains(&e.tag))
                    .map(|e| e.path.clone())
                    .collect();
                if matched.is_empty() {
                    return Err(PipelineError::UnresolvedReference(forward_name.to_string()));
                }
                Ok(dedup_paths(matched.into_iter()))
            }
        }
    }
}

fn dedup_paths<I: Iterator<Item = PathBuf>>(paths: I) -> Vec<PathBuf> {
    let mut seen: HashSet<PathBuf> = HashSet::new();
    paths.filter(|p| seen.insert(p.clone())).collect()
}
