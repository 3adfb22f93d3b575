use std::path::{Path, PathBuf};

use crate::config::defs::REF_GENOME_EXTENSIONS;

/// Splits a path into its stem and the trailing extension chain.
/// "S1_R1.fastq.gz" yields ("S1_R1", ["fastq", "gz"]).
///
/// # Arguments
///
/// * `path` - File path to split.
///
/// # Returns
/// Tuple: (stem path, extensions in left-to-right order).
pub fn extension_remover(path: &Path) -> (PathBuf, Vec<String>) {
    let mut stem = path.to_path_buf();
    let mut extensions: Vec<String> = Vec::new();

    while let (Some(name), Some(ext)) = (stem.file_stem(), stem.extension()) {
        extensions.push(ext.to_string_lossy().into_owned());
        let name = name.to_os_string();
        stem = stem.with_file_name(name);
    }

    extensions.reverse();
    (stem, extensions)
}

/// Short display name of a reference genome: its file name with one
/// recognized reference extension stripped.
pub fn reference_short_name(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    for ext in REF_GENOME_EXTENSIONS {
        if let Some(stripped) = file_name.strip_suffix(ext) {
            if !stripped.is_empty() {
                return stripped.to_string();
            }
        }
    }

    // Unrecognized extension: fall back to the bare stem.
    let (stem, _) = extension_remover(Path::new(&file_name));
    stem.to_string_lossy().into_owned()
}
