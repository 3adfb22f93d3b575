use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::config::defs::{PipelineError, RunConfig, REF_GENOME_EXTENSIONS};

/// Registry format version for compatibility checking
pub const REGISTRY_VERSION: u32 = 1;

/// One registered reference genome: where it lives on disk and the tag
/// samples carry to find it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub path: PathBuf,
    pub tag: String,
}

/// Serializable registry format
#[derive(Debug, Serialize, Deserialize)]
struct RegistryData {
    version: u32,
    references: Vec<ReferenceEntry>,
}

/// Insertion-ordered registry of reference genomes, persisted as JSON.
///
/// One entry per genome path; re-registering a path replaces its tag, and
/// entries are never implicitly deleted.
#[derive(Debug, Default)]
pub struct ReferenceRegistry {
    store_path: PathBuf,
    entries: Vec<ReferenceEntry>,
}

impl ReferenceRegistry {
    /// Loads the registry from `store_path`, or starts an empty one when the
    /// file does not exist yet.
    pub fn load(store_path: &Path) -> Result<Self, PipelineError> {
        if !store_path.exists() {
            return Ok(ReferenceRegistry {
                store_path: store_path.to_path_buf(),
                entries: Vec::new(),
            });
        }

        let content = fs::read_to_string(store_path)?;
        let data: RegistryData = serde_json::from_str(&content)?;

        // Version check (warn but don't fail)
        if data.version != REGISTRY_VERSION {
            warn!(
                "Registry version mismatch in {} (expected {}, found {})",
                store_path.display(),
                REGISTRY_VERSION,
                data.version
            );
        }

        Ok(ReferenceRegistry {
            store_path: store_path.to_path_buf(),
            entries: data.references,
        })
    }

    /// Writes the registry back to its store path.
    ///
    /// The JSON is staged in a temporary file in the same directory and moved
    /// into place, so an interrupted save never leaves a truncated store.
    pub fn save(&self) -> Result<(), PipelineError> {
        let parent = match self.store_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let data = RegistryData {
            version: REGISTRY_VERSION,
            references: self.entries.clone(),
        };
        let json = serde_json::to_string_pretty(&data)?;

        let mut tmp = NamedTempFile::new_in(&parent)?;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&self.store_path)
            .map_err(|e| PipelineError::IOError(e.error))?;
        Ok(())
    }

    /// Registers `genome` under `tag`, replacing the tag of an existing entry
    /// with the same path. The caller still has to `save`.
    pub fn upsert(&mut self, genome: &Path, tag: &str) -> Result<(), PipelineError> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(PipelineError::Validation(
                "reference tag must not be empty".to_string(),
            ));
        }
        if !genome.is_file() {
            return Err(PipelineError::Validation(format!(
                "{} is not an existing file",
                genome.display()
            )));
        }
        let file_name = genome
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !REF_GENOME_EXTENSIONS.iter().any(|ext| file_name.ends_with(ext)) {
            return Err(PipelineError::Validation(format!(
                "{} does not end with a recognized reference extension ({})",
                file_name,
                REF_GENOME_EXTENSIONS.join(", ")
            )));
        }

        let path = fs::canonicalize(genome)?;
        match self.entries.iter_mut().find(|e| e.path == path) {
            Some(entry) => entry.tag = tag.to_string(),
            None => self.entries.push(ReferenceEntry {
                path,
                tag: tag.to_string(),
            }),
        }
        Ok(())
    }

    pub fn entries(&self) -> &[ReferenceEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Distinct tags of the given paths, in registry order.
    pub fn tags_of(&self, paths: &[PathBuf]) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for entry in &self.entries {
            if paths.contains(&entry.path) && !tags.contains(&entry.tag) {
                tags.push(entry.tag.clone());
            }
        }
        tags
    }

    /// Resolves tags to registered genome paths, in registry order.
    /// Any tag without an entry fails the whole lookup.
    pub fn paths_for_tags(&self, tags: &[String]) -> Result<Vec<PathBuf>, PipelineError> {
        for tag in tags {
            if !self.entries.iter().any(|e| &e.tag == tag) {
                return Err(PipelineError::UnknownTag(tag.clone()));
            }
        }
        Ok(self
            .entries
            .iter()
            .filter(|e| tags.contains(&e.tag))
            .map(|e| e.path.clone())
            .collect())
    }
}

/// CLI entry: registers --genome under --tag and persists the registry.
pub fn register_reference(config: &RunConfig) -> Result<(), PipelineError> {
    let genome = config.args.genome.as_ref().ok_or_else(|| {
        PipelineError::InvalidConfig("--genome is required for the register_reference module".to_string())
    })?;
    let tag = config.args.ref_tag.as_ref().ok_or_else(|| {
        PipelineError::InvalidConfig("--tag is required for the register_reference module".to_string())
    })?;

    let genome_path = PathBuf::from(genome);
    let genome_path = if genome_path.is_absolute() {
        genome_path
    } else {
        config.cwd.join(genome_path)
    };

    let mut registry = ReferenceRegistry::load(&config.registry_path)?;
    registry.upsert(&genome_path, tag)?;
    registry.save()?;
    info!(
        "Registered {} under tag '{}' ({} reference(s) in {})",
        genome_path.display(),
        tag,
        registry.len(),
        config.registry_path.display()
    );
    Ok(())
}

/// CLI entry: prints every registered reference genome.
pub fn list_references(config: &RunConfig) -> Result<(), PipelineError> {
    let registry = ReferenceRegistry::load(&config.registry_path)?;
    if registry.is_empty() {
        println!("Reference registry {} is empty.", config.registry_path.display());
        return Ok(());
    }

    println!("Reference genomes in {}:", config.registry_path.display());
    for entry in registry.entries() {
        println!("  {}\t{}", entry.tag, entry.path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seed_genome(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b">chr1\nACGT\n").unwrap();
        path
    }

    #[test]
    fn test_missing_store_loads_empty() {
        let dir = tempdir().unwrap();
        let registry = ReferenceRegistry::load(&dir.path().join("absent.json")).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_upsert_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = dir.path().join("ref_genomes_db.json");
        let genome_a = seed_genome(dir.path(), "A.gb");
        let genome_b = seed_genome(dir.path(), "B.gbk");

        let mut registry = ReferenceRegistry::load(&store).unwrap();
        registry.upsert(&genome_a, "_I_").unwrap();
        registry.upsert(&genome_b, "_R_").unwrap();
        registry.save().unwrap();

        let reloaded = ReferenceRegistry::load(&store).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.entries()[0].tag, "_I_");
        assert_eq!(reloaded.entries()[1].tag, "_R_");
        // Insertion order survives the round trip
        assert_eq!(
            reloaded.entries()[0].path,
            fs::canonicalize(&genome_a).unwrap()
        );
    }

    #[test]
    fn test_reregistering_a_path_replaces_its_tag() {
        let dir = tempdir().unwrap();
        let genome = seed_genome(dir.path(), "A.fa");

        let mut registry = ReferenceRegistry::load(&dir.path().join("db.json")).unwrap();
        registry.upsert(&genome, "old").unwrap();
        registry.upsert(&genome, "new").unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.entries()[0].tag, "new");
    }

    #[test]
    fn test_upsert_rejects_unknown_extension() {
        let dir = tempdir().unwrap();
        let good = seed_genome(dir.path(), "A.fa");
        let bad = seed_genome(dir.path(), "A.txt");

        let mut registry = ReferenceRegistry::load(&dir.path().join("db.json")).unwrap();
        registry.upsert(&good, "_I_").unwrap();
        let err = registry.upsert(&bad, "_B_").unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        // The rejected entry never lands
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.entries()[0].tag, "_I_");
    }

    #[test]
    fn test_upsert_rejects_missing_file_and_empty_tag() {
        let dir = tempdir().unwrap();
        let genome = seed_genome(dir.path(), "A.fa");

        let mut registry = ReferenceRegistry::load(&dir.path().join("db.json")).unwrap();
        assert!(matches!(
            registry.upsert(&dir.path().join("ghost.fa"), "_I_"),
            Err(PipelineError::Validation(_))
        ));
        assert!(matches!(
            registry.upsert(&genome, "   "),
            Err(PipelineError::Validation(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_paths_for_tags_rejects_unknown_tag() {
        let dir = tempdir().unwrap();
        let genome = seed_genome(dir.path(), "A.fa");

        let mut registry = ReferenceRegistry::load(&dir.path().join("db.json")).unwrap();
        registry.upsert(&genome, "_I_").unwrap();

        let err = registry
            .paths_for_tags(&["_Z_".to_string()])
            .unwrap_err();
        match err {
            PipelineError::UnknownTag(tag) => assert_eq!(tag, "_Z_"),
            other => panic!("Expected UnknownTag, got {:?}", other),
        }
    }

    #[test]
    fn test_tags_of_and_paths_for_tags_round() {
        let dir = tempdir().unwrap();
        let genome_a = seed_genome(dir.path(), "A.fa");
        let genome_b = seed_genome(dir.path(), "B.fa");

        let mut registry = ReferenceRegistry::load(&dir.path().join("db.json")).unwrap();
        registry.upsert(&genome_a, "_I_").unwrap();
        registry.upsert(&genome_b, "_R_").unwrap();

        let paths = registry.paths_for_tags(&["_R_".to_string()]).unwrap();
        assert_eq!(paths, vec![fs::canonicalize(&genome_b).unwrap()]);
        assert_eq!(registry.tags_of(&paths), vec!["_R_".to_string()]);
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let store = dir.path().join("nested/deeper/db.json");

        let registry = ReferenceRegistry::load(&store).unwrap();
        registry.save().unwrap();
        assert!(store.is_file());
    }
}
