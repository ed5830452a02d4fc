//! Compiled synthdefs available to play, and their sources.

use crate::error::SessionError;
use rand::seq::IndexedRandom;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const SYNTHDEF_EXT: &str = "scsyndef";
const SOURCE_EXT: &str = "scd";

#[derive(Debug, Clone)]
pub struct SynthCatalog {
    synthdef_dir: PathBuf,
    source_dir: PathBuf,
}

impl SynthCatalog {
    pub fn new(synthdef_dir: impl Into<PathBuf>, source_dir: impl Into<PathBuf>) -> Self {
        Self {
            synthdef_dir: synthdef_dir.into(),
            source_dir: source_dir.into(),
        }
    }

    pub fn synthdef_dir(&self) -> &Path {
        &self.synthdef_dir
    }

    /// Basenames of every `*.scsyndef` in the synthdef dir, sorted.
    pub fn synthdefs(&self) -> Result<Vec<String>, SessionError> {
        let entries = std::fs::read_dir(&self.synthdef_dir)
            .map_err(|_| SessionError::NoSynthDefs(self.synthdef_dir.clone()))?;

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == SYNTHDEF_EXT))
            .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        Ok(names)
    }

    /// A uniformly random synthdef id.
    pub fn pick_random(&self) -> Result<String, SessionError> {
        let names = self.synthdefs()?;
        names
            .choose(&mut rand::rng())
            .cloned()
            .ok_or_else(|| SessionError::NoSynthDefs(self.synthdef_dir.clone()))
    }

    /// Locate the `.scd` source for a synthdef id.
    ///
    /// Generated ids look like `provider-model-name-<timestamp>` and their
    /// source file is named after the timestamp; anything shorter is matched
    /// on the whole id.
    pub fn find_source(&self, synth_id: &str) -> Result<PathBuf, SessionError> {
        let pattern = source_search_pattern(synth_id);

        WalkDir::new(&self.source_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().is_some_and(|ext| ext == SOURCE_EXT))
            .find(|path| path.to_string_lossy().contains(pattern))
            .ok_or_else(|| SessionError::SynthCodeNotFound(synth_id.to_string()))
    }

    pub fn read_source(&self, synth_id: &str) -> Result<String, SessionError> {
        let path = self.find_source(synth_id)?;
        std::fs::read_to_string(&path)
            .map_err(|e| SessionError::SynthCodeNotFound(format!("{} ({}: {})", synth_id, path.display(), e)))
    }
}

fn source_search_pattern(synth_id: &str) -> &str {
    let parts: Vec<&str> = synth_id.split('-').collect();
    if parts.len() >= 4 {
        parts[parts.len() - 1]
    } else {
        synth_id
    }
}
