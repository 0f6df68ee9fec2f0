//! The symbol archive registry: a process-wide mapping from binary identity
//! to the on-disk archive that can symbolicate that binary.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use debugid::DebugId;
use rustc_hash::FxHashMap;

use crate::error::Error;
use crate::subprocess::{self, CommandRunner};

/// A debug-symbol archive on disk, plus the binary identities it covers.
/// An archive can cover multiple slices (one per architecture). Never
/// mutated after import.
#[derive(Debug, Clone)]
pub struct SymbolArchive {
    pub path: PathBuf,
    pub uuids: Vec<DebugId>,
}

/// Maps binary identities to symbol archives.
///
/// One registry is constructed at startup and shared with everything that
/// imports or looks up archives; all access goes through a single lock, so
/// concurrent imports and lookups from queued units of work are safe.
pub struct DsymRegistry {
    runner: Arc<dyn CommandRunner>,
    archives: Mutex<FxHashMap<DebugId, Arc<SymbolArchive>>>,
}

impl DsymRegistry {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        DsymRegistry {
            runner,
            archives: Mutex::new(FxHashMap::default()),
        }
    }

    /// Imports a candidate symbol archive.
    ///
    /// Runs the UUID extractor against the path; a candidate with no UUIDs
    /// is rejected as not a symbol archive. Otherwise every found identity
    /// is registered pointing at this path, replacing any earlier mapping
    /// for the same identity (last import wins). Returns the imported
    /// identities.
    pub fn import_archive(&self, path: &Path) -> Result<Vec<DebugId>, Error> {
        let uuids = subprocess::archive_uuids(&*self.runner, path).unwrap_or_default();
        if uuids.is_empty() {
            return Err(Error::NotASymbolArchive(path.to_owned()));
        }
        log::info!(
            "Imported {} with {} identities",
            path.display(),
            uuids.len()
        );
        let archive = Arc::new(SymbolArchive {
            path: path.to_owned(),
            uuids: uuids.clone(),
        });
        let mut archives = self.archives.lock().unwrap();
        for uuid in &uuids {
            archives.insert(*uuid, archive.clone());
        }
        Ok(uuids)
    }

    /// Returns the archive currently registered for `debug_id`, if any.
    pub fn lookup(&self, debug_id: &DebugId) -> Option<Arc<SymbolArchive>> {
        self.archives.lock().unwrap().get(debug_id).cloned()
    }
}
