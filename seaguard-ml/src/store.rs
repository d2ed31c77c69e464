//! Filesystem artifact store
//!
//! Layout: `<root>/<target>/v000001.artifact`, one immutable file per
//! version. Publishing writes a temporary file and hard-links it into its
//! version slot; the link fails if the slot exists, so a published version
//! is never overwritten. A writer that loses the race moves on to the next
//! free version.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use seaguard_core::ModelTarget;

use crate::artifact::ModelArtifact;
use crate::{MLError, MLResult};

const EXTENSION: &str = "artifact";
const MAX_PUBLISH_ATTEMPTS: u32 = 8;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    locks: Mutex<HashMap<ModelTarget, Arc<Mutex<()>>>>,
}

impl ArtifactStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> MLResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| unavailable(&root, e))?;

        // the root must be writable, not just present
        let marker = root.join(format!(".write-check-{}", std::process::id()));
        fs::write(&marker, b"").map_err(|e| unavailable(&root, e))?;
        let _ = fs::remove_file(&marker);

        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target_dir(&self, target: ModelTarget) -> PathBuf {
        self.root.join(target.name())
    }

    fn version_path(&self, target: ModelTarget, version: u32) -> PathBuf {
        self.target_dir(target).join(format!("v{:06}.{}", version, EXTENSION))
    }

    /// Published versions of `target`, ascending
    pub fn versions(&self, target: ModelTarget) -> MLResult<Vec<u32>> {
        let dir = self.target_dir(target);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(unavailable(&dir, e)),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| unavailable(&dir, e))?;
            let name = entry.file_name();
            let parsed = name
                .to_str()
                .and_then(|n| n.strip_suffix(&format!(".{}", EXTENSION)))
                .and_then(|n| n.strip_prefix('v'))
                .and_then(|n| n.parse::<u32>().ok());
            if let Some(version) = parsed {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    pub fn load(&self, target: ModelTarget, version: u32) -> MLResult<ModelArtifact> {
        let path = self.version_path(target, version);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(MLError::NotFound(format!("{} v{}", target, version)))
            }
            Err(e) => return Err(unavailable(&path, e)),
        };
        let artifact = ModelArtifact::from_bytes(&bytes)?;
        if artifact.target() != target || artifact.version() != version {
            return Err(MLError::CorruptArtifact(format!(
                "{} holds {} v{}",
                path.display(),
                artifact.target(),
                artifact.version()
            )));
        }
        Ok(artifact)
    }

    /// Highest published version of `target`, if any
    pub fn latest(&self, target: ModelTarget) -> MLResult<Option<ModelArtifact>> {
        match self.versions(target)?.last() {
            Some(&version) => self.load(target, version).map(Some),
            None => Ok(None),
        }
    }

    /// Persist `artifact` under the next free version and return it with
    /// that version set
    pub fn publish(&self, mut artifact: ModelArtifact) -> MLResult<ModelArtifact> {
        let target = artifact.target();
        let dir = self.target_dir(target);
        fs::create_dir_all(&dir).map_err(|e| unavailable(&dir, e))?;

        let mut version = self.versions(target)?.last().map_or(1, |v| v + 1);
        for _ in 0..MAX_PUBLISH_ATTEMPTS {
            artifact.header.version = version;
            let bytes = artifact.to_bytes()?;
            let temp = self.write_temp(&dir, &bytes)?;
            let slot = self.version_path(target, version);

            let linked = fs::hard_link(&temp, &slot);
            let _ = fs::remove_file(&temp);
            match linked {
                Ok(()) => {
                    log::info!("{}: published v{} to {}", target, version, slot.display());
                    return ModelArtifact::from_bytes(&bytes);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    log::warn!("{}: v{} already published, trying v{}", target, version, version + 1);
                    version += 1;
                }
                Err(e) => return Err(unavailable(&slot, e)),
            }
        }
        Err(MLError::Conflict { target, version })
    }

    fn write_temp(&self, dir: &Path, bytes: &[u8]) -> MLResult<PathBuf> {
        let path = dir.join(format!(
            ".tmp-{}-{}",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let mut file = fs::File::create(&path).map_err(|e| unavailable(&path, e))?;
        file.write_all(bytes).map_err(|e| unavailable(&path, e))?;
        file.sync_all().map_err(|e| unavailable(&path, e))?;
        Ok(path)
    }

    /// Run `f` while holding the in-process lock for `target`
    ///
    /// Trainers of the same target serialize here; other targets are not
    /// blocked.
    pub fn exclusive<T, F>(&self, target: ModelTarget, f: F) -> MLResult<T>
    where
        F: FnOnce() -> MLResult<T>,
    {
        let lock = {
            let mut locks = self.locks.lock().map_err(|_| MLError::LockPoisoned)?;
            Arc::clone(locks.entry(target).or_default())
        };
        let _guard = lock.lock().map_err(|_| MLError::LockPoisoned)?;
        f()
    }
}

fn unavailable(path: &Path, e: io::Error) -> MLError {
    MLError::StoreUnavailable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}
