//! Process-wide registry of open LMDB environments.
//!
//! LMDB forbids opening the same environment twice in one process, so every
//! lexicon component that needs an [`Env`] goes through [`open_env`], which
//! hands back a clone of the already-open environment for a known path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use heed::{Env, EnvOpenOptions};
use once_cell::sync::Lazy;

/// Every environment opened by this process, keyed by canonical path.
static ENVS: Lazy<Mutex<HashMap<PathBuf, Env>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Error opening an environment; callers map it into their own taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum LmdbEnvError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    #[error("Environment registry lock poisoned")]
    Poisoned,
}

/// Open (or reuse) the environment rooted at `path`, creating the directory.
///
/// `map_size_mb` and `max_dbs` only apply to the first open of a path.
pub fn open_env(path: &Path, map_size_mb: usize, max_dbs: u32) -> Result<Env, LmdbEnvError> {
    std::fs::create_dir_all(path)?;
    let canonical = path.canonicalize()?;

    let mut envs = ENVS.lock().map_err(|_| LmdbEnvError::Poisoned)?;
    if let Some(env) = envs.get(&canonical) {
        return Ok(env.clone());
    }

    let env = unsafe {
        EnvOpenOptions::new()
            .map_size(map_size_mb * 1024 * 1024)
            .max_dbs(max_dbs)
            .open(&canonical)
    }
    .map_err(|e| LmdbEnvError::EnvOpen(e.to_string()))?;

    envs.insert(canonical, env.clone());
    Ok(env)
}

/// Whether an LMDB data file has been written at `path`.
pub fn has_data_file(path: &Path) -> bool {
    path.join("data.mdb").is_file()
}
