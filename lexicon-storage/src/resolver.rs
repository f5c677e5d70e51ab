//! Path resolution: which locations a namespace is read from and written to.

use std::path::{Path, PathBuf};

use lexicon_core::{Namespace, StorageConfig};

use crate::Location;

/// Sub-directory of a job's data directory holding its cache output.
pub const JOB_CACHE_DIR: &str = "cache";

/// Maps a namespace to its storage locations.
pub trait PathResolver: Send + Sync {
    /// Every location to merge when loading, in read order.
    fn read_locations(&self, namespace: &Namespace) -> Vec<Location>;

    /// The single location this job writes to.
    fn write_location(&self, namespace: &Namespace) -> Location;
}

/// Resolver driven by a list of upstream cache roots and one output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfiguredPathResolver {
    cache_roots: Vec<PathBuf>,
    output_root: PathBuf,
}

impl ConfiguredPathResolver {
    pub fn new(cache_roots: Vec<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_roots,
            output_root: output_root.into(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.cache_paths.clone(), config.output_path.clone())
    }

    /// Derive one cache root per upstream job directory (`<input>/cache`).
    pub fn for_job_inputs<I, P>(inputs: I, output_root: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let cache_roots = inputs
            .into_iter()
            .map(|input| input.as_ref().join(JOB_CACHE_DIR))
            .collect();
        Self::new(cache_roots, output_root)
    }

    pub fn cache_roots(&self) -> &[PathBuf] {
        &self.cache_roots
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }
}

impl PathResolver for ConfiguredPathResolver {
    fn read_locations(&self, namespace: &Namespace) -> Vec<Location> {
        let mut locations: Vec<Location> = Vec::with_capacity(self.cache_roots.len() + 1);
        let roots = self
            .cache_roots
            .iter()
            .map(PathBuf::as_path)
            .chain(std::iter::once(self.output_root.as_path()));

        for root in roots {
            let location = Location::for_namespace(root, namespace);
            if !locations.contains(&location) {
                locations.push(location);
            }
        }
        locations
    }

    fn write_location(&self, namespace: &Namespace) -> Location {
        Location::for_namespace(&self.output_root, namespace)
    }
}
