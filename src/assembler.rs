//! Artifact Assembler - Merge Step
//!
//! Folds every location into one `KernelAccumulator`. Location order decides
//! key order and which descriptor is adopted first.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::container::{read_container, CompiledKernelMap, ContainerContents, ContainerError};

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error("Platform mismatch at {location}: expected {expected:?}, found {found:?}")]
    PlatformMismatch {
        expected: String,
        found: String,
        location: PathBuf,
    },

    #[error("Duplicate kernel '{key}': first in {first}, again in {second}")]
    DuplicateKeyConflict {
        key: String,
        first: PathBuf,
        second: PathBuf,
    },
}

/// What to do when two locations provide the same kernel identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateKeyPolicy {
    /// Any repeated key is fatal.
    #[default]
    Reject,
    /// Repeats are fine when the binaries are byte-identical.
    AllowIdentical,
    /// Later locations overwrite earlier ones.
    LastWins,
}

impl std::str::FromStr for DuplicateKeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reject" => Ok(Self::Reject),
            "allow-identical" => Ok(Self::AllowIdentical),
            "last-wins" => Ok(Self::LastWins),
            other => Err(format!("unknown duplicate policy '{}'", other)),
        }
    }
}

/// Everything the render step needs, plus provenance for the manifest.
#[derive(Debug, Clone, Default)]
pub struct AssembledKernels {
    pub kernels: CompiledKernelMap,
    pub descriptor: String,
    pub contributing: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// Accumulator threaded through the fold over locations.
#[derive(Debug, Default)]
pub struct KernelAccumulator {
    assembled: AssembledKernels,
    /// Location that supplied each key, parallel to `assembled.kernels`.
    origins: Vec<PathBuf>,
    policy: DuplicateKeyPolicy,
}

impl KernelAccumulator {
    pub fn new(policy: DuplicateKeyPolicy) -> Self {
        Self { policy, ..Default::default() }
    }

    pub fn skip(mut self, location: &Path) -> Self {
        log::debug!("no container in {}, skipping", location.display());
        self.assembled.skipped.push(location.to_path_buf());
        self
    }

    /// Merge one decoded location.
    pub fn merge(mut self, location: &Path, contents: ContainerContents) -> Result<Self, AssembleError> {
        let ContainerContents { kernels, descriptor } = contents;

        // An empty descriptor is replaced by the first non-empty one.
        if self.assembled.descriptor.is_empty() {
            self.assembled.descriptor = descriptor;
        } else if self.assembled.descriptor != descriptor {
            return Err(AssembleError::PlatformMismatch {
                expected: self.assembled.descriptor,
                found: descriptor,
                location: location.to_path_buf(),
            });
        }

        let count = kernels.len();
        for (key, value) in kernels {
            self.merge_kernel(location, key, value)?;
        }

        log::info!("merged {} kernels from {}", count, location.display());
        self.assembled.contributing.push(location.to_path_buf());
        Ok(self)
    }

    fn merge_kernel(&mut self, location: &Path, key: String, value: Vec<u8>) -> Result<(), AssembleError> {
        let identical = match self.assembled.kernels.get(&key) {
            None => {
                self.assembled.kernels.insert(key, value);
                self.origins.push(location.to_path_buf());
                return Ok(());
            }
            Some(existing) => existing == value.as_slice(),
        };

        let position = self.assembled.kernels.keys().position(|k| k == key);
        let first = position.map(|i| self.origins[i].clone()).unwrap_or_default();

        match self.policy {
            DuplicateKeyPolicy::AllowIdentical if identical => {
                log::debug!("identical duplicate '{}' in {}", key, location.display());
                Ok(())
            }
            DuplicateKeyPolicy::LastWins => {
                log::warn!(
                    "kernel '{}' from {} overwritten by {}",
                    key,
                    first.display(),
                    location.display()
                );
                if let Some(i) = position {
                    self.origins[i] = location.to_path_buf();
                }
                self.assembled.kernels.insert(key, value);
                Ok(())
            }
            _ => Err(AssembleError::DuplicateKeyConflict {
                key,
                first,
                second: location.to_path_buf(),
            }),
        }
    }

    pub fn finish(self) -> AssembledKernels {
        self.assembled
    }
}

/// Read and merge every location in order. The first error aborts the run.
pub fn assemble(
    locations: &[PathBuf],
    container_name: &str,
    descriptor_name: &str,
    policy: DuplicateKeyPolicy,
) -> Result<AssembledKernels, AssembleError> {
    let acc = locations.iter().try_fold(KernelAccumulator::new(policy), |acc, location| {
        match read_container(location, container_name, descriptor_name)? {
            Some(contents) => acc.merge(location, contents),
            None => Ok(acc.skip(location)),
        }
    })?;

    let assembled = acc.finish();
    log::info!(
        "assembled {} kernels from {} of {} locations",
        assembled.kernels.len(),
        assembled.contributing.len(),
        locations.len()
    );
    Ok(assembled)
}
