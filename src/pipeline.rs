//! Codegen Pipeline - Single Entry Point
//!
//! assemble -> render -> manifest. Nothing touches the output path unless
//! every step succeeded.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::assembler::{assemble, AssembleError, AssembledKernels};
use crate::config::CodegenConfig;
use crate::hashing::{compute_manifest_hash, kernel_records, sha256_hex, KernelRecord};
use crate::templates::{render_artifact, ArtifactTemplate, COMPILED_PROGRAM_MAP_SYMBOL};
use crate::CODEGEN_VERSION;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Assemble(#[from] AssembleError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot write {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Reproducible description of one run. Contains no timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub codegen_version: String,
    pub symbol: String,
    pub descriptor: String,
    pub contributing_locations: Vec<PathBuf>,
    pub skipped_locations: Vec<PathBuf>,
    pub kernels: Vec<KernelRecord>,
    pub artifact_sha256: String,
    pub manifest_hash: String,
}

#[derive(Debug, Clone)]
pub struct GeneratedArtifact {
    pub source: String,
    pub assembled: AssembledKernels,
    pub manifest: BuildManifest,
}

pub struct CodegenPipeline {
    config: CodegenConfig,
}

impl CodegenPipeline {
    pub fn new(config: CodegenConfig) -> Self {
        Self { config }
    }

    /// Build the artifact from `locations`, in order.
    pub fn generate(&self, locations: &[PathBuf]) -> Result<GeneratedArtifact, PipelineError> {
        self.config.check()?;

        let assembled = assemble(
            locations,
            &self.config.built_kernel_file_name,
            &self.config.platform_info_file_name,
            self.config.duplicate_policy,
        )?;

        let source = render_artifact(&assembled, &ArtifactTemplate::from(&self.config));
        let manifest = build_manifest(&assembled, &source)?;

        Ok(GeneratedArtifact { source, assembled, manifest })
    }
}

impl Default for CodegenPipeline {
    fn default() -> Self {
        Self::new(CodegenConfig::default())
    }
}

fn build_manifest(assembled: &AssembledKernels, source: &str) -> Result<BuildManifest, PipelineError> {
    let mut manifest = BuildManifest {
        codegen_version: CODEGEN_VERSION.to_string(),
        symbol: COMPILED_PROGRAM_MAP_SYMBOL.to_string(),
        descriptor: assembled.descriptor.clone(),
        contributing_locations: assembled.contributing.clone(),
        skipped_locations: assembled.skipped.clone(),
        kernels: kernel_records(&assembled.kernels),
        artifact_sha256: sha256_hex(source.as_bytes()),
        manifest_hash: String::new(), // Computed after
    };
    manifest.manifest_hash = compute_manifest_hash(&manifest)?;
    Ok(manifest)
}

/// Replace whatever is at `path` with the artifact text.
pub fn write_artifact(path: &Path, artifact: &GeneratedArtifact) -> Result<(), PipelineError> {
    let output_err = |source| PipelineError::Output { path: path.to_path_buf(), source };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(output_err)?;
    }
    if path.is_file() {
        fs::remove_file(path).map_err(output_err)?;
    }
    fs::write(path, &artifact.source).map_err(output_err)?;

    log::info!("wrote {} ({} bytes)", path.display(), artifact.source.len());
    Ok(())
}

/// Split a comma-separated location list, dropping empty segments.
pub fn parse_location_list(list: &str) -> Vec<PathBuf> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_location_list() {
        assert_eq!(
            parse_location_list(" a, b,,c ,"),
            vec![PathBuf::from("a"), PathBuf::from("b"), PathBuf::from("c")]
        );
        assert!(parse_location_list("").is_empty());
    }

    #[test]
    fn test_generate_with_no_locations() {
        let artifact = CodegenPipeline::default().generate(&[]).unwrap();
        assert!(artifact.assembled.kernels.is_empty());
        assert!(artifact.source.contains("kCompiledProgramMap = {\n};"));
        assert!(artifact.manifest.kernels.is_empty());
        assert_eq!(artifact.manifest.artifact_sha256, sha256_hex(artifact.source.as_bytes()));
    }

    #[test]
    fn test_manifest_hash_excludes_itself() {
        let artifact = CodegenPipeline::default().generate(&[]).unwrap();
        let mut manifest = artifact.manifest.clone();
        manifest.manifest_hash = String::new();
        assert_eq!(compute_manifest_hash(&manifest).unwrap(), artifact.manifest.manifest_hash);
    }
}
