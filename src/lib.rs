//! Kernel Binary Codegen - build-time embedding of precompiled device kernels
//!
//! # Guarantees
//! 1. Containers are decoded exactly or rejected
//! 2. Every merged location shares one platform descriptor
//! 3. No kernel is silently replaced unless the policy says so
//! 4. Deterministic Output
//! 5. Nothing is written on failure

pub mod container;
pub mod assembler;
pub mod templates;
pub mod hashing;
pub mod config;
pub mod pipeline;

pub use container::{
    decode_container, encode_container, read_container, CompiledKernelMap, ContainerContents,
    ContainerError,
};
pub use assembler::{assemble, AssembleError, AssembledKernels, DuplicateKeyPolicy, KernelAccumulator};
pub use templates::{render_artifact, ArtifactTemplate, COMPILED_PROGRAM_MAP_SYMBOL};
pub use hashing::{canonical_json, compute_manifest_hash, kernel_records, sha256_hex, KernelRecord};
pub use config::CodegenConfig;
pub use pipeline::{
    parse_location_list, write_artifact, BuildManifest, CodegenPipeline, GeneratedArtifact,
    PipelineError,
};

pub const CODEGEN_VERSION: &str = env!("CARGO_PKG_VERSION");
