//! Codegen Configuration
//!
//! Every field has a default, so an empty JSON object is a valid config.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::assembler::DuplicateKeyPolicy;
use crate::pipeline::PipelineError;

pub const DEFAULT_BUILT_KERNEL_FILE_NAME: &str = "opencl_compiled_kernel.bin";
pub const DEFAULT_PLATFORM_INFO_FILE_NAME: &str = "opencl_platform_info.txt";
pub const DEFAULT_BYTES_PER_LINE: usize = 12;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CodegenConfig {
    #[serde(default = "default_built_kernel_file_name")]
    pub built_kernel_file_name: String,
    #[serde(default = "default_platform_info_file_name")]
    pub platform_info_file_name: String,
    #[serde(default)]
    pub duplicate_policy: DuplicateKeyPolicy,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default = "default_bytes_per_line")]
    pub bytes_per_line: usize,
}

fn default_built_kernel_file_name() -> String { DEFAULT_BUILT_KERNEL_FILE_NAME.to_string() }
fn default_platform_info_file_name() -> String { DEFAULT_PLATFORM_INFO_FILE_NAME.to_string() }
fn default_bytes_per_line() -> usize { DEFAULT_BYTES_PER_LINE }

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            built_kernel_file_name: default_built_kernel_file_name(),
            platform_info_file_name: default_platform_info_file_name(),
            duplicate_policy: DuplicateKeyPolicy::default(),
            namespace: None,
            bytes_per_line: default_bytes_per_line(),
        }
    }
}

impl CodegenConfig {
    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            PipelineError::Config(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.check()?;
        Ok(config)
    }

    pub fn check(&self) -> Result<(), PipelineError> {
        if self.built_kernel_file_name.is_empty() {
            return Err(PipelineError::Config("builtKernelFileName is empty".into()));
        }
        if self.platform_info_file_name.is_empty() {
            return Err(PipelineError::Config("platformInfoFileName is empty".into()));
        }
        if self.bytes_per_line == 0 {
            return Err(PipelineError::Config("bytesPerLine must be at least 1".into()));
        }
        if let Some(ns) = &self.namespace {
            if !is_qualified_identifier(ns) {
                return Err(PipelineError::Config(format!(
                    "namespace '{}' is not a C++ identifier path (ident or ident::ident)",
                    ns
                )));
            }
        }
        Ok(())
    }
}

/// `ident(::ident)*` with ASCII identifiers.
fn is_qualified_identifier(text: &str) -> bool {
    text.split("::").all(|part| {
        let mut chars = part.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config: CodegenConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CodegenConfig::default());
        assert_eq!(config.duplicate_policy, DuplicateKeyPolicy::Reject);
    }

    #[test]
    fn test_camel_case_fields() {
        let config: CodegenConfig = serde_json::from_str(
            r#"{"builtKernelFileName": "k.bin", "duplicatePolicy": "allow-identical", "namespace": "gpu"}"#,
        )
        .unwrap();
        assert_eq!(config.built_kernel_file_name, "k.bin");
        assert_eq!(config.duplicate_policy, DuplicateKeyPolicy::AllowIdentical);
        assert_eq!(config.namespace.as_deref(), Some("gpu"));
        assert_eq!(config.platform_info_file_name, DEFAULT_PLATFORM_INFO_FILE_NAME);
    }

    #[test]
    fn test_namespace_must_be_identifier_path() {
        for ok in ["gpu", "_k", "vendor::gpu_v2"] {
            let config = CodegenConfig { namespace: Some(ok.to_string()), ..Default::default() };
            assert!(config.check().is_ok(), "{} should be accepted", ok);
        }
        for bad in ["", "a b", "2gpu", "a::", "::a", "a:b", "gpu;int x"] {
            let config = CodegenConfig { namespace: Some(bad.to_string()), ..Default::default() };
            assert!(config.check().is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_zero_bytes_per_line_rejected() {
        let config = CodegenConfig { bytes_per_line: 0, ..Default::default() };
        assert!(config.check().is_err());
    }
}
