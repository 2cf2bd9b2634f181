//! Artifact Template - C++ Source Emission
//!
//! The symbol names and element type are a link-time contract with the
//! runtime that consumes the generated file. Renaming them breaks linkage.

use std::fmt::Write;

use crate::assembler::AssembledKernels;
use crate::config::{CodegenConfig, DEFAULT_BYTES_PER_LINE};

pub const COMPILED_PROGRAM_MAP_SYMBOL: &str = "kCompiledProgramMap";
pub const COMPILED_PROGRAM_PLATFORM_SYMBOL: &str = "kCompiledProgramPlatform";
pub const ELEMENT_TYPE: &str = "unsigned char";

const ARRAY_PREFIX: &str = "kCompiledProgram_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactTemplate {
    pub namespace: Option<String>,
    pub bytes_per_line: usize,
}

impl Default for ArtifactTemplate {
    fn default() -> Self {
        Self { namespace: None, bytes_per_line: DEFAULT_BYTES_PER_LINE }
    }
}

impl From<&CodegenConfig> for ArtifactTemplate {
    fn from(config: &CodegenConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            bytes_per_line: config.bytes_per_line.max(1),
        }
    }
}

/// Render the merged kernels as C++ source text.
pub fn render_artifact(assembled: &AssembledKernels, template: &ArtifactTemplate) -> String {
    let per_line = template.bytes_per_line.max(1);
    let mut out = String::new();

    out.push_str("// This is a generated file. DO NOT EDIT!\n");
    if let Some(text) = comment_text(&assembled.descriptor) {
        let _ = writeln!(out, "// Platform: {}", text);
    }
    out.push_str("\n#include <map>\n#include <string>\n#include <vector>\n\n");

    if let Some(ns) = &template.namespace {
        let _ = writeln!(out, "namespace {} {{\n", ns);
    }

    for (i, (_, value)) in assembled.kernels.iter().enumerate() {
        if value.is_empty() {
            continue;
        }
        let _ = writeln!(out, "static const {} {}{}[] = {{", ELEMENT_TYPE, ARRAY_PREFIX, i);
        for chunk in value.chunks(per_line) {
            let line: Vec<String> = chunk.iter().map(|b| hex_literal(*b)).collect();
            let _ = writeln!(out, "  {},", line.join(", "));
        }
        out.push_str("};\n\n");
    }

    let _ = writeln!(
        out,
        "extern const std::map<std::string, std::vector<{}>> {} = {{",
        ELEMENT_TYPE, COMPILED_PROGRAM_MAP_SYMBOL
    );
    for (i, (key, value)) in assembled.kernels.iter().enumerate() {
        if value.is_empty() {
            let _ = writeln!(out, "  {{{}, std::vector<{}>()}},", string_literal(key), ELEMENT_TYPE);
        } else {
            let array = format!("{}{}", ARRAY_PREFIX, i);
            let _ = writeln!(
                out,
                "  {{{}, std::vector<{}>({}, {} + sizeof({}))}},",
                string_literal(key),
                ELEMENT_TYPE,
                array,
                array,
                array
            );
        }
    }
    out.push_str("};\n\n");

    let _ = writeln!(
        out,
        "extern const std::string {} = {};",
        COMPILED_PROGRAM_PLATFORM_SYMBOL,
        string_literal(&assembled.descriptor)
    );

    if let Some(ns) = &template.namespace {
        let _ = writeln!(out, "\n}}  // namespace {}", ns);
    }

    out
}

/// First line of `text`, safe to place after `//`.
///
/// Compilers end a line comment at a bare CR as well as LF, and a trailing
/// backslash (or `??/`) splices the next line into the comment.
fn comment_text(text: &str) -> Option<String> {
    let first = text.split(['\r', '\n']).next().unwrap_or("");
    let printable: String = first
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '.' })
        .collect();
    let trimmed = printable.trim_end_matches(|c: char| c == '\\' || c == '/' || c == '?' || c == ' ');
    if trimmed.trim().is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Canonical per-byte literal: lowercase, always two digits.
pub fn hex_literal(byte: u8) -> String {
    format!("0x{:02x}", byte)
}

/// Quote as a C++ string literal that reproduces the exact bytes.
///
/// Octal escapes are always three digits so a following digit cannot extend them.
pub fn string_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for byte in text.bytes() {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            // '?' avoids trigraphs
            b'?' => out.push_str("\\?"),
            0x20..=0x7e => out.push(byte as char),
            _ => {
                let _ = write!(out, "\\{:03o}", byte);
            }
        }
    }
    out.push('"');
    out
}
