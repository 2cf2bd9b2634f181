//! Kernel Binary Codegen CLI
//!
//! Commands: generate, inspect, pack
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 when the inputs are rejected, 1 on usage or I/O problems

use chrono::Utc;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use uuid::Uuid;

use kernelbin_codegen::{
    decode_container, encode_container, kernel_records, parse_location_list, write_artifact,
    AssembleError, CodegenConfig, CodegenPipeline, CompiledKernelMap, ContainerError,
    DuplicateKeyPolicy, PipelineError,
};

const DEFAULT_OUTPUT_PATH: &str = "./codegen/opencl/opencl_compiled_program.cc";

#[derive(Parser)]
#[command(name = "kernelbin-codegen-cli")]
#[command(about = "Embeds precompiled kernel binaries into generated C++ source")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the C++ source from container directories
    Generate {
        /// Comma-separated container directories, in merge order
        #[arg(long, default_value = "")]
        binary_dirs: String,

        /// Container file name inside each directory
        #[arg(long)]
        built_kernel_file_name: Option<String>,

        /// Platform descriptor file name inside each directory
        #[arg(long)]
        platform_info_file_name: Option<String>,

        /// Path of the generated source file
        #[arg(long, default_value = DEFAULT_OUTPUT_PATH)]
        output_path: PathBuf,

        /// JSON config file (CodegenConfig)
        #[arg(long)]
        config: Option<PathBuf>,

        /// C++ namespace wrapping the generated symbols
        #[arg(long)]
        namespace: Option<String>,

        /// reject | allow-identical | last-wins
        #[arg(long)]
        duplicate_policy: Option<DuplicateKeyPolicy>,
    },

    /// Decode one container and list its kernels
    Inspect {
        /// Container file
        container: PathBuf,
    },

    /// Write a container from files
    Pack {
        /// Output container file
        #[arg(short, long)]
        output: PathBuf,

        /// Entries as name=path, in order
        #[arg(short, long = "entry", value_parser = parse_entry)]
        entries: Vec<(String, PathBuf)>,
    },
}

fn parse_entry(s: &str) -> Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected name=path, got '{}'", s)),
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            binary_dirs,
            built_kernel_file_name,
            platform_info_file_name,
            output_path,
            config,
            namespace,
            duplicate_policy,
        } => {
            let mut config = match config {
                Some(path) => match CodegenConfig::load(&path) {
                    Ok(c) => c,
                    Err(e) => return failure(&e.to_string(), ExitCode::FAILURE),
                },
                None => CodegenConfig::default(),
            };
            if let Some(name) = built_kernel_file_name {
                config.built_kernel_file_name = name;
            }
            if let Some(name) = platform_info_file_name {
                config.platform_info_file_name = name;
            }
            if namespace.is_some() {
                config.namespace = namespace;
            }
            if let Some(policy) = duplicate_policy {
                config.duplicate_policy = policy;
            }

            let locations = parse_location_list(&binary_dirs);
            let pipeline = CodegenPipeline::new(config);

            let artifact = match pipeline.generate(&locations) {
                Ok(a) => a,
                Err(e) => return failure(&e.to_string(), exit_code_for(&e)),
            };

            if let Err(e) = write_artifact(&output_path, &artifact) {
                return failure(&e.to_string(), ExitCode::FAILURE);
            }

            let output = serde_json::json!({
                "success": true,
                "run_id": Uuid::new_v4().to_string(),
                "created_at": Utc::now(),
                "output_path": output_path,
                "manifest": artifact.manifest,
            });
            print_json(&output)
        }

        Commands::Inspect { container } => {
            let data = match fs::read(&container) {
                Ok(d) => d,
                Err(e) => {
                    return failure(&format!("cannot read {}: {}", container.display(), e), ExitCode::FAILURE)
                }
            };
            let kernels = match decode_container(&container, &data) {
                Ok(k) => k,
                Err(e) => return failure(&e.to_string(), ExitCode::from(2)),
            };

            print_json(&serde_json::json!({ "success": true, "kernels": kernel_records(&kernels) }))
        }

        Commands::Pack { output, entries } => match pack(&output, &entries) {
            Ok(count) => print_json(&serde_json::json!({
                "success": true,
                "output": output,
                "entries": count,
            })),
            Err(message) => failure(&message, ExitCode::FAILURE),
        },
    }
}

fn pack(output: &Path, entries: &[(String, PathBuf)]) -> Result<usize, String> {
    let mut kernels = CompiledKernelMap::new();
    for (name, path) in entries {
        let data = fs::read(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        if kernels.insert(name.clone(), data).is_some() {
            return Err(format!("duplicate entry '{}'", name));
        }
    }
    let encoded = encode_container(&kernels).map_err(|e| e.to_string())?;
    fs::write(output, encoded).map_err(|e| format!("cannot write {}: {}", output.display(), e))?;
    Ok(kernels.len())
}

/// Rejected inputs exit with 2. Usage, config and I/O problems exit with 1.
fn exit_code_for(error: &PipelineError) -> ExitCode {
    match error {
        PipelineError::Assemble(AssembleError::Container(ContainerError::Io { .. })) => ExitCode::FAILURE,
        PipelineError::Assemble(_) => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}

fn print_json(value: &serde_json::Value) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => failure(&e.to_string(), ExitCode::FAILURE),
    }
}

fn failure(message: &str, code: ExitCode) -> ExitCode {
    log::error!("{}", message);
    eprintln!("error: {}", message);
    let output = serde_json::json!({
        "success": false,
        "error": message,
    });
    println!("{}", output);
    code
}
