//! ImageBuild CLI - JSON bridge to the image pipeline
//!
//! Commands: transforms, get
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 when the build is cancelled

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use uuid::Uuid;

use imagebuild_core::{
    logging::init_logging, Images, ImagePipeline, PipelineConfig, PipelineError,
    SourceDescriptor, TransformOptions, TransformRegistry, ENGINE_VERSION,
};

#[derive(Parser)]
#[command(name = "imagebuild-cli")]
#[command(about = "ImageBuild CLI - Build-time image pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List available transforms
    Transforms,

    /// Process images
    Get {
        /// Source as KIND:PATH, where KIND is `file` or `folder` (repeatable, order kept)
        #[arg(short, long = "source", required = true, value_parser = parse_source)]
        sources: Vec<SourceDescriptor>,

        /// Transform name (omit to copy sources unchanged)
        #[arg(short, long)]
        transform: Option<String>,

        /// JSON object of transform options
        #[arg(short, long)]
        options: Option<String>,

        /// Pipeline config file (JSON)
        #[arg(short, long, conflicts_with = "output_root")]
        config: Option<PathBuf>,

        /// Directory to write non-inlined assets to
        #[arg(long)]
        output_root: Option<PathBuf>,

        /// Largest asset in bytes that is inlined as base64
        #[arg(long)]
        max_inline_size: Option<u64>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BuildReport {
    id: Uuid,
    engine_version: &'static str,
    created_at: DateTime<Utc>,
    images: Images,
}

fn parse_source(value: &str) -> Result<SourceDescriptor, String> {
    let (kind, path) = value
        .split_once(':')
        .ok_or_else(|| format!("expected KIND:PATH, got '{value}'"))?;
    match kind.trim().to_ascii_lowercase().as_str() {
        "file" => Ok(SourceDescriptor::file(path)),
        "folder" => Ok(SourceDescriptor::folder(path)),
        other => Err(format!("unknown source kind '{other}'")),
    }
}

fn parse_options(raw: Option<&str>) -> Result<TransformOptions, String> {
    match raw {
        None => Ok(TransformOptions::new()),
        Some(raw) => match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(_) => Err("options must be a JSON object".to_string()),
            Err(e) => Err(format!("Invalid options: {e}")),
        },
    }
}

fn load_config(
    config: Option<PathBuf>,
    output_root: Option<PathBuf>,
    max_inline_size: Option<u64>,
) -> Result<PipelineConfig, PipelineError> {
    let config = match (config, output_root) {
        (Some(path), _) => PipelineConfig::from_json_file(&path)?,
        (None, Some(root)) => PipelineConfig::new(root),
        (None, None) => PipelineConfig::for_dist_dir("dist"),
    };
    Ok(match max_inline_size {
        Some(size) => config.with_max_inline_size(size),
        None => config,
    })
}

fn print_error(error: impl std::fmt::Display) {
    let output = serde_json::json!({
        "success": false,
        "error": error.to_string(),
    });
    println!("{output}");
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    // A second subscriber can't be installed; nothing else does so here.
    let _ = init_logging(&cli.log_level);

    match cli.command {
        Commands::Transforms => {
            let registry = TransformRegistry::new();
            println!("{}", serde_json::json!(registry.list()));
            ExitCode::SUCCESS
        }

        Commands::Get {
            sources,
            transform,
            options,
            config,
            output_root,
            max_inline_size,
        } => {
            let options = match parse_options(options.as_deref()) {
                Ok(o) => o,
                Err(e) => {
                    print_error(e);
                    return ExitCode::FAILURE;
                }
            };

            let pipeline = load_config(config, output_root, max_inline_size).and_then(|config| {
                config.ensure_output_root()?;
                ImagePipeline::new(config, TransformRegistry::new())
            });
            let mut pipeline = match pipeline {
                Ok(p) => p,
                Err(e) => {
                    print_error(e);
                    return ExitCode::FAILURE;
                }
            };

            match pipeline.get(sources, transform.as_deref(), options).await {
                Ok(images) => {
                    let report = BuildReport {
                        id: Uuid::new_v4(),
                        engine_version: ENGINE_VERSION,
                        created_at: Utc::now(),
                        images,
                    };
                    match serde_json::to_string_pretty(&report) {
                        Ok(json) => {
                            println!("{json}");
                            ExitCode::SUCCESS
                        }
                        Err(e) => {
                            print_error(e);
                            ExitCode::FAILURE
                        }
                    }
                }
                Err(e @ PipelineError::BuildCancelled) => {
                    print_error(e);
                    ExitCode::from(2)
                }
                Err(e) => {
                    print_error(e);
                    ExitCode::FAILURE
                }
            }
        }
    }
}
