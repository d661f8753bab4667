//! Files API - HTTP file storage over S3 with AI-generated content

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use files_api::api::HttpServer;
use files_api::config::{FilesApiConfig, StorageBackend};
use files_api::error::Result;

/// Files API - HTTP file storage over S3 with AI-generated content
#[derive(Parser)]
#[command(name = "files-api")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "files-api.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Override the configured bind address
        #[arg(short, long)]
        bind: Option<String>,

        /// Keep files in memory instead of S3
        #[arg(long)]
        memory: bool,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "files-api.toml")]
        output: PathBuf,

        /// Bucket holding the files
        #[arg(long, default_value = "files-api")]
        bucket: String,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind, memory } => run_serve(cli.config, cli.log_level, bind, memory).await,
        Commands::Init { output, bucket } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"), "pretty");
            run_init(output, bucket)
        }
        Commands::Validate => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"), "pretty");
            run_validate(cli.config)
        }
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Start the HTTP server
async fn run_serve(
    config_path: PathBuf,
    log_level: Option<String>,
    bind: Option<String>,
    memory: bool,
) -> Result<()> {
    let mut config = match FilesApiConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration from {:?}: {}", config_path, e);
            eprintln!("Run `files-api init` to create one");
            return Err(e);
        }
    };

    if let Some(bind) = bind {
        config.server.bind_address = bind;
    }
    if memory {
        config.storage.backend = StorageBackend::Memory;
    }

    let level = log_level.unwrap_or_else(|| config.logging.level.clone());
    init_logging(&level, &config.logging.format);

    tracing::info!("Starting Files API v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Storage backend: {:?}, bucket: {}",
        config.storage.backend,
        config.storage.bucket
    );

    let server = HttpServer::from_config(&config)?;
    server.start().await
}

/// Write a default configuration file
fn run_init(output: PathBuf, bucket: String) -> Result<()> {
    if output.exists() {
        tracing::error!("Refusing to overwrite existing file {:?}", output);
        return Err(files_api::Error::Config(format!(
            "{} already exists",
            output.display()
        )));
    }

    let mut config = FilesApiConfig::default();
    config.storage.bucket = bucket;
    config.save(&output)?;

    println!("Created configuration file: {:?}", output);
    println!();
    println!("Next steps:");
    println!("  1. Set storage.bucket and storage.region for your S3 bucket");
    println!("  2. Set OPENAI_API_KEY (or generation.api_key_secret_name)");
    println!("  3. Start the server: files-api --config {:?} serve", output);

    Ok(())
}

/// Validate configuration file
fn run_validate(config_path: PathBuf) -> Result<()> {
    match FilesApiConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Bind Address: {}", config.server.bind_address);
            println!("  Storage:      {:?} ({})", config.storage.backend, config.storage.bucket);
            println!("  Region:       {}", config.storage.region);
            if let Some(endpoint) = &config.storage.endpoint {
                println!("  Endpoint:     {}", endpoint);
            }
            let key_source = match (&config.generation.api_key, &config.generation.api_key_secret_name) {
                (Some(_), _) => "static key".to_string(),
                (None, Some(name)) => format!("secret {}", name),
                (None, None) => "none".to_string(),
            };
            println!("  Generation:   {} (key: {})", config.generation.base_url, key_source);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}
