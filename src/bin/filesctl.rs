//! filesctl - Command line client for the Files API
//!
//! Usage:
//!   filesctl upload docs/a.txt ./a.txt   - Upload or overwrite a file
//!   filesctl list --directory docs/      - List files
//!   filesctl info docs/a.txt             - Show file metadata
//!   filesctl download docs/a.txt         - Print or save a file
//!   filesctl delete docs/a.txt           - Delete a file
//!   filesctl generate poem.txt --prompt "..." --file-type text

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use files_api::config::FilesApiConfig;
use files_api::schemas::{guess_content_type, ListingPage};

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8000";

/// Files API Control Tool
#[derive(Parser)]
#[command(name = "filesctl")]
#[command(about = "Upload, list, and generate files through the Files API", long_about = None)]
struct Cli {
    /// Path to config file, used to find the server address
    #[arg(short, long, default_value = "files-api.toml")]
    config: PathBuf,

    /// API endpoint to connect to (overrides config)
    #[arg(short, long)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file
    Upload {
        /// Destination path in the bucket
        path: String,
        /// Local file to upload
        file: PathBuf,
        /// Content type (guessed from the extension when omitted)
        #[arg(long)]
        content_type: Option<String>,
    },
    /// List files
    List {
        #[arg(long)]
        page_size: Option<usize>,
        #[arg(long)]
        directory: Option<String>,
        #[arg(long)]
        page_token: Option<String>,
        /// Follow next_page_token until the listing is exhausted
        #[arg(long)]
        all: bool,
    },
    /// Show file metadata
    Info { path: String },
    /// Download a file to stdout or a local path
    Download {
        path: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete a file
    Delete { path: String },
    /// Generate a file with AI
    Generate {
        /// Destination path; the extension must match the file type
        path: String,
        #[arg(short, long)]
        prompt: String,
        /// Text, Image, or Text-to-Speech
        #[arg(short = 't', long, default_value = "Text")]
        file_type: String,
    },
    /// Check that the server is up
    Health,
}

// ============ API Response Types ============

#[derive(Debug, Deserialize)]
struct MessageResponse {
    file_path: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    healthy: bool,
    service: String,
    version: String,
}

// ============ Main ============

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let endpoint = resolve_endpoint(&cli);
    let client = reqwest::Client::new();

    let result = match cli.command {
        Commands::Upload { path, file, content_type } => {
            upload(&client, &endpoint, &path, &file, content_type).await
        }
        Commands::List { page_size, directory, page_token, all } => {
            list(&client, &endpoint, page_size, directory, page_token, all).await
        }
        Commands::Info { path } => info(&client, &endpoint, &path).await,
        Commands::Download { path, output } => download(&client, &endpoint, &path, output).await,
        Commands::Delete { path } => delete(&client, &endpoint, &path).await,
        Commands::Generate { path, prompt, file_type } => {
            generate(&client, &endpoint, &path, &prompt, &file_type).await
        }
        Commands::Health => health(&client, &endpoint).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// `--endpoint`, else the configured bind address, else the default
fn resolve_endpoint(cli: &Cli) -> String {
    if let Some(endpoint) = &cli.endpoint {
        return endpoint.trim_end_matches('/').to_string();
    }
    if !cli.config.exists() {
        return DEFAULT_ENDPOINT.to_string();
    }
    match FilesApiConfig::from_file(&cli.config) {
        Ok(config) => {
            let addr = config.server.bind_address;
            if addr.starts_with("0.0.0.0") {
                format!("http://127.0.0.1:{}", addr.split(':').nth(1).unwrap_or("8000"))
            } else {
                format!("http://{}", addr)
            }
        }
        Err(_) => DEFAULT_ENDPOINT.to_string(),
    }
}

fn file_url(endpoint: &str, path: &str) -> String {
    format!("{}/v1/files/{}", endpoint, path.trim_start_matches('/'))
}

/// Turn a non-success response into an error with the server's explanation
async fn check(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if let Some(reason) = response.headers().get("x-error").and_then(|v| v.to_str().ok()) {
        bail!("{} ({})", reason, status);
    }
    let body = response.text().await.unwrap_or_default();
    if body.is_empty() {
        bail!("API error: {}", status);
    }
    bail!("API error: {}: {}", status, body);
}

async fn upload(
    client: &reqwest::Client,
    endpoint: &str,
    path: &str,
    file: &Path,
    content_type: Option<String>,
) -> anyhow::Result<()> {
    let content = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let content_type = content_type
        .or_else(|| guess_content_type(path).map(String::from))
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());

    let part = reqwest::multipart::Part::bytes(content)
        .file_name(file_name)
        .mime_str(&content_type)?;
    let form = reqwest::multipart::Form::new().part("file_content", part);

    let response = check(client.put(file_url(endpoint, path)).multipart(form).send().await?).await?;
    let body: MessageResponse = response.json().await?;
    println!("{}", body.message);
    Ok(())
}

async fn list(
    client: &reqwest::Client,
    endpoint: &str,
    page_size: Option<usize>,
    directory: Option<String>,
    mut page_token: Option<String>,
    all: bool,
) -> anyhow::Result<()> {
    println!("{:<50} {:>12} {:<25}", "FILE PATH", "SIZE", "LAST MODIFIED");
    println!("{}", "-".repeat(89));

    let mut first = true;
    loop {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(size) = page_size {
            query.push(("page_size", size.to_string()));
        }
        match &page_token {
            Some(token) => query.push(("page_token", token.clone())),
            None if first => {
                if let Some(dir) = &directory {
                    query.push(("directory", dir.clone()));
                }
            }
            None => break,
        }
        first = false;

        let url = format!("{}/v1/files", endpoint);
        let response = check(client.get(&url).query(&query).send().await?).await?;
        let page: ListingPage = response.json().await?;

        for file in &page.files {
            println!(
                "{:<50} {:>12} {:<25}",
                file.file_path,
                file.size_bytes,
                file.last_modified.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }

        page_token = page.next_page_token;
        match (&page_token, all) {
            (Some(token), false) => {
                println!();
                println!("Next page token: {}", token);
                break;
            }
            (Some(_), true) => continue,
            (None, _) => break,
        }
    }
    Ok(())
}

async fn info(client: &reqwest::Client, endpoint: &str, path: &str) -> anyhow::Result<()> {
    let response = check(client.head(file_url(endpoint, path)).send().await?).await?;
    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string()
    };

    println!("Path:           {}", path);
    println!("Content-Type:   {}", header("content-type"));
    println!("Content-Length: {}", header("content-length"));
    println!("Last-Modified:  {}", header("last-modified"));
    Ok(())
}

async fn download(
    client: &reqwest::Client,
    endpoint: &str,
    path: &str,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let response = check(client.get(file_url(endpoint, path)).send().await?).await?;
    let content = response.bytes().await?;

    match output {
        Some(output) => {
            tokio::fs::write(&output, &content)
                .await
                .with_context(|| format!("writing {}", output.display()))?;
            println!("Saved {} bytes to {}", content.len(), output.display());
        }
        None => {
            use std::io::Write;
            std::io::stdout().write_all(&content)?;
        }
    }
    Ok(())
}

async fn delete(client: &reqwest::Client, endpoint: &str, path: &str) -> anyhow::Result<()> {
    check(client.delete(file_url(endpoint, path)).send().await?).await?;
    println!("Deleted {}", path);
    Ok(())
}

async fn generate(
    client: &reqwest::Client,
    endpoint: &str,
    path: &str,
    prompt: &str,
    file_type: &str,
) -> anyhow::Result<()> {
    let url = format!("{}/v1/files/generated", endpoint);
    let body = serde_json::json!({
        "file_path": path,
        "prompt": prompt,
        "file_type": file_type,
    });

    let response = client.post(&url).json(&body).send().await?;
    if response.status() == reqwest::StatusCode::BAD_REQUEST {
        let body: MessageResponse = response.json().await?;
        bail!("{}: {}", body.file_path, body.message);
    }
    let body: MessageResponse = check(response).await?.json().await?;
    println!("{}", body.message);
    Ok(())
}

async fn health(client: &reqwest::Client, endpoint: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", endpoint);
    let response = check(client.get(&url).send().await?).await?;
    let health: HealthResponse = response.json().await?;
    println!(
        "{} v{}: {}",
        health.service,
        health.version,
        if health.healthy { "healthy" } else { "unhealthy" }
    );
    Ok(())
}
