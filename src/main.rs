//! Pipehook CLI

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::Context;
use pipehook::app::App;
use pipehook::config::Config;
use pipehook::network::Server;
use tracing_subscriber::EnvFilter;

fn usage() -> ! {
    eprintln!("Pipehook v{}", env!("CARGO_PKG_VERSION"));
    eprintln!();
    eprintln!("Usage: pipehook <command> [options]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  serve [config.toml]        Start the capture server");
    eprintln!("  check-config <config.toml> Validate a configuration file");
    eprintln!();
    eprintln!("Environment: PORT, DATABASE_PATH, MAX_BODY_SIZE, RUST_LOG");
    process::exit(1);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1) else { usage() };

    match command.as_str() {
        "serve" => {
            init_tracing();
            serve(args.get(2).map(PathBuf::from).as_deref()).await
        }
        "check-config" => {
            let Some(path) = args.get(2) else {
                eprintln!("Usage: pipehook check-config <config.toml>");
                process::exit(1);
            };
            let config = Config::load(Some(Path::new(path)))
                .with_context(|| format!("invalid configuration {path}"))?;
            println!("Configuration OK");
            println!("  listen_addr: {}", config.listen_addr);
            println!("  storage:     {:?}", config.storage.backend);
            if let Some(path) = &config.storage.path {
                println!("  journal:     {}", path.display());
            }
            println!("  max body:    {} bytes", config.limits.max_body_size);
            Ok(())
        }
        "-h" | "--help" | "help" => usage(),
        _ => {
            eprintln!("Unknown command: {command}");
            eprintln!("Run 'pipehook' for usage information.");
            process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path).context("failed to load configuration")?;
    let app = App::from_config(config).context("failed to open storage")?;

    let server = Server::bind(Arc::new(app))
        .await
        .context("failed to bind listener")?;
    server.run().await.context("server failed")?;
    Ok(())
}
