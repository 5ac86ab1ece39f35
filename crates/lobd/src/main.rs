//! `lobd` — the git-lob content server.
//!
//! Speaks the NUL-terminated JSON request protocol over stdin/stdout, the
//! way a remote invokes it behind ssh:
//!
//! ```text
//! lobd                          # serve the default base path
//! lobd -c serve.toml            # serve with a config file
//! lobd --base-dir /srv/git-lob  # override the content root
//! ```

mod config;
mod telemetry;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use lob_serve::ServeConfig;
use tokio::io::BufReader;
use tracing::info;

use config::CliConfig;

#[derive(Parser)]
#[command(name = "lobd", version, about = "git-lob content server")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Content root, overriding the configured base path.
    #[arg(short, long)]
    base_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref()).context("loading configuration")?;
    telemetry::init(&config.log.level);

    let base_path = cli.base_dir.unwrap_or(config.storage.base_path);
    std::fs::create_dir_all(&base_path)
        .with_context(|| format!("creating content root {}", base_path.display()))?;
    let serve_config = ServeConfig::new(&base_path);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting runtime")?;

    let code = runtime.block_on(async {
        info!(root = %base_path.display(), "serving content");
        lob_serve::serve(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            tokio::io::stderr(),
            &serve_config,
        )
        .await
    });

    std::process::exit(code);
}
