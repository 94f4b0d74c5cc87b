use anyhow::Result;
use clap::Parser;
use std::io::{self, Write};
use taskscope::{cli::Cli, config::StoreConfig, report, snapshot};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    let config = match &args.config {
        Some(path) => StoreConfig::from_toml(path)?,
        None => StoreConfig::default(),
    };

    let store = snapshot::load_store(&args.snapshot, config)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    report::run_command(&store, &args.command, args.format, &mut out)?;
    out.flush()?;
    Ok(())
}
