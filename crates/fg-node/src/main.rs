//! fieldgrid entry point

use clap::Parser;
use fg_node::{Cli, ExitCode, NodeConfig, OutputFormatter};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let formatter = OutputFormatter::new(cli.output, cli.verbose);

    let config = match NodeConfig::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            formatter.error(&format!("Config error: {e}"));
            return ExitCode::InvalidInput.to_exit_code();
        }
    };

    // CLI flags win over the file
    let config = config.with_overrides(&cli.overrides());
    if let Err(e) = config.validate() {
        formatter.error(&e.to_string());
        return ExitCode::InvalidInput.to_exit_code();
    }

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.logging.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.execute_with_config(config).await {
        Ok(code) => code.to_exit_code(),
        Err(e) => {
            formatter.error(&format!("{e:#}"));
            ExitCode::from_error(&e).to_exit_code()
        }
    }
}
