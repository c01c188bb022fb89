use anyhow::Context;
use clap::Parser;
use handoff::telemetry::logging;
use handoff::terminal::{app, cli::Cli};
use tracing::debug;

fn main() {
    let code = match start(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("❌ {err:#}");
            1
        }
    };
    std::process::exit(code);
}

fn start(cli: Cli) -> anyhow::Result<i32> {
    let log_config = cli.logging.to_config();
    let _log_guard = logging::init(&log_config).context("failed to set up logging")?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    Ok(match runtime.block_on(app::run(cli)) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("❌ {err}");
            err.exit_code()
        }
    })
}
