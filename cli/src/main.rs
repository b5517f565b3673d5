use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use rtsandbox_cli::ConsoleController;
use rtsandbox_cli::ConsoleOutput;
use rtsandbox_cli::spawn_printer;
use rtsandbox_core::Supervisor;
use rtsandbox_core::SupervisorConfig;
use rtsandbox_core::TargetSpec;
use rtsandbox_core::console_channel;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

/// Runtime sandbox interceptor.
///
/// With a command, runs it once and exits with its exit code. Without one,
/// starts the interactive console.
#[derive(Debug, Parser)]
#[command(name = "rtsandbox", version)]
struct Cli {
    /// Force Python hooks even if the command is not obviously Python.
    #[arg(long = "python", visible_alias = "py", default_value_t = false)]
    force_instrumented: bool,

    /// Read settings from this TOML file instead of the sandbox home.
    #[arg(long = "config", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Command to run (prefix with `--` to pass flags through).
    #[arg(
        value_name = "COMMAND",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    setup_tracing();

    let mut config = SupervisorConfig::load(cli.config.as_deref())
        .context("failed to load sandbox configuration")?;
    let one_shot = !cli.command.is_empty();
    // One-shot targets may be interactive themselves; the console needs stdin.
    config.inherit_stdin = one_shot;

    let (console_tx, console_rx) = console_channel();
    let output = ConsoleOutput::stdout();
    let printer = spawn_printer(console_rx, output.clone());
    let controller = ConsoleController::new(Supervisor::new(config, console_tx), output);

    let code = if one_shot {
        let spec = TargetSpec::new(cli.command, cli.force_instrumented)?;
        controller.run_once(spec).await
    } else {
        controller
            .run_interactive(BufReader::new(tokio::io::stdin()))
            .await;
        0
    };

    // Dropping the supervisor closes the console channel so the printer drains.
    drop(controller);
    if let Err(err) = printer.await {
        tracing::warn!(error = %err, "console printer task failed");
    }

    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
