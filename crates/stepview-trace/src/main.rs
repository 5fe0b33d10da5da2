use clap::error::ErrorKind;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use stepview_config::StepviewConfig;
use stepview_session::{Program, ReplayLauncher};
use stepview_trace::repl::{run_controlled, run_uncontrolled};
use stepview_trace::TracerBroker;

/// Step-by-step execution tracer.
///
/// Results are written to stdout, one JSON record per line. The program source
/// is a recorded session script that is replayed event by event.
#[derive(Debug, Parser)]
#[command(name = "stepview", version, about)]
struct Cli {
    /// Name of the program's main type.
    #[arg(long, default_value = "Main")]
    name: String,

    /// Run to completion without reading commands, supplying empty input on
    /// every stall.
    #[arg(long)]
    uncontrolled: bool,

    /// Do not print the help banner.
    #[arg(long)]
    omit_help: bool,

    /// Path to a TOML config file.
    ///
    /// If unset, `STEPVIEW_CONFIG` is used as a fallback. When neither are
    /// provided the tracer uses in-memory defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Program source body.
    source: String,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> anyhow::Result<()> {
    // Unusable arguments are not fatal: the bundled sample is traced instead.
    let (cli, usage_error) = match Cli::try_parse() {
        Ok(cli) => (Some(cli), None),
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(err) => (None, Some(err)),
    };

    let config = StepviewConfig::resolve(cli.as_ref().and_then(|cli| cli.config.clone()));
    stepview_trace::hardening::init(&config.logging);
    if let Some(err) = usage_error {
        tracing::warn!(
            target: "stepview.cli",
            error = %err,
            "invalid arguments; tracing the bundled sample program"
        );
    }

    let (program, uncontrolled, omit_help) = match cli {
        Some(cli) => (Program::new(cli.name, cli.source), cli.uncontrolled, cli.omit_help),
        None => (stepview_trace::sample_program(), false, false),
    };
    let broker = Arc::new(TracerBroker::new(ReplayLauncher, program, config.trace));

    let mut stdout = tokio::io::stdout();
    if uncontrolled {
        run_uncontrolled(broker, &mut stdout, omit_help).await
    } else {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        run_controlled(broker, stdin, &mut stdout, omit_help).await
    }
}
