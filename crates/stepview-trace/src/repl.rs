//! Line-oriented front ends over a [`TracerBroker`].
//!
//! Results are written one JSON record per line. Help banners are prefixed with
//! `## ` so a consumer can skip them.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;

use stepview_session::Launcher;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio::task::JoinHandle;

use crate::broker::TracerBroker;
use crate::error::{CommandError, CommandResult};
use crate::result::{ResultKind, ResultRecord};

const CONTROLLED_HELP: &[&str] = &[
    "## controlled mode: one JSON result record per line",
    "## start          launch the program and run to the first step",
    "## step [n]       run the next n steps (default 1)",
    "## input <text>   queue text for the program's standard input",
    "## stop           stop the tracer and the program",
];

const UNCONTROLLED_HELP: &[&str] = &[
    "## uncontrolled mode: one JSON result record per line",
    "## empty input is supplied whenever the program stalls",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Step(usize),
    Input(String),
    Stop,
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (action, argument) = match line.split_once(' ') {
            Some((action, argument)) => (action, Some(argument)),
            None => (line, None),
        };

        match action {
            "start" => Ok(Command::Start),
            "step" => match argument.map(str::trim).filter(|count| !count.is_empty()) {
                None => Ok(Command::Step(1)),
                Some(count) => count
                    .parse()
                    .map(Command::Step)
                    .map_err(|_| CommandError::InvalidArgument(format!("invalid step count `{count}`"))),
            },
            "input" => Ok(Command::Input(argument.unwrap_or_default().to_string())),
            "stop" => Ok(Command::Stop),
            other => Err(CommandError::UnknownCommand(other.to_string())),
        }
    }
}

/// Read commands from `input` until `stop` or end of input.
///
/// `start` and `step` run on the blocking pool. While one is running, `stop`
/// and `input` lines are still read and applied at once; any other line waits
/// until the step has returned.
pub async fn run_controlled<L, R, W>(
    broker: Arc<TracerBroker<L>>,
    input: R,
    output: &mut W,
    omit_help: bool,
) -> anyhow::Result<()>
where
    L: Launcher + 'static,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if !omit_help {
        write_help(output, CONTROLLED_HELP).await?;
    }

    let mut lines = input.lines();
    let mut backlog = VecDeque::new();
    loop {
        let line = match backlog.pop_front() {
            Some(line) => line,
            None => match lines.next_line().await? {
                Some(line) => line,
                None => break,
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<Command>() {
            Ok(Command::Stop) => break,
            Ok(Command::Input(text)) => {
                if let Err(err) = broker.input(text) {
                    emit(output, &[ResultRecord::error(err.to_string())]).await?;
                }
            }
            Ok(Command::Start) => {
                if drive(&broker, None, &mut lines, &mut backlog, output).await? {
                    break;
                }
            }
            Ok(Command::Step(n)) => {
                if drive(&broker, Some(n), &mut lines, &mut backlog, output).await? {
                    break;
                }
            }
            Err(err) => emit(output, &[ResultRecord::error(err.to_string())]).await?,
        }
    }

    broker.stop();
    output.flush().await?;
    Ok(())
}

/// Run `start` (no count) or `step(n)` while still listening for `stop` and
/// `input`. Returns true if a `stop` arrived.
async fn drive<L, R, W>(
    broker: &Arc<TracerBroker<L>>,
    count: Option<usize>,
    lines: &mut Lines<R>,
    backlog: &mut VecDeque<String>,
    output: &mut W,
) -> anyhow::Result<bool>
where
    L: Launcher + 'static,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut task = spawn_advance(broker, count);
    let mut stop_requested = false;
    let mut eof = false;

    let joined = loop {
        tokio::select! {
            joined = &mut task => break joined,
            line = lines.next_line(), if !eof && !stop_requested => match line? {
                Some(line) => match line.parse::<Command>() {
                    Ok(Command::Stop) => {
                        tracing::debug!(target: "stepview.cli", "stop requested during step");
                        broker.stop();
                        stop_requested = true;
                    }
                    Ok(Command::Input(text)) => {
                        if let Err(err) = broker.input(text) {
                            emit(output, &[ResultRecord::error(err.to_string())]).await?;
                        }
                    }
                    _ => backlog.push_back(line),
                },
                None => eof = true,
            },
        }
    };

    match joined {
        Ok(outcome) => emit_outcome(output, outcome).await?,
        Err(err) => {
            tracing::error!(target: "stepview.cli", error = %err, "tracer task failed");
            emit(output, &[ResultRecord::error(format!("tracer task failed: {err}"))]).await?;
        }
    }
    Ok(stop_requested)
}

/// Emit `start()` results, then `step(1)` results until `step` fails.
pub async fn run_uncontrolled<L, W>(
    broker: Arc<TracerBroker<L>>,
    output: &mut W,
    omit_help: bool,
) -> anyhow::Result<()>
where
    L: Launcher + 'static,
    W: AsyncWrite + Unpin,
{
    if !omit_help {
        write_help(output, UNCONTROLLED_HELP).await?;
    }

    let mut count = None;
    loop {
        let records = match spawn_advance(&broker, count).await? {
            Ok(records) => records,
            Err(err) if count.is_none() => vec![ResultRecord::error(err.to_string())],
            Err(err) => {
                tracing::debug!(target: "stepview.cli", error = %err, "tracing ended");
                break;
            }
        };
        count = Some(1);

        emit(output, &records).await?;
        if records.last().is_some_and(|record| record.result == ResultKind::Locked) {
            if let Err(err) = broker.input("") {
                tracing::debug!(target: "stepview.cli", error = %err, "could not supply empty input");
            }
        }
    }

    broker.stop();
    output.flush().await?;
    Ok(())
}

fn spawn_advance<L>(
    broker: &Arc<TracerBroker<L>>,
    count: Option<usize>,
) -> JoinHandle<CommandResult<Vec<ResultRecord>>>
where
    L: Launcher + 'static,
{
    let broker = Arc::clone(broker);
    tokio::task::spawn_blocking(move || match count {
        None => broker.start(),
        Some(n) => broker.step(n),
    })
}

async fn emit_outcome<W>(output: &mut W, outcome: CommandResult<Vec<ResultRecord>>) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match outcome {
        Ok(records) => emit(output, &records).await,
        Err(err) => emit(output, &[ResultRecord::error(err.to_string())]).await,
    }
}

async fn emit<W>(output: &mut W, records: &[ResultRecord]) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for record in records {
        let mut line = record.to_json_line()?;
        line.push('\n');
        output.write_all(line.as_bytes()).await?;
    }
    output.flush().await?;
    Ok(())
}

async fn write_help<W>(output: &mut W, help: &[&str]) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for line in help {
        output.write_all(line.as_bytes()).await?;
        output.write_all(b"\n").await?;
    }
    output.write_all(b"\n").await?;
    Ok(())
}
