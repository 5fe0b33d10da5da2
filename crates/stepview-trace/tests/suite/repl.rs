use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::Value as Json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::task::JoinHandle;
use stepview_session::{
    EventKind, Program, ReplayLauncher, ScriptItem, ScriptedSession, SessionScript,
};
use stepview_trace::repl::{run_controlled, run_uncontrolled};
use stepview_trace::{ControllerState, TracerBroker};

use crate::harness::{main_frame, step_at, thread_death, trace_config};

fn broker(items: Vec<ScriptItem>, quiescence_timeout_ms: u64) -> Arc<TracerBroker<ReplayLauncher>> {
    let script = SessionScript {
        items,
        ..SessionScript::default()
    };
    Arc::new(TracerBroker::new(
        ReplayLauncher,
        Program::new("Main", serde_json::to_string(&script).unwrap()),
        trace_config(100, quiescence_timeout_ms),
    ))
}

fn three_lines() -> Vec<ScriptItem> {
    vec![
        ScriptItem::Event(ScriptedSession::event(EventKind::VmStart)),
        ScriptItem::Event(step_at(main_frame(1))),
        ScriptItem::Event(step_at(main_frame(2))),
        ScriptItem::Event(step_at(main_frame(3))),
        ScriptItem::Event(thread_death()),
    ]
}

/// Non-banner output lines, parsed as JSON.
fn records(output: &[u8]) -> Vec<Json> {
    String::from_utf8_lossy(output)
        .lines()
        .filter(|line| !line.is_empty() && !line.starts_with("## "))
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn kinds(records: &[Json]) -> Vec<&str> {
    records
        .iter()
        .map(|record| record["result"].as_str().unwrap())
        .collect()
}

/// Talks to `run_controlled` the way a client does: one command at a time,
/// reading results as they are produced.
struct Client {
    commands: DuplexStream,
    results: Lines<BufReader<DuplexStream>>,
    session: JoinHandle<anyhow::Result<()>>,
}

impl Client {
    fn spawn(broker: Arc<TracerBroker<ReplayLauncher>>) -> Self {
        let (commands, command_reader) = tokio::io::duplex(4 * 1024);
        let (mut result_writer, results) = tokio::io::duplex(1024 * 1024);
        let session = tokio::spawn(async move {
            run_controlled(broker, BufReader::new(command_reader), &mut result_writer, true).await
        });
        Self {
            commands,
            results: BufReader::new(results).lines(),
            session,
        }
    }

    async fn send(&mut self, command: &str) {
        self.commands
            .write_all(format!("{command}\n").as_bytes())
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> Json {
        let line = tokio::time::timeout(Duration::from_secs(5), self.results.next_line())
            .await
            .expect("timed out waiting for a result")
            .unwrap()
            .expect("result stream closed");
        serde_json::from_str(&line).unwrap()
    }

    async fn finish(self) -> Vec<Json> {
        drop(self.commands);
        tokio::time::timeout(Duration::from_secs(10), self.session)
            .await
            .expect("controlled session did not end")
            .unwrap()
            .unwrap();
        let mut rest = Vec::new();
        let mut results = self.results;
        while let Some(line) = results.next_line().await.unwrap() {
            rest.push(serde_json::from_str(&line).unwrap());
        }
        rest
    }
}

#[tokio::test]
async fn controlled_mode_answers_each_command() {
    let broker = broker(three_lines(), 1_000);
    let mut client = Client::spawn(broker.clone());

    client.send("step").await;
    let record = client.recv().await;
    assert_eq!(record["result"], "ERROR");
    assert_eq!(record["value"]["cause"], "invalid state: tracer not started");

    client.send("start").await;
    let record = client.recv().await;
    assert_eq!(record["result"], "LINE");
    assert_eq!(record["value"]["line"], 0);

    client.send("step 2").await;
    assert_eq!(client.recv().await["result"], "LINE");
    assert_eq!(client.recv().await["result"], "LINE");

    client.send("").await;
    client.send("rewind").await;
    let record = client.recv().await;
    assert_eq!(record["result"], "ERROR");
    assert_eq!(record["value"]["cause"], "action not found: `rewind`");

    client.send("step").await;
    assert_eq!(client.recv().await["result"], "FINISHED");

    client.send("step").await;
    let record = client.recv().await;
    assert_eq!(record["value"]["cause"], "invalid state: tracer finished");

    client.send("stop").await;
    assert!(client.finish().await.is_empty());
    assert_eq!(broker.state(), ControllerState::Stopped);
}

#[tokio::test]
async fn help_banner_is_printed_unless_omitted() {
    let mut output = Vec::new();
    run_controlled(broker(three_lines(), 1_000), "stop\n".as_bytes(), &mut output, false)
        .await
        .unwrap();
    let text = String::from_utf8(output).unwrap();
    assert!(text.starts_with("## controlled mode"));
    assert!(text.contains("## step [n]"));

    let mut output = Vec::new();
    run_controlled(broker(three_lines(), 1_000), "stop\n".as_bytes(), &mut output, true)
        .await
        .unwrap();
    assert!(output.is_empty());
}

#[tokio::test]
async fn end_of_input_stops_the_tracer() {
    let broker = broker(three_lines(), 1_000);
    let mut output = Vec::new();
    run_controlled(broker.clone(), "start\n".as_bytes(), &mut output, true)
        .await
        .unwrap();

    assert_eq!(kinds(&records(&output)), vec!["LINE"]);
    assert_eq!(broker.state(), ControllerState::Stopped);
}

#[tokio::test]
async fn stop_is_applied_while_a_step_is_stalled() {
    let broker = broker(
        vec![ScriptItem::Event(step_at(main_frame(1))), ScriptItem::Stall],
        60_000,
    );
    let mut client = Client::spawn(broker.clone());

    client.send("start").await;
    assert_eq!(client.recv().await["result"], "LINE");

    client.send("step").await;
    client.send("stop").await;
    assert!(client.finish().await.is_empty());
    assert_eq!(broker.state(), ControllerState::Stopped);
}

#[tokio::test]
async fn input_is_applied_while_a_step_waits_for_it() {
    let broker = broker(
        vec![
            ScriptItem::Event(step_at(main_frame(1))),
            ScriptItem::InputRequest,
            ScriptItem::Event(step_at(main_frame(2))),
            ScriptItem::Event(thread_death()),
        ],
        60_000,
    );
    let mut client = Client::spawn(broker);

    client.send("start").await;
    assert_eq!(client.recv().await["result"], "LINE");

    client.send("step 5").await;
    client.send("input 3").await;
    assert_eq!(client.recv().await["result"], "LINE");
    assert_eq!(client.recv().await["result"], "FINISHED");

    client.send("stop").await;
    client.finish().await;
}

#[tokio::test]
async fn uncontrolled_mode_supplies_empty_input_after_a_stall() {
    let broker = broker(
        vec![
            ScriptItem::Event(step_at(main_frame(1))),
            ScriptItem::Output("guess: ".into()),
            ScriptItem::InputRequest,
        ],
        50,
    );
    let mut output = Vec::new();

    tokio::time::timeout(
        Duration::from_secs(10),
        run_uncontrolled(broker.clone(), &mut output, true),
    )
    .await
    .expect("uncontrolled mode must not hang on input")
    .unwrap();

    let records = records(&output);
    assert_eq!(kinds(&records), vec!["LINE", "LOCKED"]);
    assert_eq!(records[1]["value"]["threw"]["cause"], "program requires input");
    assert_eq!(records[1]["value"]["prints"], serde_json::json!(["guess: "]));
    assert_eq!(broker.state(), ControllerState::Stopped);
}

#[tokio::test]
async fn uncontrolled_mode_reports_compile_errors() {
    let broker = Arc::new(TracerBroker::new(
        ReplayLauncher,
        Program::new("Main", r#"{"compile_error": "Main.java:1: error: class, interface, or enum expected"}"#),
        trace_config(100, 50),
    ));
    let mut output = Vec::new();

    run_uncontrolled(broker, &mut output, false).await.unwrap();

    let text = String::from_utf8(output.clone()).unwrap();
    assert!(text.starts_with("## uncontrolled mode"));
    let records = records(&output);
    assert_eq!(kinds(&records), vec!["ERROR"]);
    assert!(records[0]["value"]["cause"]
        .as_str()
        .unwrap()
        .starts_with("compilation failed:"));
}
