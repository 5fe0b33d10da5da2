use pretty_assertions::assert_eq;
use stepview_session::{
    EventKind, MockObject, RemoteValue, ScriptedEvent, ScriptedSession, StallCause, ThreadInfo,
};
use stepview_trace::{
    Controller, ControllerState, InputQueue, StateCell, Step, StepEvent, Termination,
};
use tokio_util::sync::CancellationToken;

use crate::harness::{main_frame, main_thread, step_at, thread_death, trace_config};

fn controller(session: ScriptedSession, max_steps: usize) -> Controller<ScriptedSession> {
    Controller::new(
        session,
        trace_config(max_steps, 100),
        InputQueue::default(),
        CancellationToken::new(),
        StateCell::new(),
    )
}

/// A counting loop: `i` goes 0..events on line 3, printing each value.
fn counting_session(events: i32) -> ScriptedSession {
    let mut session = ScriptedSession::new();
    session.push_event(ScriptedSession::event(EventKind::VmStart));
    session.push_event(ScriptedSession::thread_event(
        EventKind::MethodEntry,
        main_thread(),
        vec![main_frame(2)],
    ));
    for i in 0..events {
        session.push_event(step_at(main_frame(3).var("i", RemoteValue::Int(i))));
        session.push_output(format!("{i}\n"));
    }
    session.push_event(thread_death());
    session.push_event(ScriptedSession::event(EventKind::VmDeath));
    session
}

fn run_to_end(controller: &mut Controller<ScriptedSession>) -> Vec<Step> {
    let mut steps = Vec::new();
    while !controller.is_terminal() {
        steps.extend(controller.advance(1));
    }
    steps
}

#[test]
fn every_run_has_exactly_one_terminal_step() {
    for (events, budget) in [(0, 10), (3, 10), (8, 4)] {
        let steps = run_to_end(&mut controller(counting_session(events), budget));
        let terminal: Vec<_> = steps.iter().filter(|step| step.finished).collect();
        assert_eq!(terminal.len(), 1, "events={events} budget={budget}");
        assert!(steps.last().unwrap().finished);
    }
}

#[test]
fn single_steps_match_one_batched_step() {
    let mut one_by_one = controller(counting_session(6), 100);
    let mut batched = controller(counting_session(6), 100);

    let singles: Vec<Step> = (0..5).flat_map(|_| one_by_one.advance(1)).collect();
    let batch = batched.advance(5);

    assert_eq!(singles, batch);
    assert_eq!(batch.len(), 5);
    assert_eq!(batch[0].event, Some(StepEvent::Call));
    assert!(batch[1..].iter().all(|step| step.event == Some(StepEvent::Line)));
}

#[test]
fn prints_flush_into_the_next_step() {
    let steps = run_to_end(&mut controller(counting_session(2), 100));

    assert_eq!(steps.len(), 4);
    assert!(steps[0].prints.is_empty());
    assert!(steps[1].prints.is_empty());
    assert_eq!(steps[2].prints, vec!["0\n".to_string()]);
    assert_eq!(steps[3].prints, vec!["1\n".to_string()]);
    assert!(steps[3].is_completion());
    assert_eq!(steps[3].snapshot, steps[2].snapshot);
    assert_eq!(steps[2].line, Some(2));
}

#[test]
fn budget_exhaustion_ends_the_run() {
    let mut controller = controller(counting_session(10), 3);
    let steps = controller.advance(100);

    assert_eq!(steps.len(), 4);
    assert!(steps[..3].iter().all(|step| !step.finished));
    let terminal = &steps[3];
    assert_eq!(terminal.threw, Some(Termination::StepBudgetExceeded { max_steps: 3 }));
    assert_eq!(terminal.snapshot, None);
    assert_eq!(terminal.prints, vec!["1\n".to_string()]);
    assert_eq!(controller.state(), ControllerState::Finished);
}

#[test]
fn protocol_exception_is_terminal_with_args() {
    let mut session = ScriptedSession::new();
    session.insert_object(7, MockObject::string("/ by zero"));
    let mut exception = MockObject::library("java.lang.ArithmeticException");
    exception.fields.push(("detailMessage".to_string(), RemoteValue::Object(7)));
    session.insert_object(9, exception);

    session.push_event(step_at(main_frame(3)));
    session.push_output("about to divide\n");
    session.push_event(ScriptedSession::thread_event(
        EventKind::Exception { exception: 9 },
        main_thread(),
        vec![main_frame(4).var("x", RemoteValue::Int(0))],
    ));

    let mut controller = controller(session, 100);
    let steps = controller.advance(5);

    assert_eq!(steps.len(), 2);
    let terminal = &steps[1];
    assert!(terminal.finished);
    assert_eq!(terminal.event, Some(StepEvent::Exception));
    assert_eq!(terminal.prints, vec!["about to divide\n".to_string()]);
    let args = terminal.args.as_ref().unwrap();
    assert_eq!(args.type_name, "java.lang.ArithmeticException");
    assert_eq!(args.message.as_deref(), Some("/ by zero"));
    assert_eq!(
        terminal.threw,
        Some(Termination::DebuggeeException {
            type_name: "java.lang.ArithmeticException".into(),
            message: Some("/ by zero".into()),
        })
    );
    assert!(terminal.snapshot.is_some());
}

#[test]
fn printed_exception_at_teardown_is_a_crash() {
    let report = "Exception in thread \"main\" java.lang.IllegalStateException: bad\n\tat Main.main(Main.java:5)\n";
    let mut session = ScriptedSession::new();
    session.push_event(step_at(main_frame(4)));
    session.push_output("partial\n");
    session.push_output(report);
    session.push_event(thread_death());

    let steps = controller(session, 100).advance(5);

    assert_eq!(steps.len(), 2);
    let terminal = &steps[1];
    assert_eq!(terminal.prints.concat(), format!("partial\n{report}"));
    assert_eq!(
        terminal.threw,
        Some(Termination::DebuggeeCrash {
            type_name: "java.lang.IllegalStateException".into(),
            traceback: report.to_string(),
        })
    );
}

#[test]
fn crash_report_after_an_unterminated_prompt_is_a_crash() {
    let report = "Exception in thread \"main\" java.util.InputMismatchException\n\tat Main.main(Main.java:5)\n";
    let mut session = ScriptedSession::new();
    session.push_event(step_at(main_frame(4)));
    session.push_output("Enter a number: ");
    session.push_output(report);
    session.push_event(thread_death());

    let steps = controller(session, 100).advance(5);

    assert_eq!(steps.len(), 2);
    let terminal = &steps[1];
    assert!(!terminal.is_completion());
    assert_eq!(
        terminal.prints,
        vec!["Enter a number: ".to_string(), report.to_string()]
    );
    assert_eq!(
        terminal.threw,
        Some(Termination::DebuggeeCrash {
            type_name: "java.util.InputMismatchException".into(),
            traceback: report.to_string(),
        })
    );
}

fn worker_thread() -> ThreadInfo {
    ThreadInfo {
        id: 7,
        name: "worker-1".to_string(),
    }
}

/// Crash detection runs before any other handling of a lifecycle event,
/// whichever thread it is on.
#[test]
fn crash_report_is_detected_at_every_lifecycle_boundary() {
    let report = "Exception in thread \"worker-1\" java.lang.IllegalArgumentException: no\n";
    let boundaries: Vec<(&str, ScriptedEvent)> = vec![
        ("vm start", ScriptedSession::event(EventKind::VmStart)),
        ("vm death", ScriptedSession::event(EventKind::VmDeath)),
        ("vm disconnect", ScriptedSession::event(EventKind::VmDisconnect)),
        (
            "worker thread start",
            ScriptedSession::thread_event(EventKind::ThreadStart, worker_thread(), Vec::new()),
        ),
        (
            "worker thread death",
            ScriptedSession::thread_event(EventKind::ThreadDeath, worker_thread(), Vec::new()),
        ),
    ];

    for (name, boundary) in boundaries {
        let mut session = ScriptedSession::new();
        session.push_event(step_at(main_frame(4)));
        session.push_output(report);
        session.push_event(boundary);
        session.push_event(step_at(main_frame(5)));
        session.push_event(thread_death());

        let mut run = controller(session, 100);
        let steps = run.advance(5);

        assert_eq!(steps.len(), 2, "{name}");
        assert_eq!(
            steps[1].threw,
            Some(Termination::DebuggeeCrash {
                type_name: "java.lang.IllegalArgumentException".into(),
                traceback: report.to_string(),
            }),
            "{name}"
        );
        assert!(run.is_terminal(), "{name}");
    }
}

#[test]
fn ordinary_output_at_teardown_is_not_a_crash() {
    let mut session = ScriptedSession::new();
    session.push_event(step_at(main_frame(4)));
    session.push_output("bye\n");
    session.push_event(thread_death());

    let steps = controller(session, 100).advance(5);
    assert!(steps[1].is_completion());
    assert_eq!(steps[1].prints, vec!["bye\n".to_string()]);
}

#[test]
fn silence_ends_the_run_as_a_stall() {
    let mut session = ScriptedSession::new();
    session.push_event(step_at(main_frame(1)));
    session.push_output("Enter a number: ");
    session.push_input_request();

    let mut controller = controller(session, 100);
    let steps = controller.advance(3);

    assert_eq!(steps.len(), 2);
    assert_eq!(
        steps[1].threw,
        Some(Termination::Stall {
            cause: StallCause::AwaitingInput
        })
    );
    assert_eq!(steps[1].prints, vec!["Enter a number: ".to_string()]);
    assert_eq!(controller.state(), ControllerState::Finished);
}

#[test]
fn missing_debug_info_is_an_internal_error() {
    let mut session = ScriptedSession::new();
    session.push_event(step_at(main_frame(1).without_debug_info()));

    let mut controller = controller(session, 100);
    let steps = controller.advance(1);

    assert!(matches!(
        steps[0].threw,
        Some(Termination::Internal { ref type_name, ref message })
            if type_name == "InternalError" && message.contains("absent debug information")
    ));
    assert_eq!(controller.state(), ControllerState::Error);
}
