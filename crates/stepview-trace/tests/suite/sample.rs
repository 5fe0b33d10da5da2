use pretty_assertions::assert_eq;
use stepview_session::ReplayLauncher;
use stepview_trace::{
    sample_program, ControllerState, ObjectKind, ResultKind, TracerBroker, Value,
};

use crate::harness::{assert_no_dangling_references, trace_config};

#[test]
fn bundled_sample_traces_to_completion() {
    let broker = TracerBroker::new(ReplayLauncher, sample_program(), trace_config(100, 1_000));

    let mut records = broker.start().unwrap();
    records.extend(broker.step(10).unwrap());

    assert_eq!(
        records.iter().map(|record| record.result).collect::<Vec<_>>(),
        vec![
            ResultKind::Call,
            ResultKind::Line,
            ResultKind::Line,
            ResultKind::Line,
            ResultKind::Line,
            ResultKind::Finished,
        ]
    );
    assert_eq!(broker.state(), ControllerState::Finished);

    for record in &records {
        let snapshot = record.step().unwrap().snapshot.as_ref().unwrap();
        assert_no_dangling_references(snapshot);
    }

    let cyclic = records[2].step().unwrap().snapshot.as_ref().unwrap();
    assert_eq!(cyclic.heap_graph.len(), 2);
    let node = cyclic.heap_graph.get(2).unwrap();
    assert_eq!(node.kind, ObjectKind::UserObject);
    assert_eq!(
        node.members[1],
        (Value::StringLiteral("next".into()), Value::Reference(2))
    );

    let listed = records[3].step().unwrap().snapshot.as_ref().unwrap();
    let list = listed.heap_graph.get(3).unwrap();
    assert_eq!(list.kind, ObjectKind::List);
    assert_eq!(list.members, vec![(Value::int(0), Value::int(2))]);

    let printed = records[4].step().unwrap();
    assert_eq!(printed.prints, vec!["hello from Sample\n".to_string()]);
    assert_eq!(printed.line, Some(6));
}
