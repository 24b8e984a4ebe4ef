// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Replay driver behaviour against the in-memory fake host.

use std::collections::BTreeMap;

use echo_dry_tests::{ptr, Behaviour, FakeRuntime, SnapshotBuilder};
use echo_replay::snapshot::HeapSnapshot;
use echo_replay::{
    AbortReason, AbortRequest, Action, ActionKind, ActionLog, InlineValue, LoggedVar, PropertyId,
    PtrId, ReplayConfig, ReplayError, ReplaySession, ReplayStop,
};

fn session() -> ReplaySession<FakeRuntime> {
    ReplaySession::new(ReplayConfig::default())
}

/// Log that allocates a function named `name` at ptr 2 and calls it.
fn call_log(name: &str, depth: u32, host_callback_id: i64) -> ActionLog {
    let mut log = ActionLog::new();
    log.push_create_string(name, ptr(1)).unwrap();
    log.push(Action::AllocateFunction {
        name: ptr(1),
        result: ptr(2),
    });
    log.push_call(depth, vec![ptr(2)], LoggedVar::Absent, host_callback_id).unwrap();
    log
}

/// Context 1 with global 100, object 200 -> 201, and a function `f` at 600.
fn heap() -> HeapSnapshot {
    SnapshotBuilder::new()
        .ty(10, 1, None, LoggedVar::Absent)
        .context(1, 100, 10)
        .object(200, 10, &[(1, ptr(201))])
        .object(201, 10, &[])
        .top_level_load(300, 1, 1, "function f(x) { return x; }")
        .function_body(301, "f", 300)
        .function(600, 10, 301, None)
        .root(200)
        .root(600)
        .build()
}

#[test]
fn root_call_that_throws_resets_call_stack_and_records_exception() {
    let mut rt = FakeRuntime::new();
    rt.set_behaviour("boom", Behaviour::Throw);
    let mut log = call_log("boom", 0, 7);
    let mut s = session();

    let report = s.replay(&mut log, &mut rt, None).unwrap();

    assert_eq!(report.executed, 3);
    assert_eq!(report.stop, ReplayStop::Completed);
    assert_eq!(rt.resets, vec![(2, 7)]);
    assert!(s.has_recorded_exception());
    assert!(rt.pending_exception().is_none());
}

#[test]
fn nested_call_never_resets_call_stack() {
    let mut rt = FakeRuntime::new();
    rt.set_behaviour("boom", Behaviour::Throw);
    let mut log = call_log("boom", 1, 7);
    let mut s = session();

    s.replay(&mut log, &mut rt, None).unwrap();

    assert!(rt.resets.is_empty());
    assert!(s.has_recorded_exception());
}

#[test]
fn termination_is_recorded_as_exception() {
    let mut rt = FakeRuntime::new();
    rt.set_behaviour("stop", Behaviour::Terminate);
    let mut log = call_log("stop", 0, 1);
    let mut s = session();

    s.replay(&mut log, &mut rt, None).unwrap();

    assert!(s.has_recorded_exception());
}

#[test]
fn get_and_clear_exception_tags_the_recorded_exception() {
    let mut rt = FakeRuntime::new();
    rt.set_behaviour("boom", Behaviour::Throw);
    let mut log = call_log("boom", 0, 7);
    let t = log.push(Action::GetAndClearException { result: ptr(9) });
    let mut s = session();

    let report = s.replay(&mut log, &mut rt, None).unwrap();

    assert!(!s.has_recorded_exception());
    assert!(s.inflate_map().is_object_inflated(PtrId(9)));
    assert_eq!(report.results.last(), Some(&(t, ptr(9))));
}

#[test]
fn root_call_captures_last_executed_location() {
    let mut rt = FakeRuntime::new();
    let mut log = call_log("quiet", 0, 3);
    let mut s = session();

    s.replay(&mut log, &mut rt, None).unwrap();

    let call = &log.records()[2];
    assert!(call.is_root_call());
    assert_eq!(call.last_executed_location().map(|l| l.top_level_time), Some(2));
}

/// Sets the recorded exception flags on the log's last call.
fn mark_uncaught(log: &mut ActionLog, script: bool, terminating: bool) {
    let record = log.last_mut().unwrap();
    let Action::CallExistingFunction(call) = &mut record.action else {
        panic!("last record is not a call");
    };
    call.has_script_exception = script;
    call.has_terminating_exception = terminating;
}

#[test]
fn break_on_uncaught_exception_interrupts_after_recording() {
    let mut rt = FakeRuntime::new();
    rt.set_behaviour("boom", Behaviour::Throw);
    let mut log = call_log("boom", 0, 7);
    mark_uncaught(&mut log, true, false);
    log.push_create_string("after", ptr(3)).unwrap();
    let mut s = ReplaySession::new(ReplayConfig::default().with_break_on_uncaught_exception(true));

    let report = s.replay(&mut log, &mut rt, None).unwrap();

    assert_eq!(
        report.stop,
        ReplayStop::Interrupted(AbortRequest::new(2, AbortReason::UncaughtException))
    );
    assert_eq!(report.executed, 3);
    assert!(s.has_recorded_exception());
    assert!(!s.inflate_map().is_object_inflated(PtrId(3)));
}

#[test]
fn break_follows_the_recorded_flags_not_the_live_outcome() {
    let config = ReplayConfig::default().with_break_on_uncaught_exception(true);

    // Throws live, but the recording saw a clean return.
    let mut rt = FakeRuntime::new();
    rt.set_behaviour("boom", Behaviour::Throw);
    let mut log = call_log("boom", 0, 7);
    log.push_create_string("after", ptr(3)).unwrap();
    let mut s = ReplaySession::new(config.clone());
    let report = s.replay(&mut log, &mut rt, None).unwrap();
    assert_eq!(report.stop, ReplayStop::Completed);
    assert!(s.has_recorded_exception());

    // Returns live, but the recording was terminated.
    let mut rt = FakeRuntime::new();
    let mut log = call_log("quiet", 0, 7);
    mark_uncaught(&mut log, false, true);
    log.push_create_string("after", ptr(3)).unwrap();
    let mut s = ReplaySession::new(config);
    let report = s.replay(&mut log, &mut rt, None).unwrap();
    assert_eq!(
        report.stop,
        ReplayStop::Interrupted(AbortRequest::new(2, AbortReason::UncaughtException))
    );
    assert!(!s.inflate_map().is_object_inflated(PtrId(3)));
}

#[test]
fn recorded_exception_without_break_flag_replays_through() {
    let mut rt = FakeRuntime::new();
    rt.set_behaviour("boom", Behaviour::Throw);
    let mut log = call_log("boom", 0, 7);
    mark_uncaught(&mut log, true, true);
    log.push_create_string("after", ptr(3)).unwrap();
    let mut s = session();

    let report = s.replay(&mut log, &mut rt, None).unwrap();

    assert_eq!(report.stop, ReplayStop::Completed);
    assert!(s.inflate_map().is_object_inflated(PtrId(3)));
}

#[test]
fn debugger_abort_from_host_stops_replay_without_error() {
    let mut rt = FakeRuntime::new();
    let request = AbortRequest::new(2, AbortReason::Breakpoint);
    rt.set_behaviour("bp", Behaviour::Abort(request));
    let mut log = call_log("bp", 0, 1);
    log.push_create_string("after", ptr(3)).unwrap();
    let mut s = session();

    let report = s.replay(&mut log, &mut rt, None).unwrap();

    assert_eq!(report.stop, ReplayStop::Interrupted(request));
    assert!(!s.has_recorded_exception());
    assert!(!s.inflate_map().is_object_inflated(PtrId(3)));
}

#[test]
fn abort_token_is_checked_before_each_record() {
    let mut rt = FakeRuntime::new();
    let mut log = call_log("quiet", 0, 1);
    let mut s = session();
    let request = AbortRequest::new(0, AbortReason::User);
    s.abort_token().request(request);

    let report = s.replay(&mut log, &mut rt, None).unwrap();

    assert_eq!(report.executed, 0);
    assert_eq!(report.stop, ReplayStop::Interrupted(request));
    assert!(!s.abort_token().is_requested());
}

#[test]
fn replay_stops_before_first_record_after_until() {
    let mut rt = FakeRuntime::new();
    let mut log = call_log("quiet", 0, 1);
    let mut s = session();

    let report = s.replay(&mut log, &mut rt, Some(1)).unwrap();

    assert_eq!(report.executed, 2);
    assert_eq!(report.stop, ReplayStop::ReachedTime(1));
    assert_eq!(rt.calls, 0);
}

#[test]
fn out_of_memory_aborts_the_pass() {
    let mut rt = FakeRuntime::new();
    rt.set_out_of_memory(true);
    let mut log = ActionLog::new();
    log.push_create_string("x", ptr(1)).unwrap();
    let mut s = session();

    let err = s.replay(&mut log, &mut rt, None).unwrap_err();

    assert!(matches!(
        err,
        ReplayError::OutOfMemory {
            kind: ActionKind::CreateString,
            event_time: 0
        }
    ));
}

#[test]
fn call_without_callee_is_fatal() {
    let mut rt = FakeRuntime::new();
    let mut log = ActionLog::new();
    log.push_call(0, Vec::new(), LoggedVar::Absent, 0).unwrap();
    let mut s = session();

    let err = s.replay(&mut log, &mut rt, None).unwrap_err();

    assert!(matches!(err, ReplayError::InvalidCallee { event_time: 0 }));
}

#[test]
fn inline_results_are_checked_against_the_log() {
    let mut rt = FakeRuntime::new();
    rt.set_behaviour("seven", Behaviour::Int(7));
    let mut log = ActionLog::new();
    log.push_create_string("seven", ptr(1)).unwrap();
    log.push(Action::AllocateFunction {
        name: ptr(1),
        result: ptr(2),
    });
    log.push_call(
        0,
        vec![ptr(2)],
        LoggedVar::Inline(InlineValue::Int(8)),
        0,
    )
    .unwrap();
    let mut s = session();

    let err = s.replay(&mut log, &mut rt, None).unwrap_err();

    assert!(matches!(
        err,
        ReplayError::ResultDivergence { event_time: 2, .. }
    ));
}

#[test]
fn results_resolve_through_the_inflated_heap() {
    let mut rt = FakeRuntime::new();
    let mut s = session();
    s.inflate_snapshot(&heap(), &mut rt).unwrap();

    let mut log = ActionLog::new();
    log.push(Action::GetProperty {
        object: ptr(200),
        pid: PropertyId(1),
        result: ptr(201),
    });
    s.replay(&mut log, &mut rt, None).unwrap();

    let mut wrong = ActionLog::new();
    wrong.push(Action::GetProperty {
        object: ptr(200),
        pid: PropertyId(1),
        result: ptr(200),
    });
    let err = s.replay(&mut wrong, &mut rt, None).unwrap_err();
    assert!(matches!(err, ReplayError::ResultDivergence { .. }));
}

fn scripted_log() -> ActionLog {
    let mut log = ActionLog::new();
    log.push_snapshot_marker();
    log.push_create_string("x", ptr(900)).unwrap();
    log.push_call(0, vec![ptr(600), ptr(900)], ptr(900), 11).unwrap();
    log.push(Action::SetProperty {
        object: ptr(200),
        pid: PropertyId(2),
        value: ptr(900),
        strict: false,
    });
    log.push(Action::GetProperty {
        object: ptr(200),
        pid: PropertyId(2),
        result: ptr(900),
    });
    log.push(Action::AllocateArray {
        length: 2,
        result: ptr(901),
    });
    log.push(Action::SetIndex {
        object: ptr(901),
        index: LoggedVar::Inline(InlineValue::Int(1)),
        value: ptr(201),
    });
    log.push(Action::GetIndex {
        object: ptr(901),
        index: LoggedVar::Inline(InlineValue::Int(1)),
        result: ptr(201),
    });
    log
}

#[test]
fn replaying_the_same_log_twice_yields_the_same_results() {
    let snapshot = heap();
    let mut runs = Vec::new();
    for _ in 0..2 {
        let mut rt = FakeRuntime::new();
        rt.set_behaviour("f", Behaviour::FirstArg);
        let mut s = session();
        s.inflate_snapshot(&snapshot, &mut rt).unwrap();
        let mut log = scripted_log();
        runs.push(s.replay(&mut log, &mut rt, None).unwrap());
    }
    assert_eq!(runs[0].stop, ReplayStop::Completed);
    assert!(!runs[0].results.is_empty());
    assert_eq!(runs[0].results, runs[1].results);
}

#[test]
fn seek_inflates_nearest_snapshot_and_replays_forward() {
    let mut rt = FakeRuntime::new();
    let mut log = ActionLog::new();
    log.push_snapshot_marker();
    log.push_create_string("a", ptr(900)).unwrap();
    log.push_create_string("b", ptr(901)).unwrap();
    let snapshots = BTreeMap::from([(0, heap())]);
    let mut s = session();

    let report = s.seek(&mut log, &snapshots, &mut rt, 1).unwrap();

    assert_eq!(report.executed, 1);
    assert_eq!(report.stop, ReplayStop::ReachedTime(1));
    assert!(report.inflated.is_some());
    assert!(s.inflate_map().is_object_inflated(PtrId(900)));
    assert!(!s.inflate_map().is_object_inflated(PtrId(901)));
    assert!(s.inflate_map().is_object_inflated(PtrId(200)));
}

#[test]
fn seek_without_snapshot_fails() {
    let mut rt = FakeRuntime::new();
    let mut log = ActionLog::new();
    log.push_create_string("a", ptr(900)).unwrap();
    let mut s = session();

    let err = s.seek(&mut log, &BTreeMap::new(), &mut rt, 5).unwrap_err();

    assert!(matches!(err, ReplayError::NoSnapshotBefore { target: 5 }));
}
