// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Heap inflation through a replay session.

use echo_dry_tests::{ptr, FakeRuntime, SnapshotBuilder};
use echo_replay::host::HostTypes;
use echo_replay::snapshot::{HeapSnapshot, PromiseStatus, ScopeKind};
use echo_replay::{
    ContextTag, InflateError, InflationError, LoggedVar, PtrId, ReplayConfig, ReplayError,
    ReplaySession,
};

fn session() -> ReplaySession<FakeRuntime> {
    ReplaySession::new(ReplayConfig::default())
}

fn base() -> SnapshotBuilder {
    SnapshotBuilder::new()
        .ty(10, 1, None, LoggedVar::Absent)
        .context(1, 100, 10)
}

#[test]
fn every_snapshot_entity_is_registered() {
    let snapshot = base()
        .handler(20, &[1, 2])
        .ty(11, 1, Some(20), ptr(100))
        .string(150, 1, "hello")
        .object(200, 11, &[(1, ptr(150)), (2, ptr(201))])
        .array(201, 10, &[ptr(150), LoggedVar::Absent])
        .top_level_load(300, 1, 1, "function outer() { function inner() {} }")
        .function_body(301, "outer", 300)
        .function_body(302, "inner", 301)
        .slot_array(400, Some(301), &[(5, ptr(150))])
        .scope(500, &[(ScopeKind::SlotArray, 400), (ScopeKind::ActivationObject, 200)])
        .function(600, 10, 302, Some(500))
        .promise(700, 10, PromiseStatus::Pending, LoggedVar::Absent, &[800])
        .reaction(800, ptr(600), LoggedVar::Absent)
        .root(200)
        .root(600)
        .root(700)
        .build();
    let mut rt = FakeRuntime::new();
    let mut s = session();

    let stats = s.inflate_snapshot(&snapshot, &mut rt).unwrap();

    assert_eq!(stats.contexts, 1);
    assert_eq!(stats.function_bodies, 3);
    assert_eq!(stats.environments, 1);
    let map = s.inflate_map();
    assert!(map.is_context_inflated(ContextTag(1)));
    assert!(map.is_handler_inflated(PtrId(20)));
    assert!(map.is_type_inflated(PtrId(11)));
    assert!(map.is_slot_array_inflated(PtrId(400)));
    assert!(map.is_environment_inflated(PtrId(500)));
    for id in [100, 150, 200, 201, 600, 700] {
        assert!(map.is_object_inflated(PtrId(id)), "object {id}");
    }
    assert!(rt.root(PtrId(700)).is_some());
    assert_eq!(rt.loaded_sources.len(), 1);
}

#[test]
fn nested_body_with_unknown_parent_fails_and_cleans_up() {
    let snapshot = base().function_body(301, "orphan", 999).build();
    let mut rt = FakeRuntime::new();
    let mut s = session();
    s.inflate_snapshot(&base().build(), &mut rt).unwrap();

    let err = s.inflate_snapshot(&snapshot, &mut rt).unwrap_err();

    assert!(matches!(err, ReplayError::Inflation(_)));
    assert!(!s.inflate_map().has_previous_generation());
    s.inflate_snapshot(&base().build(), &mut rt).unwrap();
}

#[test]
fn object_with_unknown_type_is_an_identity_error() {
    let snapshot = base().object(200, 99, &[]).build();
    let mut rt = FakeRuntime::new();
    let mut s = session();

    let err = s.inflate_snapshot(&snapshot, &mut rt).unwrap_err();

    assert!(matches!(
        err,
        ReplayError::Inflation(InflationError::Inflate(InflateError::MissingIdentity {
            id: 99,
            ..
        }))
    ));
    assert!(!s.inflate_map().has_previous_generation());
}

#[test]
fn reinflate_reuses_objects_and_releases_the_rest() {
    let first = base()
        .object(200, 10, &[(1, ptr(201))])
        .object(201, 10, &[])
        .root(200)
        .build();
    let second = base().object(200, 10, &[]).root(200).build();
    let mut rt = FakeRuntime::new();
    let mut s = session();

    s.inflate_snapshot(&first, &mut rt).unwrap();
    assert_eq!(rt.live_objects(), 3);
    let before = rt.root(PtrId(200)).cloned().unwrap();

    let stats = s.inflate_snapshot(&second, &mut rt).unwrap();

    assert_eq!(stats.reused_objects, 1);
    assert_eq!(rt.invalidated, 1);
    assert!(!s.inflate_map().has_previous_generation());
    assert!(<FakeRuntime as HostTypes>::same_value(
        &before,
        rt.root(PtrId(200)).unwrap()
    ));
    drop(before);
    assert_eq!(rt.live_objects(), 2);
}

#[test]
fn reinflate_drops_stale_identities() {
    let first = base().object(201, 10, &[]).root(201).build();
    let mut rt = FakeRuntime::new();
    let mut s = session();
    s.inflate_snapshot(&first, &mut rt).unwrap();

    s.inflate_snapshot(&base().build(), &mut rt).unwrap();

    assert!(!s.inflate_map().is_object_inflated(PtrId(201)));
    assert!(matches!(
        s.inflate_map().lookup_object(PtrId(201)),
        Err(InflateError::MissingIdentity { .. })
    ));
}

#[test]
fn duplicate_context_global_is_rejected() {
    let mut snapshot: HeapSnapshot = base().build();
    snapshot.contexts.push(snapshot.contexts[0]);
    let mut rt = FakeRuntime::new();
    let mut s = session();

    assert!(s.inflate_snapshot(&snapshot, &mut rt).is_err());
}
