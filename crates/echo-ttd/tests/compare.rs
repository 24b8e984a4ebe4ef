// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Snapshot equivalence across independently inflated heaps.

use echo_dry_tests::{ptr, SnapshotBuilder};
use echo_replay::snapshot::{HeapSnapshot, ScopeKind};
use echo_replay::{ContextTag, InlineValue, LoggedVar, PtrId};
use echo_ttd::{compare_snapshots, CompareError, DivergenceCode, Side};

/// One heap with every id shifted by `offset`.
fn fixture(offset: u64, greeting: &str, answer: i32) -> HeapSnapshot {
    let o = offset;
    SnapshotBuilder::new()
        .ty(10 + o, 1, None, LoggedVar::Absent)
        .context(1, 100 + o, 10 + o)
        .string(150 + o, 1, greeting)
        .object(200 + o, 10 + o, &[(1, ptr(201 + o)), (2, ptr(150 + o))])
        .object(
            201 + o,
            10 + o,
            &[(3, LoggedVar::Inline(InlineValue::Int(answer)))],
        )
        .top_level_load(300 + o, 1, 1, "function f() {}")
        .function_body(301 + o, "f", 300 + o)
        .slot_array(400 + o, Some(301 + o), &[(5, ptr(201 + o))])
        .scope(500 + o, &[(ScopeKind::SlotArray, 400 + o)])
        .function(600 + o, 10 + o, 301 + o, Some(500 + o))
        .root(200 + o)
        .root(600 + o)
        .build()
}

#[test]
fn snapshot_is_equivalent_to_itself() {
    let h = fixture(0, "hello", 42);
    let report = compare_snapshots(&h, &h).unwrap();

    assert!(report.is_equivalent(), "{:?}", report.divergence);
    for id in [100, 200, 201, 300, 301, 400, 500, 600] {
        assert_eq!(report.mapping.get(&PtrId(id)), Some(&PtrId(id)), "{id}");
    }
    assert!(report.mapping.iter().all(|(a, b)| a == b));
}

#[test]
fn heaps_with_different_identities_are_equivalent() {
    let report = compare_snapshots(&fixture(0, "hello", 42), &fixture(1000, "hello", 42)).unwrap();

    assert!(report.is_equivalent(), "{:?}", report.divergence);
    assert_eq!(report.mapping.get(&PtrId(200)), Some(&PtrId(1200)));
    assert_eq!(report.mapping.get(&PtrId(500)), Some(&PtrId(1500)));
    assert_eq!(report.compared, report.mapping.len());
}

#[test]
fn inline_value_difference_is_reported_at_its_owner() {
    let report = compare_snapshots(&fixture(0, "hello", 42), &fixture(0, "hello", 43)).unwrap();

    let d = report.divergence.unwrap();
    assert_eq!(d.code, DivergenceCode::ValueMismatch);
    assert_eq!(d.h1, Some(PtrId(201)));
    assert_eq!(d.h2, Some(PtrId(201)));
    assert_eq!(d.path, "properties[0]");
}

#[test]
fn string_difference_is_reported_at_the_referencing_object() {
    let report =
        compare_snapshots(&fixture(0, "hello", 42), &fixture(1000, "goodbye", 42)).unwrap();

    let d = report.divergence.unwrap();
    assert_eq!(d.code, DivergenceCode::ValueMismatch);
    assert_eq!(d.h1, Some(PtrId(200)));
    assert_eq!(d.h2, Some(PtrId(1200)));
    assert_eq!(d.path, "properties[1]");
}

#[test]
fn context_without_counterpart_diverges() {
    let h1 = fixture(0, "hello", 42);
    let mut h2 = fixture(0, "hello", 42);
    h2.contexts[0].tag = ContextTag(2);

    let d = compare_snapshots(&h1, &h2).unwrap().divergence.unwrap();
    assert_eq!(d.code, DivergenceCode::MissingContext);
}

#[test]
fn root_count_difference_diverges() {
    let h1 = fixture(0, "hello", 42);
    let mut h2 = fixture(0, "hello", 42);
    h2.roots.pop();

    let d = compare_snapshots(&h1, &h2).unwrap().divergence.unwrap();
    assert_eq!(d.code, DivergenceCode::RootCountMismatch);
}

#[test]
fn reordered_roots_are_not_equivalent() {
    let h1 = fixture(0, "hello", 42);
    let mut h2 = fixture(0, "hello", 42);
    h2.roots.reverse();

    let report = compare_snapshots(&h1, &h2).unwrap();
    assert!(!report.is_equivalent());
}

#[test]
fn renamed_function_body_diverges() {
    let h1 = fixture(0, "hello", 42);
    let mut h2 = fixture(0, "hello", 42);
    h2.function_bodies.get_mut(&PtrId(301)).unwrap().name = "g".to_owned();

    let d = compare_snapshots(&h1, &h2).unwrap().divergence.unwrap();
    assert_eq!(d.code, DivergenceCode::FieldMismatch);
    assert_eq!(d.path, "name");
}

#[test]
fn dangling_type_reference_is_fatal() {
    let h1 = fixture(0, "hello", 42);
    let mut h2 = fixture(0, "hello", 42);
    h2.objects.get_mut(&PtrId(201)).unwrap().type_id = PtrId(99);

    let err = compare_snapshots(&h1, &h2).unwrap_err();
    assert_eq!(
        err,
        CompareError::MissingIdentity {
            side: Side::H2,
            category: "type",
            id: PtrId(99),
        }
    );
}
