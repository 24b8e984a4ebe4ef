// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Property tests for identity dictionaries and the log wire format.

use std::collections::HashSet;

use echo_replay::{
    Action, ActionLog, IdentifierDictionary, InflateCategory, InflateError, InlineValue, LoggedVar,
    MemorySourceStore, PtrId, ReplayConfig,
};
use proptest::prelude::*;

fn logged_var() -> impl Strategy<Value = LoggedVar> {
    prop_oneof![
        Just(LoggedVar::Absent),
        Just(LoggedVar::Inline(InlineValue::Undefined)),
        Just(LoggedVar::Inline(InlineValue::Null)),
        any::<bool>().prop_map(|b| LoggedVar::Inline(InlineValue::Bool(b))),
        any::<i32>().prop_map(|i| LoggedVar::Inline(InlineValue::Int(i))),
        any::<u64>().prop_map(|id| LoggedVar::Ptr(PtrId(id))),
    ]
}

proptest! {
    #[test]
    fn dictionary_add_is_checked_and_lookup_total(ids in prop::collection::vec(0u64..64, 0..128)) {
        let mut dict = IdentifierDictionary::new(InflateCategory::Object);
        let mut seen = HashSet::new();
        for (n, id) in ids.iter().enumerate() {
            let res = dict.add(PtrId(*id), n);
            if seen.insert(*id) {
                prop_assert!(res.is_ok());
            } else {
                let is_duplicate = matches!(res, Err(InflateError::DuplicateIdentity { .. }));
                prop_assert!(is_duplicate);
            }
        }
        prop_assert_eq!(dict.len(), seen.len());
        for id in 0u64..64 {
            if seen.contains(&id) {
                let first = ids.iter().position(|x| *x == id).unwrap();
                prop_assert_eq!(dict.lookup(PtrId(id)).copied().unwrap(), first);
            } else {
                let is_missing = matches!(
                    dict.lookup(PtrId(id)),
                    Err(InflateError::MissingIdentity { .. })
                );
                prop_assert!(is_missing);
            }
        }
    }

    #[test]
    fn call_arguments_survive_the_log_file(
        args in prop::collection::vec(logged_var(), 1..16),
        result in logged_var(),
        depth in 0u32..4,
    ) {
        let mut log = ActionLog::new();
        log.push_construct_call(args.clone(), result).unwrap();
        log.push_call(depth, args.clone(), result, -1).unwrap();
        let config = ReplayConfig::default();
        let mut store = MemorySourceStore::new();
        let bytes = log.to_bytes(&mut store, &config).unwrap();

        let back = ActionLog::from_bytes(&bytes, &store, &config).unwrap();
        prop_assert_eq!(back.len(), 2);
        for record in back.records() {
            let (payload, logged) = match &record.action {
                Action::ConstructCall(c) => (c.args, c.result),
                Action::CallExistingFunction(c) => (c.args, c.result),
                other => panic!("unexpected {other:?}"),
            };
            prop_assert_eq!(back.arena().vars(payload).unwrap(), &args[..]);
            prop_assert_eq!(logged, result);
            prop_assert_eq!(record.exec_args_len(), Some(args.len() - 1));
        }
    }

    #[test]
    fn garbage_never_panics_the_reader(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let store = MemorySourceStore::new();
        let _ = ActionLog::from_bytes(&bytes, &store, &ReplayConfig::default());
    }
}
