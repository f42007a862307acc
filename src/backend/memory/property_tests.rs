//! Property-Based Tests for the in-memory backend

use proptest::prelude::*;
use std::collections::BTreeSet;

use super::{glob_match, MemoryServer};
use crate::backend::{Connector, Reply};
use crate::store::DELETE_BY_PATTERN_SCRIPT;

// == Strategies ==
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-c]{1,3}(:[a-c0-9]{1,4})?"
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("test runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // A pattern without metacharacters matches exactly itself.
    #[test]
    fn prop_literal_pattern_matches_only_itself(a in "[a-z0-9:]{0,12}", b in "[a-z0-9:]{0,12}") {
        prop_assert!(glob_match(&a, &a));
        prop_assert_eq!(glob_match(&a, &b), a == b);
    }

    // `prefix*` is equivalent to starts_with.
    #[test]
    fn prop_prefix_star_is_starts_with(prefix in "[a-z:]{0,6}", key in "[a-z:]{0,12}") {
        let pattern = format!("{}*", prefix);
        prop_assert_eq!(glob_match(&pattern, &key), key.starts_with(&prefix));
    }

    // `?` consumes exactly one character.
    #[test]
    fn prop_question_marks_match_length(len in 0usize..8, key in "[a-z]{0,10}") {
        let pattern = "?".repeat(len);
        prop_assert_eq!(glob_match(&pattern, &key), key.chars().count() == len);
    }

    // The pattern-delete script removes exactly the keys KEYS would list,
    // and reports that count.
    #[test]
    fn prop_pattern_delete_removes_exactly_matches(
        keys in prop::collection::btree_set(key_strategy(), 0..20),
        prefix in "[a-c]{1,2}",
    ) {
        let pattern = format!("{}*", prefix);
        let expected: BTreeSet<&String> = keys.iter().filter(|k| k.starts_with(&prefix)).collect();

        let server = MemoryServer::new();
        let (deleted, listed_after) = runtime().block_on(async {
            let mut conn = server.connector().connect().await.unwrap();
            for key in &keys {
                conn.execute("SET", &[key.clone(), "v".to_string()]).await.unwrap();
            }
            let id = conn.load_script(DELETE_BY_PATTERN_SCRIPT).await.unwrap();
            let deleted = conn
                .eval_script(&id, &[], &[pattern.clone(), "1000".to_string()])
                .await
                .unwrap();
            let listed = conn.execute("KEYS", &["*".to_string()]).await.unwrap();
            (deleted, listed.into_strings().unwrap())
        });

        prop_assert_eq!(deleted, Reply::Int(expected.len() as i64));
        prop_assert_eq!(listed_after.len(), keys.len() - expected.len());
        prop_assert!(listed_after.iter().all(|k| !k.starts_with(&prefix)));
    }
}
