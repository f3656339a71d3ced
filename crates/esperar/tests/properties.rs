//! Property-based tests for esperar.
//!
//! Uses proptest to check the retry loop and the text matching rules for
//! arbitrary inputs.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use esperar::collection::matches_in_any_order;
use esperar::condition::normalize;
use esperar::prelude::*;
use proptest::prelude::*;
use serde_json::Value;

fn dispatcher() -> RetryDispatcher {
    RetryDispatcher::new(Arc::new(CommandRegistry::with_builtins()))
}

fn patient() -> RetryConfig {
    RetryConfig::new(Duration::from_secs(10)).with_poll_interval(Duration::from_millis(1))
}

fn not_found() -> EsperarError {
    EsperarError::NotFound {
        locator: "#x".into(),
    }
}

// === Retry Loop Property Tests ===

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A zero budget means exactly one attempt, whatever the outcome.
    #[test]
    fn prop_zero_timeout_single_attempt(retryable in any::<bool>()) {
        let doc = MemoryDocument::new();
        let mut attempts = 0;
        let result = dispatcher().poll(&doc, "op", "#x", RetryConfig::immediate(), || {
            attempts += 1;
            if retryable {
                RetryOutcome::Retryable(not_found())
            } else {
                RetryOutcome::Fatal(EsperarError::invalid_argument("bad"))
            }
        });
        prop_assert!(result.is_err());
        prop_assert_eq!(attempts, 1);
    }

    /// Success at attempt k stops the loop at k.
    #[test]
    fn prop_success_at_attempt_k(k in 1usize..8) {
        let doc = MemoryDocument::new();
        let mut attempts = 0;
        let result = dispatcher().poll(&doc, "op", "#x", patient(), || {
            attempts += 1;
            if attempts < k {
                RetryOutcome::Retryable(not_found())
            } else {
                RetryOutcome::Success(CommandOutput::Value(Value::from(attempts)))
            }
        });
        prop_assert_eq!(result.unwrap(), CommandOutput::Value(Value::from(k)));
        prop_assert_eq!(attempts, k);
    }

    /// The first fatal failure ends the loop, regardless of budget left.
    #[test]
    fn prop_fatal_short_circuits(k in 1usize..8) {
        let doc = MemoryDocument::new();
        let mut attempts = 0;
        let result = dispatcher().poll(&doc, "op", "#x", patient(), || {
            attempts += 1;
            if attempts < k {
                RetryOutcome::Retryable(not_found())
            } else {
                RetryOutcome::Fatal(EsperarError::RemoteEvaluation { message: "boom".into() })
            }
        });
        prop_assert_eq!(attempts, k);
        let is_fatal = matches!(result, Err(EsperarError::Fatal { .. }));
        prop_assert!(is_fatal);
    }
}

// === Text Matching Property Tests ===

proptest! {
    /// Normalizing twice changes nothing.
    #[test]
    fn prop_normalize_idempotent(text in r"[a-zA-Z0-9 \t\n\x{00A0}\x{2007}\x{202F}]{0,40}") {
        let once = normalize(&text);
        prop_assert_eq!(normalize(&once), once.clone());
        prop_assert!(!once.starts_with(' ') && !once.ends_with(' '));
        prop_assert!(!once.contains("  "));
    }

    /// Any-order matching agrees with its definition.
    #[test]
    fn prop_any_order_matches_definition(
        actual in prop::collection::vec("[a-cA-C ]{0,6}", 0..6),
        expected in prop::collection::vec("[a-cA-C]{0,3}", 0..4),
    ) {
        let reference = expected.iter().all(|e| {
            actual.iter().any(|a| normalize(a).contains(&normalize(e)))
        });
        prop_assert_eq!(matches_in_any_order(actual.as_slice(), expected.as_slice()), reference);
    }

    /// The order of actual texts never matters.
    #[test]
    fn prop_any_order_ignores_actual_order(
        actual in prop::collection::vec("[a-d]{1,5}", 1..6),
        expected in prop::collection::vec("[a-d]{1,2}", 1..4),
    ) {
        let mut reversed = actual.clone();
        reversed.reverse();
        prop_assert_eq!(
            matches_in_any_order(actual.as_slice(), expected.as_slice()),
            matches_in_any_order(reversed.as_slice(), expected.as_slice())
        );
    }

    /// Fragments cut from actual texts always match, even when repeated.
    #[test]
    fn prop_any_order_fragments_match(
        actual in prop::collection::vec("[a-z]{2,8}", 1..5),
        picks in prop::collection::vec((any::<prop::sample::Index>(), 0usize..2), 1..6),
    ) {
        let expected: Vec<String> = picks
            .iter()
            .map(|(index, skip)| {
                let source = index.get(actual.as_slice());
                source[(*skip).min(source.len() - 1)..].to_uppercase()
            })
            .collect();
        prop_assert!(matches_in_any_order(actual.as_slice(), expected.as_slice()));
    }
}

// === Registry And Resolution Property Tests ===

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Registering the same pair n times is the same as once.
    #[test]
    fn prop_registration_idempotent(times in 1usize..6) {
        let doc = MemoryDocument::new();
        doc.append(None, NodeSpec::new("p").text("same")).unwrap();
        let chain = LocatorChain::root("p");

        let once = CommandRegistry::new();
        let many = CommandRegistry::new();
        let command: Arc<dyn Command> = Arc::new(esperar::command::GetText);
        once.register_shared("text", Arc::clone(&command));
        for _ in 0..times {
            many.register_shared("text", Arc::clone(&command));
        }

        prop_assert_eq!(once.names(), many.names());
        let a = once.dispatch("text", &chain, &doc, &[]);
        let b = many.dispatch("text", &chain, &doc, &[]);
        match (a, b) {
            (RetryOutcome::Success(a), RetryOutcome::Success(b)) => prop_assert_eq!(a, b),
            other => prop_assert!(false, "unexpected {:?}", other),
        }
    }

    /// Resolving twice against an unchanged document gives equal handles.
    #[test]
    fn prop_resolution_stable(count in 1usize..6, pick in 0usize..6) {
        let doc = MemoryDocument::new();
        let list = doc.append(None, NodeSpec::new("ul")).unwrap();
        for i in 0..count {
            doc.append(Some(&list), NodeSpec::new("li").text(format!("{i}"))).unwrap();
        }
        let chain = LocatorChain::root("ul").child_at("li", pick);
        match (chain.resolve(&doc), chain.resolve(&doc)) {
            (Ok(a), Ok(b)) => {
                prop_assert!(pick < count);
                prop_assert_eq!(a, b);
            }
            (Err(EsperarError::IndexOutOfRange { index, count: seen, .. }), Err(_)) => {
                prop_assert_eq!(index, pick);
                prop_assert_eq!(seen, count);
            }
            other => prop_assert!(false, "unexpected {:?}", other),
        }
    }
}
