use bson::{Bson, doc};
use docmock::aggregate::Evaluator;
use proptest::prelude::*;

fn count() -> impl Strategy<Value = i64> {
    prop_oneof![-8i64..8, Just(i64::MIN), Just(i64::MAX), any::<i64>()]
}

proptest! {
    #![proptest_config(proptest::test_runner::Config {
        failure_persistence: Some(Box::new(proptest::test_runner::FileFailurePersistence::WithSource("proptest-regressions"))),
        cases: 64,
        .. proptest::test_runner::Config::default()
    })]

    #[test]
    fn prop_slice_is_a_contiguous_window(items in prop::collection::vec(0i32..100, 0..8), n in count()) {
        let d = doc! {"a": items.clone()};
        let out = Evaluator::new(&d).evaluate(&Bson::Document(doc! {"$slice": ["$a", n]})).unwrap().unwrap();
        let Bson::Array(out) = out else { panic!("not an array") };
        let want = usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX).min(items.len());
        prop_assert_eq!(out.len(), want);
        let expected: Vec<Bson> = if n >= 0 {
            items[..want].iter().map(|v| Bson::Int32(*v)).collect()
        } else {
            items[items.len() - want..].iter().map(|v| Bson::Int32(*v)).collect()
        };
        prop_assert_eq!(out, expected);
    }

    #[test]
    fn prop_slice_with_position_never_panics(items in prop::collection::vec(0i32..100, 0..8), p in count(), n in 1i64..10) {
        let d = doc! {"a": items.clone()};
        let out = Evaluator::new(&d).evaluate(&Bson::Document(doc! {"$slice": ["$a", p, n]})).unwrap().unwrap();
        let Bson::Array(out) = out else { panic!("not an array") };
        prop_assert!(out.len() <= usize::try_from(n).unwrap().min(items.len()));
    }
}
