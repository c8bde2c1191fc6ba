use bson::{Bson, doc};
use docmock::query::SortSpec;
use docmock::Client;
use proptest::prelude::*;

proptest! {
    #![proptest_config(proptest::test_runner::Config {
        failure_persistence: Some(Box::new(proptest::test_runner::FileFailurePersistence::WithSource("proptest-regressions"))),
        cases: 32,
        .. proptest::test_runner::Config::default()
    })]

    #[test]
    fn prop_sort_is_stable_and_ordered(keys in prop::collection::vec(0i32..5, 0..20)) {
        let coll = Client::new().database("prop").unwrap().collection("sort").unwrap();
        for (i, k) in keys.iter().enumerate() {
            coll.insert_one(doc! {"_id": i64::try_from(i).unwrap(), "k": *k}).unwrap();
        }
        let out: Vec<(i32, i64)> = coll
            .find(doc! {})
            .unwrap()
            .sort(vec![SortSpec::asc("k")])
            .map(|d| (d.get_i32("k").unwrap(), d.get_i64("_id").unwrap()))
            .collect();
        let mut expected: Vec<(i32, i64)> = keys.iter().enumerate().map(|(i, k)| (*k, i64::try_from(i).unwrap())).collect();
        expected.sort_by_key(|(k, _)| *k);
        prop_assert_eq!(out, expected);
    }

    #[test]
    fn prop_skip_and_limit_window_the_sorted_order(n in 0usize..15, skip in 0usize..20, limit in 0usize..20) {
        let coll = Client::new().database("prop").unwrap().collection("window").unwrap();
        for i in 0..n {
            coll.insert_one(doc! {"_id": i64::try_from(i).unwrap()}).unwrap();
        }
        let got = docmock::Cursor::count(&coll.find(doc! {}).unwrap().sort(vec![SortSpec::desc("_id")]).skip(skip).limit(limit), true).unwrap();
        let remaining = n.saturating_sub(skip);
        let expected = if limit == 0 { remaining } else { remaining.min(limit) };
        prop_assert_eq!(got, expected);
        let ids: Vec<Bson> = coll.find(doc! {}).unwrap().sort(vec![SortSpec::desc("_id")]).map(|d| d.get("_id").cloned().unwrap()).collect();
        prop_assert!(ids.windows(2).all(|w| matches!((&w[0], &w[1]), (Bson::Int64(a), Bson::Int64(b)) if a > b)));
    }
}
