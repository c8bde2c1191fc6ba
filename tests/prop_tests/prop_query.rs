use bson::{Bson, Document, doc};
use docmock::query::matches;
use proptest::prelude::*;

fn scalar() -> impl Strategy<Value = Bson> {
    prop_oneof![
        Just(Bson::Null),
        any::<bool>().prop_map(Bson::Boolean),
        any::<i32>().prop_map(Bson::Int32),
        any::<i64>().prop_map(Bson::Int64),
        (-1.0e6f64..1.0e6f64).prop_map(Bson::Double),
        "[a-z]{0,6}".prop_map(Bson::String),
    ]
}

fn value() -> impl Strategy<Value = Bson> {
    scalar().prop_recursive(2, 12, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Bson::Array),
            prop::collection::vec(("[a-z]{1,3}", inner), 0..3)
                .prop_map(|pairs| Bson::Document(pairs.into_iter().collect::<Document>())),
        ]
    })
}

fn document() -> impl Strategy<Value = Document> {
    (any::<i64>(), prop::collection::vec(("[a-z]{1,4}", value()), 0..5)).prop_map(|(id, fields)| {
        let mut d = doc! {"_id": id};
        for (k, v) in fields {
            d.insert(k, v);
        }
        d
    })
}

proptest! {
    #![proptest_config(proptest::test_runner::Config {
        failure_persistence: Some(Box::new(proptest::test_runner::FileFailurePersistence::WithSource("proptest-regressions"))),
        cases: 64,
        .. proptest::test_runner::Config::default()
    })]

    #[test]
    fn prop_empty_filter_matches_everything(d in document()) {
        prop_assert!(matches(&doc! {}, &d).unwrap(), "assertion failed");
    }

    #[test]
    fn prop_id_filter_selects_only_its_document(d in document(), other in any::<i64>()) {
        let id = d.get("_id").cloned().unwrap();
        prop_assert!(matches(&doc! {"_id": id.clone()}, &d).unwrap(), "assertion failed");
        prop_assume!(Bson::Int64(other) != id);
        prop_assert!(!matches(&doc! {"_id": other}, &d).unwrap(), "assertion failed");
    }

    #[test]
    fn prop_ordering_operators_partition_numbers(a in any::<i32>(), b in any::<i32>()) {
        let d = doc! {"x": a};
        let gt = matches(&doc! {"x": {"$gt": b}}, &d).unwrap();
        let lte = matches(&doc! {"x": {"$lte": b}}, &d).unwrap();
        prop_assert!(gt != lte);
        prop_assert_eq!(matches(&doc! {"x": {"$in": [b]}}, &d).unwrap(), a == b);
        prop_assert_eq!(matches(&doc! {"x": {"$nin": [b]}}, &d).unwrap(), a != b);
    }

    #[test]
    fn prop_array_membership_matches_elements(items in prop::collection::vec(any::<i32>(), 1..6), pick in any::<prop::sample::Index>()) {
        let chosen = items[pick.index(items.len())];
        let d = doc! {"xs": items.clone()};
        prop_assert!(matches(&doc! {"xs": chosen}, &d).unwrap(), "assertion failed");
        prop_assert!(matches(&doc! {"xs": {"$all": [chosen]}}, &d).unwrap(), "assertion failed");
        prop_assert!(matches(&doc! {"xs": items}, &d).unwrap(), "assertion failed");
    }
}
