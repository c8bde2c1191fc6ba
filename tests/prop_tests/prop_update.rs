use bson::{Bson, doc};
use docmock::query::apply_update;
use proptest::prelude::*;

proptest! {
    #![proptest_config(proptest::test_runner::Config {
        failure_persistence: Some(Box::new(proptest::test_runner::FileFailurePersistence::WithSource("proptest-regressions"))),
        cases: 64,
        .. proptest::test_runner::Config::default()
    })]

    #[test]
    fn prop_repeated_inc_equals_one_summed_inc(start in -1_000_000i64..1_000_000, step in -1000i64..1000, times in 1usize..6) {
        let mut stepped = doc! {"_id": 1, "n": start};
        for _ in 0..times {
            apply_update(&mut stepped, &doc! {"$inc": {"n": step}}, &doc! {}, false).unwrap();
        }
        let mut once = doc! {"_id": 1, "n": start};
        let total = step * i64::try_from(times).unwrap();
        apply_update(&mut once, &doc! {"$inc": {"n": total}}, &doc! {}, false).unwrap();
        prop_assert_eq!(stepped, once);
    }

    #[test]
    fn prop_add_to_set_is_idempotent(existing in prop::collection::vec(0i32..10, 0..6), value in 0i32..10) {
        let mut d = doc! {"_id": 1, "s": existing.clone()};
        let update = doc! {"$addToSet": {"s": value}};
        apply_update(&mut d, &update, &doc! {}, false).unwrap();
        let once = d.clone();
        let changed = apply_update(&mut d, &update, &doc! {}, false).unwrap();
        prop_assert!(!changed);
        prop_assert_eq!(&d, &once);
        let count = d.get_array("s").unwrap().iter().filter(|b| **b == Bson::Int32(value)).count();
        prop_assert_eq!(count, existing.iter().filter(|v| **v == value).count().max(1));
    }

    #[test]
    fn prop_positional_set_touches_one_element(values in prop::collection::vec(0i32..5, 1..6), pick in any::<prop::sample::Index>()) {
        let target = values[pick.index(values.len())];
        let items: Vec<Bson> = values.iter().map(|v| Bson::Document(doc! {"v": *v})).collect();
        let mut d = doc! {"_id": 1, "items": items.clone()};
        let query = doc! {"items": {"$elemMatch": {"v": target}}};
        apply_update(&mut d, &doc! {"$set": {"items.$.hit": true}}, &query, false).unwrap();
        let first = values.iter().position(|v| *v == target).unwrap();
        let after = d.get_array("items").unwrap();
        for (i, item) in after.iter().enumerate() {
            let Bson::Document(item) = item else { panic!("not a document") };
            prop_assert_eq!(item.contains_key("hit"), i == first);
        }
    }

    #[test]
    fn prop_small_index_segments_pad_with_nulls(idx in 0usize..64, nested in any::<bool>()) {
        let mut d = doc! {"_id": 1, "a": [1, 2]};
        let path = if nested { format!("a.{idx}.k") } else { format!("a.{idx}") };
        let mut set = bson::Document::new();
        set.insert(path, 7);
        let outcome = apply_update(&mut d, &doc! {"$set": set}, &doc! {}, false);
        if nested && idx < 2 {
            // Existing scalar elements cannot grow fields.
            prop_assert_eq!(outcome.unwrap_err().code(), Some(28));
            return Ok(());
        }
        outcome.unwrap();
        let items = d.get_array("a").unwrap();
        prop_assert_eq!(items.len(), (idx + 1).max(2));
        let expected = if nested { Bson::Document(doc! {"k": 7}) } else { Bson::Int32(7) };
        prop_assert_eq!(&items[idx], &expected);
        prop_assert!(items[2.min(idx)..idx].iter().all(|b| *b == Bson::Null));
    }

    #[test]
    fn prop_huge_index_segments_are_rejected(idx in 1_500_003u64..=u64::MAX, nested in any::<bool>()) {
        let original = doc! {"_id": 1, "a": [1, 2]};
        let mut d = original.clone();
        let path = if nested { format!("a.{idx}.k") } else { format!("a.{idx}") };
        let mut set = bson::Document::new();
        set.insert(path, 7);
        let err = apply_update(&mut d, &doc! {"$set": set}, &doc! {}, false).unwrap_err();
        prop_assert_eq!(err.code(), Some(2));
        prop_assert_eq!(d, original);
    }
}
