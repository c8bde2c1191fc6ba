use docmock::query::{FindOneAndOptions, ReturnDocument, SortSpec, UpdateOptions};
use docmock::{Client, Collection, DbError, doc};

fn fresh() -> Collection {
    Client::new().database("it").unwrap().collection("upd").unwrap()
}

#[test]
fn dotted_set_creates_nested_document() {
    let coll = fresh();
    coll.insert_one(doc! {"_id": 1}).unwrap();
    let report = coll.update_one(doc! {"_id": 1}, doc! {"$set": {"x.y": 5}}, UpdateOptions::default()).unwrap();
    assert_eq!((report.matched, report.modified), (1, 1));
    assert_eq!(coll.find_one(doc! {"_id": 1}).unwrap().unwrap(), doc! {"_id": 1, "x": {"y": 5}});
}

#[test]
fn positional_set_touches_only_the_matched_element() {
    let coll = fresh();
    coll.insert_one(doc! {"_id": 1, "grades": [{"k": "a", "v": 1}, {"k": "b", "v": 2}, {"k": "c", "v": 3}]}).unwrap();
    coll.update_one(
        doc! {"_id": 1, "grades": {"$elemMatch": {"k": "b"}}},
        doc! {"$set": {"grades.$.v": 20}},
        UpdateOptions::default(),
    )
    .unwrap();
    let stored = coll.find_one(doc! {}).unwrap().unwrap();
    assert_eq!(
        stored.get_array("grades").unwrap(),
        &vec![
            docmock::Value::Document(doc! {"k": "a", "v": 1}),
            docmock::Value::Document(doc! {"k": "b", "v": 20}),
            docmock::Value::Document(doc! {"k": "c", "v": 3}),
        ]
    );
}

#[test]
fn array_operators_through_update_many() {
    let coll = fresh();
    coll.insert_many(vec![doc! {"_id": 1, "t": [1, 2, 2, 3]}, doc! {"_id": 2, "t": [2]}], true).unwrap();
    let report = coll.update_many(doc! {}, doc! {"$pull": {"t": 2}}, UpdateOptions::default()).unwrap();
    assert_eq!((report.matched, report.modified), (2, 2));
    coll.update_many(doc! {}, doc! {"$addToSet": {"t": 3}}, UpdateOptions::default()).unwrap();
    coll.update_many(doc! {}, doc! {"$push": {"t": {"$each": [9, 8], "$sort": 1}}}, UpdateOptions::default()).unwrap();
    let docs = coll.find(doc! {}).unwrap().to_vec().unwrap();
    assert_eq!(docs, vec![doc! {"_id": 1, "t": [1, 3, 8, 9]}, doc! {"_id": 2, "t": [3, 8, 9]}]);
}

#[test]
fn mixing_operators_and_fields_is_rejected() {
    let coll = fresh();
    coll.insert_one(doc! {"_id": 1, "a": 1}).unwrap();
    let err = coll.update_one(doc! {"_id": 1}, doc! {"$set": {"a": 2}, "b": 1}, UpdateOptions::default()).unwrap_err();
    assert!(matches!(err, DbError::OperationFailure { .. }));
    assert_eq!(coll.find_one(doc! {}).unwrap().unwrap(), doc! {"_id": 1, "a": 1});
}

#[test]
fn upsert_seeds_from_query_and_honours_set_on_insert() {
    let coll = fresh();
    let opts = UpdateOptions { upsert: true };
    let report = coll
        .update_one(doc! {"sku": "abc", "meta.kind": "tool"}, doc! {"$inc": {"qty": 5}, "$setOnInsert": {"new": true}}, opts)
        .unwrap();
    assert_eq!(report.matched, 0);
    let id = report.upserted_id.expect("upserted");
    let stored = coll.find_one(doc! {"_id": id}).unwrap().unwrap();
    assert_eq!(stored.get_str("sku").unwrap(), "abc");
    assert_eq!(stored.get_document("meta").unwrap(), &doc! {"kind": "tool"});
    assert_eq!(stored.get_i32("qty").unwrap(), 5);
    assert!(stored.get_bool("new").unwrap());

    let second = coll.update_one(doc! {"sku": "abc"}, doc! {"$inc": {"qty": 1}, "$setOnInsert": {"new": false}}, opts).unwrap();
    assert_eq!((second.matched, second.modified, second.upserted_id), (1, 1, None));
    assert!(coll.find_one(doc! {}).unwrap().unwrap().get_bool("new").unwrap());
}

#[test]
fn replacement_with_new_id_rekeys_in_place() {
    let coll = fresh();
    coll.insert_many(vec![doc! {"_id": 1, "v": "a"}, doc! {"_id": 2, "v": "b"}, doc! {"_id": 3, "v": "c"}], true).unwrap();
    coll.replace_one(doc! {"_id": 2}, doc! {"_id": 20, "v": "B"}, UpdateOptions::default()).unwrap();
    let order: Vec<i32> = coll.find(doc! {}).unwrap().map(|d| d.get_i32("_id").unwrap()).collect();
    assert_eq!(order, vec![1, 20, 3]);
    assert!(coll.find_one(doc! {"_id": 2}).unwrap().is_none());
    let clash = coll.replace_one(doc! {"_id": 20}, doc! {"_id": 1}, UpdateOptions::default()).unwrap_err();
    assert_eq!(clash.code(), Some(11000));
}

#[test]
fn changing_id_with_operators_is_a_write_error() {
    let coll = fresh();
    coll.insert_one(doc! {"_id": 1}).unwrap();
    let err = coll.update_one(doc! {"_id": 1}, doc! {"$set": {"_id": 2}}, UpdateOptions::default()).unwrap_err();
    assert_eq!(err.code(), Some(66));
}

#[test]
fn find_one_and_update_returns_the_requested_side() {
    let coll = fresh();
    coll.insert_many(vec![doc! {"_id": 1, "n": 3}, doc! {"_id": 2, "n": 1}], true).unwrap();
    let options = FindOneAndOptions {
        sort: Some(vec![SortSpec::asc("n")]),
        return_document: ReturnDocument::After,
        projection: Some(doc! {"n": 1, "_id": 0}),
        ..Default::default()
    };
    let after = coll.find_one_and_update(doc! {}, doc! {"$inc": {"n": 10}}, options).unwrap();
    assert_eq!(after, Some(doc! {"n": 11}));
    let before = coll.find_one_and_delete(doc! {"n": {"$gt": 5}}, FindOneAndOptions::default()).unwrap();
    assert_eq!(before, Some(doc! {"_id": 2, "n": 11}));
    assert_eq!(coll.estimated_document_count(), 1);
}
