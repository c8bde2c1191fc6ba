use bson::{Bson, DateTime};
use docmock::aggregate::{Evaluator, is_unimplemented_operator, is_unimplemented_stage};
use docmock::{Client, Collection, DbError, Document, doc};

fn sales() -> Collection {
    let coll = Client::new().database("agg").unwrap().collection("sales").unwrap();
    coll.insert_many(
        vec![
            doc! {"_id": 1, "item": "pen", "qty": 2, "price": 1.5, "tags": ["office", "cheap"]},
            doc! {"_id": 2, "item": "ink", "qty": 1, "price": 10.0, "tags": ["office"]},
            doc! {"_id": 3, "item": "pen", "qty": 5, "price": 1.5, "tags": []},
            doc! {"_id": 4, "item": "pad", "qty": 3, "price": 4.0},
        ],
        true,
    )
    .unwrap();
    coll
}

fn run(coll: &Collection, pipeline: Vec<Document>) -> Vec<Document> {
    coll.aggregate(&pipeline).unwrap().to_vec().unwrap()
}

#[test]
fn group_sort_and_project() {
    let out = run(
        &sales(),
        vec![
            doc! {"$group": {"_id": "$item", "units": {"$sum": "$qty"}, "revenue": {"$sum": {"$multiply": ["$qty", "$price"]}}}},
            doc! {"$sort": {"units": -1}},
            doc! {"$project": {"_id": 0, "item": "$_id", "units": 1, "big": {"$gte": ["$units", 3]}}},
        ],
    );
    assert_eq!(
        out,
        vec![
            doc! {"units": 7, "item": "pen", "big": true},
            doc! {"units": 3, "item": "pad", "big": true},
            doc! {"units": 1, "item": "ink", "big": false},
        ]
    );
}

#[test]
fn unwind_count_and_facet() {
    let coll = sales();
    let unwound = run(&coll, vec![doc! {"$unwind": "$tags"}, doc! {"$count": "n"}]);
    assert_eq!(unwound, vec![doc! {"n": 3}]);

    let faceted = run(
        &coll,
        vec![doc! {"$facet": {
            "cheap": [{"$match": {"price": {"$lt": 2}}}, {"$count": "n"}],
            "first": [{"$sort": {"qty": -1}}, {"$limit": 1}, {"$project": {"item": 1, "_id": 0}}],
        }}],
    );
    assert_eq!(faceted, vec![doc! {"cheap": [{"n": 2}], "first": [{"item": "pen"}]}]);
}

#[test]
fn bucket_with_default() {
    let out = run(
        &sales(),
        vec![doc! {"$bucket": {"groupBy": "$price", "boundaries": [0, 2, 5], "default": "other"}}],
    );
    assert_eq!(out, vec![doc! {"_id": 0, "count": 2}, doc! {"_id": 2, "count": 1}, doc! {"_id": "other", "count": 1}]);
}

#[test]
fn lookup_and_out_across_collections() {
    let client = Client::new();
    let db = client.database("agg").unwrap();
    db.collection("orders").unwrap().insert_many(vec![doc! {"_id": 1, "sku": "a"}, doc! {"_id": 2, "sku": "b"}], true).unwrap();
    db.collection("items").unwrap().insert_one(doc! {"_id": "x", "sku": "a", "name": "Alpha"}).unwrap();
    let out = run(
        &db.collection("orders").unwrap(),
        vec![
            doc! {"$lookup": {"from": "items", "localField": "sku", "foreignField": "sku", "as": "item"}},
            doc! {"$unwind": "$item"},
            doc! {"$replaceRoot": {"newRoot": "$item"}},
            doc! {"$out": "joined"},
        ],
    );
    assert_eq!(out, vec![doc! {"_id": "x", "sku": "a", "name": "Alpha"}]);
    assert_eq!(db.list_collection_names(), vec!["orders".to_string(), "items".to_string(), "joined".to_string()]);
}

#[test]
fn expression_edge_rules() {
    let d = doc! {"a": 5, "arr": [1, 2], "when": DateTime::from_millis(0)};
    let ev = Evaluator::new(&d);
    let cond = ev.evaluate(&Bson::Document(doc! {"$cond": {"if": {"$size": "$a"}, "then": "t", "else": "f"}})).unwrap();
    assert_eq!(cond, Some(Bson::from("f")));
    let fallback = ev.evaluate(&Bson::Document(doc! {"$ifNull": ["$missing", "dflt"]})).unwrap();
    assert_eq!(fallback, Some(Bson::from("dflt")));
    let size_err = ev.evaluate(&Bson::Document(doc! {"$size": "$a"})).unwrap_err();
    assert!(matches!(size_err, DbError::OperationFailure { .. }));
    assert_eq!(ev.evaluate(&Bson::from("$missing")).unwrap(), None);
    let year = ev.evaluate(&Bson::Document(doc! {"$year": "$when"})).unwrap();
    assert_eq!(year, Some(Bson::Int32(1970)));
}

#[test]
fn capability_probing() {
    assert!(is_unimplemented_stage("$merge"));
    assert!(!is_unimplemented_stage("$match"));
    assert!(is_unimplemented_operator("$map"));
    let coll = sales();
    assert!(matches!(coll.aggregate(&[doc! {"$merge": "x"}]), Err(DbError::NotImplemented(_))));
    assert_eq!(coll.aggregate(&[doc! {"$bogus": 1}]).unwrap_err().code(), Some(40324));
    assert!(matches!(coll.aggregate(&[doc! {"$project": {"x": {"$map": {}}}}]), Err(DbError::NotImplemented(_))));
}
