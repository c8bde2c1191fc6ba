use docmock::query::{FindOptions, SortSpec};
use docmock::{Client, Collection, DbError, Value, doc};

fn fresh(name: &str) -> Collection {
    Client::new().database("it").unwrap().collection(name).unwrap()
}

fn ids(coll: &Collection, filter: docmock::Document) -> Vec<i32> {
    coll.find(filter).unwrap().map(|d| d.get_i32("_id").unwrap()).collect()
}

#[test]
fn gt_selects_only_the_larger_document() {
    let coll = fresh("scenario");
    coll.insert_many(vec![doc! {"_id": 1, "a": 1, "b": 2}, doc! {"_id": 2, "a": 2, "b": 4}], true).unwrap();
    let found = coll.find(doc! {"a": {"$gt": 1}}).unwrap().to_vec().unwrap();
    assert_eq!(found, vec![doc! {"_id": 2, "a": 2, "b": 4}]);
}

#[test]
fn dotted_paths_arrays_and_logic() {
    let coll = fresh("paths");
    coll.insert_many(
        vec![
            doc! {"_id": 1, "a": {"b": [1, 2, 3]}, "tags": ["red", "blue"]},
            doc! {"_id": 2, "a": {"b": 5}, "tags": ["green"]},
            doc! {"_id": 3, "items": [{"k": "x", "n": 1}, {"k": "y", "n": 9}]},
            doc! {"_id": 4, "a": null},
        ],
        true,
    )
    .unwrap();
    assert_eq!(ids(&coll, doc! {"a.b": 2}), vec![1]);
    assert_eq!(ids(&coll, doc! {"a.b.1": 2}), vec![1]);
    assert_eq!(ids(&coll, doc! {"tags": "blue"}), vec![1]);
    assert_eq!(ids(&coll, doc! {"tags": ["green"]}), vec![2]);
    assert_eq!(ids(&coll, doc! {"tags": {"$all": ["blue", "red"]}}), vec![1]);
    assert_eq!(ids(&coll, doc! {"items.k": "y"}), vec![3]);
    assert_eq!(ids(&coll, doc! {"items": {"$elemMatch": {"k": "x", "n": {"$gt": 5}}}}), Vec::<i32>::new());
    assert_eq!(ids(&coll, doc! {"items": {"$elemMatch": {"k": "y", "n": {"$gt": 5}}}}), vec![3]);
    assert_eq!(ids(&coll, doc! {"$or": [{"_id": 4}, {"tags": {"$size": 1}}]}), vec![2, 4]);
    assert_eq!(ids(&coll, doc! {"a": {"$exists": false}}), vec![3]);
    assert_eq!(ids(&coll, doc! {"a": null}), vec![3, 4]);
    assert_eq!(ids(&coll, doc! {"a.b": {"$ne": 5}}), vec![1, 3, 4]);
    assert_eq!(ids(&coll, doc! {"tags": {"$regex": "^gr"}}), vec![2]);
    assert_eq!(ids(&coll, doc! {"_id": {"$in": [2, 3, 7]}, "$nor": [{"_id": 3}]}), vec![2]);
}

#[test]
fn unknown_and_unimplemented_operators_are_distinguished() {
    let coll = fresh("ops");
    coll.insert_one(doc! {"_id": 1}).unwrap();
    let unknown = coll.find(doc! {"a": {"$frobnicate": 1}}).unwrap_err();
    assert!(matches!(unknown, DbError::OperationFailure { .. }));
    let unbuilt = coll.find(doc! {"a": {"$mod": [2, 0]}}).unwrap_err();
    assert!(matches!(unbuilt, DbError::NotImplemented(_)));
}

#[test]
fn read_copies_are_not_aliased() {
    let coll = fresh("alias");
    let mut original = doc! {"_id": 1, "nested": {"list": [1, 2]}};
    coll.insert_one(original.clone()).unwrap();
    original.get_document_mut("nested").unwrap().insert("list", Value::Null);
    let mut read = coll.find_one(doc! {}).unwrap().unwrap();
    assert_eq!(read, doc! {"_id": 1, "nested": {"list": [1, 2]}});
    read.get_document_mut("nested").unwrap().get_array_mut("list").unwrap().push(Value::Int32(3));
    assert_eq!(coll.find_one(doc! {}).unwrap().unwrap(), doc! {"_id": 1, "nested": {"list": [1, 2]}});
}

#[test]
fn cursor_sort_skip_limit_and_clone() {
    let coll = fresh("cursor");
    for (id, group, score) in [(1, "b", 5), (2, "a", 7), (3, "b", 1), (4, "a", 3)] {
        coll.insert_one(doc! {"_id": id, "g": group, "s": score}).unwrap();
    }
    let by_score = coll.find(doc! {}).unwrap().sort(vec![SortSpec::asc("s")]);
    let by_group_then_score = by_score.clone().sort(vec![SortSpec::asc("g")]);
    let order: Vec<i32> = by_group_then_score.map(|d| d.get_i32("_id").unwrap()).collect();
    assert_eq!(order, vec![4, 2, 3, 1]);

    let mut page = coll.find(doc! {}).unwrap().sort(vec![SortSpec::desc("s")]).skip(1).limit(2);
    let again = page.clone();
    assert_eq!(page.try_next().unwrap().unwrap().get_i32("_id").unwrap(), 1);
    assert_eq!(page.try_next().unwrap().unwrap().get_i32("_id").unwrap(), 4);
    assert!(page.try_next().unwrap().is_none());
    assert!(page.next().is_none());
    assert!(!page.alive());
    assert_eq!(docmock::Cursor::count(&again, true).unwrap(), 2);
    assert_eq!(again.to_vec().unwrap().len(), 2);
}

#[test]
fn projection_through_find_options() {
    let coll = fresh("proj");
    coll.insert_one(doc! {"_id": 1, "a": {"b": 1, "c": 2}, "arr": [1, 2, 3, 4]}).unwrap();
    let opts = FindOptions { projection: Some(doc! {"a.c": 0, "arr": {"$slice": 2}}), ..Default::default() };
    let got = coll.find_with(doc! {}, opts).unwrap().to_vec().unwrap();
    assert_eq!(got, vec![doc! {"_id": 1, "a": {"b": 1}, "arr": [1, 2]}]);
    let mixed = FindOptions { projection: Some(doc! {"a": 1, "arr": 0}), ..Default::default() };
    assert!(coll.find_with(doc! {}, mixed).is_err());
}

#[test]
fn object_ids_are_generated_and_parseable() {
    let coll = fresh("oids");
    let first = coll.insert_one(doc! {"n": 1}).unwrap().inserted_id;
    let second = coll.insert_one(doc! {"n": 2}).unwrap().inserted_id;
    assert_ne!(first, second);
    let found = coll.find(doc! {"_id": first.clone()}).unwrap().to_vec().unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get_i32("n").unwrap(), 1);
    let hex = first.as_object_id().unwrap().to_hex();
    let parsed = docmock::types::object_id_from_hex(&hex).unwrap();
    assert_eq!(Value::ObjectId(parsed), first);
}
