use bson::{Bson, DateTime, Regex, oid::ObjectId};
use docmock::{Client, doc, persistence};

#[test]
fn every_value_kind_survives_a_dump() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("store.json");
    let client = Client::new();
    let coll = client.database("kinds").unwrap().collection("all").unwrap();
    let original = doc! {
        "_id": ObjectId::new(),
        "null": Bson::Null,
        "bool": true,
        "i32": 7,
        "i64": (1_i64 << 40),
        "f64": 2.25,
        "str": "hé",
        "when": DateTime::from_millis(1_700_000_000_123),
        "re": Regex { pattern: "^a.c$".into(), options: "i".into() },
        "arr": [1, "two", {"three": 3}],
        "doc": {"inner": [null]},
    };
    coll.insert_one(original.clone()).unwrap();
    persistence::dump(&client, &path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("\"format\": \"docmock\""));

    let loaded = persistence::load(&path).unwrap();
    let back = loaded.database("kinds").unwrap().collection("all").unwrap().find_one(doc! {}).unwrap().unwrap();
    assert_eq!(back, original);
}

#[test]
fn database_dump_holds_only_that_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("one.json");
    let client = Client::new();
    client.database("a").unwrap().collection("c").unwrap().insert_one(doc! {"_id": 1}).unwrap();
    client.database("b").unwrap().collection("c").unwrap().insert_one(doc! {"_id": 2}).unwrap();
    client.database("a").unwrap().dump(&path).unwrap();
    assert_eq!(persistence::load(&path).unwrap().list_database_names(), vec!["a".to_string()]);
}

#[test]
fn garbage_files_are_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("junk.json");
    std::fs::write(&path, "not json").unwrap();
    assert!(persistence::load(&path).is_err());
    assert!(persistence::load(&dir.path().join("absent.json")).is_err());
}
