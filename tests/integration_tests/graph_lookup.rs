use bson::Bson;
use docmock::{Client, Database, Document, doc};

// Flight routes with a cycle (BOS -> JFK -> BOS) and a branch.
fn airports() -> Database {
    let db = Client::new().database("travel").unwrap();
    db.collection("routes")
        .unwrap()
        .insert_many(
            vec![
                doc! {"_id": "BOS", "to": ["JFK", "PWM"]},
                doc! {"_id": "JFK", "to": ["BOS", "LHR"]},
                doc! {"_id": "PWM", "to": []},
                doc! {"_id": "LHR", "to": ["CDG"]},
                doc! {"_id": "CDG", "to": ["LHR"]},
            ],
            true,
        )
        .unwrap();
    db.collection("trips").unwrap().insert_one(doc! {"_id": 1, "origin": "BOS"}).unwrap();
    db
}

fn reach(db: &Database, extra: Document) -> Vec<(String, i64)> {
    let mut spec = doc! {
        "from": "routes",
        "startWith": "$origin",
        "connectFromField": "to",
        "connectToField": "_id",
        "as": "reach",
        "depthField": "hops",
    };
    spec.extend(extra);
    let out = db.collection("trips").unwrap().aggregate(&[doc! {"$graphLookup": spec}]).unwrap().to_vec().unwrap();
    out[0]
        .get_array("reach")
        .unwrap()
        .iter()
        .map(|b| match b {
            Bson::Document(d) => (d.get_str("_id").unwrap().to_string(), d.get_i64("hops").unwrap()),
            other => panic!("unexpected {other}"),
        })
        .collect()
}

#[test]
fn cycles_terminate_and_depth_is_shortest_distance() {
    let found = reach(&airports(), doc! {});
    let expected: Vec<(String, i64)> =
        [("BOS", 0), ("JFK", 1), ("PWM", 1), ("LHR", 2), ("CDG", 3)].iter().map(|(s, d)| (s.to_string(), *d)).collect();
    assert_eq!(found, expected);
}

#[test]
fn max_depth_is_inclusive() {
    let found = reach(&airports(), doc! {"maxDepth": 1});
    let names: Vec<&str> = found.iter().map(|(s, _)| s.as_str()).collect();
    assert_eq!(names, vec!["BOS", "JFK", "PWM"]);
}

#[test]
fn restrict_search_prunes_the_walk() {
    let found = reach(&airports(), doc! {"restrictSearchWithMatch": {"_id": {"$ne": "JFK"}}});
    let names: Vec<&str> = found.iter().map(|(s, _)| s.as_str()).collect();
    assert_eq!(names, vec!["BOS", "PWM"]);
}

#[test]
fn invalid_specs_fail_loudly() {
    let db = airports();
    let trips = db.collection("trips").unwrap();
    let bad_depth = trips
        .aggregate(&[doc! {"$graphLookup": {
            "from": "routes", "startWith": "$origin", "connectFromField": "to",
            "connectToField": "_id", "as": "r", "maxDepth": -1,
        }}])
        .unwrap_err();
    assert!(bad_depth.code().is_some());
    let dotted_as = trips.aggregate(&[doc! {"$graphLookup": {
        "from": "routes", "startWith": "$origin", "connectFromField": "to",
        "connectToField": "_id", "as": "a.b",
    }}]);
    assert!(matches!(dotted_as, Err(docmock::DbError::NotImplemented(_))));
}
