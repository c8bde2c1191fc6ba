use docmock::bulk::WriteModel;
use docmock::{Client, DbError, doc};

#[test]
fn mixed_models_report_every_count() {
    let coll = Client::new().database("it").unwrap().collection("bulk_mixed").unwrap();
    coll.insert_many(vec![doc! {"_id": 1, "g": "a"}, doc! {"_id": 2, "g": "a"}, doc! {"_id": 3, "g": "b"}], true).unwrap();
    let result = coll
        .bulk_write(
            vec![
                WriteModel::UpdateMany { filter: doc! {"g": "a"}, update: doc! {"$set": {"seen": true}}, upsert: false },
                WriteModel::ReplaceOne { filter: doc! {"_id": 3}, replacement: doc! {"g": "c"}, upsert: false },
                WriteModel::UpdateOne { filter: doc! {"_id": 9}, update: doc! {"$set": {"g": "z"}}, upsert: true },
                WriteModel::DeleteMany { filter: doc! {"g": "a"} },
            ],
            true,
        )
        .unwrap();
    assert_eq!((result.n_matched, result.n_modified), (3, 3));
    assert_eq!(result.n_upserted, 1);
    assert_eq!(result.upserted[0].index, 2);
    assert_eq!(result.n_removed, 2);
    let left: Vec<_> = coll.find(doc! {}).unwrap().collect();
    assert_eq!(left, vec![doc! {"_id": 3, "g": "c"}, doc! {"_id": 9, "g": "z"}]);
}

#[test]
fn unordered_batches_keep_going_after_type_errors() {
    let coll = Client::new().database("it").unwrap().collection("bulk_errors").unwrap();
    coll.insert_one(doc! {"_id": 1, "s": "text"}).unwrap();
    let mut bulk = coll.initialize_unordered_bulk_op();
    bulk.find(doc! {"_id": 1}).update_one(doc! {"$inc": {"s": 1}});
    bulk.insert(doc! {"_id": 2});
    bulk.insert(doc! {"_id": 1});
    let Err(DbError::BulkWrite(result)) = bulk.execute() else {
        panic!("expected a bulk write error");
    };
    let failed: Vec<(usize, i32)> = result.write_errors.iter().map(|e| (e.index, e.code)).collect();
    assert_eq!(failed, vec![(0, 14), (2, 11000)]);
    assert_eq!(result.n_inserted, 1);
}

#[test]
fn unsupported_operators_abort_the_batch() {
    let coll = Client::new().database("it").unwrap().collection("bulk_unsupported").unwrap();
    let err = coll
        .bulk_write(
            vec![
                WriteModel::InsertOne { document: doc! {"_id": 1, "n": 1} },
                WriteModel::UpdateOne { filter: doc! {}, update: doc! {"$bit": {"n": {"and": 1}}}, upsert: false },
            ],
            false,
        )
        .unwrap_err();
    assert!(matches!(err, DbError::NotImplemented(_)));
}

#[test]
fn unordered_batches_record_invalid_documents_and_continue() {
    let coll = Client::new().database("it").unwrap().collection("bulk_invalid").unwrap();
    let models = vec![
        WriteModel::InsertOne { document: doc! {"_id": 1} },
        WriteModel::InsertOne { document: doc! {"_id": 2, "$bad": 1} },
        WriteModel::InsertOne { document: doc! {"_id": 3} },
        WriteModel::ReplaceOne { filter: doc! {"_id": 1}, replacement: doc! {"$set": {"x": 1}}, upsert: false },
    ];
    let Err(DbError::BulkWrite(result)) = coll.bulk_write(models.clone(), false) else {
        panic!("expected a bulk write error");
    };
    let failed: Vec<(usize, i32)> = result.write_errors.iter().map(|e| (e.index, e.code)).collect();
    assert_eq!(failed, vec![(1, 2), (3, 2)]);
    assert_eq!(result.n_inserted, 2);
    assert_eq!(coll.count_documents(doc! {}, Default::default()).unwrap(), 2);

    let ordered = Client::new().database("it").unwrap().collection("bulk_invalid_ordered").unwrap();
    let Err(DbError::BulkWrite(result)) = ordered.bulk_write(models, true) else {
        panic!("expected a bulk write error");
    };
    assert_eq!(result.write_errors.len(), 1);
    assert_eq!(result.n_inserted, 1);
}
