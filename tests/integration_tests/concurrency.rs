use docmock::query::UpdateOptions;
use docmock::{Client, doc};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

#[test]
fn readers_never_see_half_applied_updates() {
    let client = Client::new();
    let coll = client.database("conc").unwrap().collection("pairs").unwrap();
    coll.insert_many((0..20).map(|i| doc! {"_id": i, "a": 0, "b": 0}).collect(), true).unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let coll = coll.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut checks = 0usize;
                while !done.load(Ordering::Acquire) || checks == 0 {
                    for d in coll.find(doc! {}).unwrap() {
                        assert_eq!(d.get_i32("a").unwrap(), d.get_i32("b").unwrap(), "torn read: {d}");
                        checks += 1;
                    }
                }
                checks
            })
        })
        .collect();

    let writer = {
        let coll = coll.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                coll.update_many(doc! {}, doc! {"$inc": {"a": 1, "b": 1}}, UpdateOptions::default()).unwrap();
            }
        })
    };
    writer.join().unwrap();
    done.store(true, Ordering::Release);
    for r in readers {
        assert!(r.join().unwrap() > 0);
    }
    let all = docmock::Cursor::count(&coll.find(doc! {"a": 200, "b": 200}).unwrap(), false).unwrap();
    assert_eq!(all, 20);
}

#[test]
fn concurrent_inserts_all_land() {
    let coll = Client::new().database("conc").unwrap().collection("many").unwrap();
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let coll = coll.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    coll.insert_one(doc! {"_id": t * 1000 + i}).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(coll.estimated_document_count(), 400);
}

#[test]
fn lock_is_released_after_a_panic_or_an_error() {
    let client = Client::new();
    let coll = client.database("conc").unwrap().collection("locks").unwrap();
    coll.insert_one(doc! {"_id": 1, "s": "x"}).unwrap();
    let slot = client.store().database("conc").collection("locks");

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        slot.write(|data| {
            if !data.is_empty() {
                panic!("failure inside the critical section");
            }
        });
    }));
    assert!(outcome.is_err());
    assert!(slot.is_unlocked());

    let err = coll.update_one(doc! {"_id": 1}, doc! {"$inc": {"s": 1}}, UpdateOptions::default()).unwrap_err();
    assert_eq!(err.code(), Some(14));
    assert!(slot.is_unlocked());
    coll.insert_one(doc! {"_id": 2}).unwrap();
    assert_eq!(coll.estimated_document_count(), 2);
}
