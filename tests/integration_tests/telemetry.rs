use docmock::devlog::{drain, enable_thread_sink};
use docmock::query::telemetry;
use docmock::{Client, doc};
use parking_lot::RwLock;
use std::sync::Arc;

#[test]
fn reads_emit_query_lines_on_the_calling_thread() {
    let _g = enable_thread_sink();
    let coll = Client::new().database("tele").unwrap().collection("reads").unwrap();
    coll.insert_one(doc! {"_id": 1}).unwrap();
    let _ = coll.find(doc! {}).unwrap().to_vec().unwrap();
    let _ = coll.count_documents(doc! {}, Default::default()).unwrap();
    let logs = drain();
    assert!(logs.iter().any(|l| l.contains("\"bench\":\"query\"") && l.contains("\"op\":\"find\"")));
    assert!(logs.iter().any(|l| l.contains("\"op\":\"count\"") && l.contains("tele.reads")));
}

#[test]
fn writes_emit_audit_lines() {
    let sink = Arc::new(RwLock::new(Vec::new()));
    telemetry::set_audit_sink_for_tests(sink.clone());
    let coll = Client::new().database("tele").unwrap().collection("audited").unwrap();
    coll.insert_one(doc! {"_id": 1}).unwrap();
    coll.delete_many(doc! {}).unwrap();
    let lines = sink.read().clone();
    assert!(lines.iter().any(|l| l.contains("\"op\":\"insert\"") && l.contains("tele.audited")));
    assert!(lines.iter().any(|l| l.contains("\"op\":\"delete_many\"") && l.contains("deleted=1")));
}
