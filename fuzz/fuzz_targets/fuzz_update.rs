#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 { return; }
    let Ok(s) = std::str::from_utf8(data) else { return };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(s) else { return };
    let Ok(bson::Bson::Document(update)) = bson::Bson::try_from(value) else { return };
    let query = bson::doc! {"arr": {"$elemMatch": {"k": 1}}};
    for upsert in [false, true] {
        let mut doc = bson::doc! {"_id": 1, "n": 5, "arr": [{"k": 0}, {"k": 1}], "s": "text", "sub": {"x": 1}};
        let _ = docmock::query::apply_update(&mut doc, &update, &query, upsert);
    }
});
