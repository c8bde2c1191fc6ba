#![no_main]
use libfuzzer_sys::fuzz_target;

fn parse(s: &str) -> Option<bson::Document> {
    let value: serde_json::Value = serde_json::from_str(s).ok()?;
    match bson::Bson::try_from(value).ok()? {
        bson::Bson::Document(d) => Some(d),
        _ => None,
    }
}

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 { return; }
    if let Ok(s) = std::str::from_utf8(data)
        && let Some(filter) = parse(s)
    {
        // Validation and matching must reject bad input without panicking
        let _ = docmock::query::validate_filter(&filter);
        let docs = [
            bson::doc! {"_id": 1, "a": 1, "b": [1, 2, {"c": 3}], "name": "x"},
            bson::doc! {"_id": 2, "a": {"b": null}, "tags": []},
        ];
        for d in &docs {
            let _ = docmock::query::matches(&filter, d);
        }
    }
});
