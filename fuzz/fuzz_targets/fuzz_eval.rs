#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 { return; }
    let Ok(s) = std::str::from_utf8(data) else { return };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(s) else { return };
    let Ok(expr) = bson::Bson::try_from(value) else { return };
    // A few shapes to drive field paths, arithmetic and array operators
    let docs = [
        bson::doc! {"a": 1, "b": 2.5, "name": "x"},
        bson::doc! {"a": [1, 2, 3], "nested": {"z": -3}, "when": bson::DateTime::from_millis(86_400_000)},
        bson::doc! {"active": true, "empty": {}},
    ];
    for d in &docs {
        let _ = docmock::aggregate::Evaluator::new(d).evaluate(&expr);
    }
});
