//! Trace-level developer lines with a thread-local capture sink, so tests can assert on what the
//! engine emitted without racing the global logger.

use std::cell::RefCell;

pub const DEV_TARGET: &str = "docmock::dev";

thread_local! {
    static TL_SINK: RefCell<Option<Vec<String>>> = const { RefCell::new(None) };
}

/// Disables the sink for this thread when dropped.
pub struct DevSinkGuard;
impl Drop for DevSinkGuard {
    fn drop(&mut self) {
        TL_SINK.with(|s| *s.borrow_mut() = None);
    }
}

pub fn enable_thread_sink() -> DevSinkGuard {
    TL_SINK.with(|s| *s.borrow_mut() = Some(Vec::new()));
    DevSinkGuard
}

pub fn write_str(msg: &str) {
    TL_SINK.with(|s| {
        if let Some(buf) = s.borrow_mut().as_mut() {
            buf.push(msg.to_owned());
        }
    });
}

/// Returns and clears the lines captured on this thread.
pub fn drain() -> Vec<String> {
    TL_SINK.with(|s| s.borrow_mut().as_mut().map(std::mem::take).unwrap_or_default())
}

#[must_use]
pub fn snapshot() -> Vec<String> {
    TL_SINK.with(|s| s.borrow().as_ref().cloned().unwrap_or_default())
}

#[macro_export]
macro_rules! devlog {
    ($($arg:tt)*) => {{
        let __s = format!($($arg)*);
        $crate::devlog::write_str(&__s);
        log::log!(target: $crate::devlog::DEV_TARGET, log::Level::Trace, "{}", __s);
    }};
}
