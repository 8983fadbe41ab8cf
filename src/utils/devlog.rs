//! Developer bench records.
//!
//! The engine reports cache lookups, finished stages and slow evaluations as one-line JSON
//! objects tagged with a `bench` kind. Records go to the `nexus_expr::dev6` log target and, when a
//! thread has switched its sink on, into a thread-local buffer tests can read back.

use std::cell::RefCell;

thread_local! {
    static SINK: RefCell<Option<Vec<String>>> = const { RefCell::new(None) };
}

/// Switches the current thread's sink off again when dropped.
pub struct DevSinkGuard;

impl Drop for DevSinkGuard {
    fn drop(&mut self) {
        SINK.with(|s| *s.borrow_mut() = None);
    }
}

/// Starts capturing bench records emitted on this thread.
pub fn enable_thread_sink() -> DevSinkGuard {
    SINK.with(|s| *s.borrow_mut() = Some(Vec::new()));
    DevSinkGuard
}

pub fn write_str(line: &str) {
    SINK.with(|s| {
        if let Some(buf) = s.borrow_mut().as_mut() {
            buf.push(line.to_owned());
        }
    });
}

/// Takes every captured line. Empty when the sink is off.
pub fn drain() -> Vec<String> {
    SINK.with(|s| s.borrow_mut().as_mut().map(std::mem::take).unwrap_or_default())
}

#[must_use]
pub fn snapshot() -> Vec<String> {
    SINK.with(|s| s.borrow().clone().unwrap_or_default())
}

/// Emits `{"bench": kind, ..fields}`. `fields` must be a JSON object; anything else is ignored.
pub fn bench(kind: &str, fields: serde_json::Value) {
    let mut record = serde_json::Map::new();
    record.insert("bench".to_string(), serde_json::Value::from(kind));
    if let serde_json::Value::Object(extra) = fields {
        record.extend(extra);
    }
    crate::dev6!("{}", serde_json::Value::Object(record));
}

/// Drains the sink and keeps the parsed records of one kind.
pub fn drain_benches(kind: &str) -> Vec<serde_json::Value> {
    drain()
        .iter()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .filter(|record| record.get("bench").and_then(serde_json::Value::as_str) == Some(kind))
        .collect()
}

/// Writes a developer line to the `dev6` target and the thread sink.
#[macro_export]
macro_rules! dev6 {
    ($($arg:tt)*) => {{
        let __line = format!($($arg)*);
        $crate::utils::devlog::write_str(&__line);
        log::log!(target: $crate::logger::DEV6_TARGET, log::Level::Trace, "{}", __line);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bench_records_are_tagged_json() {
        let _g = enable_thread_sink();
        bench("stage", json!({ "stage": "$limit", "pulled": 4 }));
        crate::dev6!("free text");
        assert_eq!(snapshot().len(), 2);
        let stages = drain_benches("stage");
        assert_eq!(stages, vec![json!({ "bench": "stage", "stage": "$limit", "pulled": 4 })]);
        assert!(snapshot().is_empty());
    }

    #[test]
    fn sinks_are_per_thread() {
        let _g = enable_thread_sink();
        bench("cache", json!({ "op": "hit" }));
        let other = std::thread::spawn(|| {
            bench("cache", json!({ "op": "miss" }));
            snapshot()
        })
        .join()
        .unwrap();
        assert!(other.is_empty());
        assert_eq!(drain_benches("cache").len(), 1);
    }

    #[test]
    fn nothing_is_kept_once_the_guard_drops() {
        {
            let _g = enable_thread_sink();
            bench("slow", json!({ "ms": 1 }));
        }
        assert!(drain().is_empty());
    }
}
