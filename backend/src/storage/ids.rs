//! Fresh record ids: millisecond timestamps, strictly increasing per process.

use shared::RecordId;
use std::sync::atomic::{AtomicU64, Ordering};

static LAST_ISSUED: AtomicU64 = AtomicU64::new(0);

/// Next id millis: the wall clock, bumped past the previously issued value
pub fn next_millis() -> u64 {
    let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let mut last = LAST_ISSUED.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(last + 1);
        match LAST_ISSUED.compare_exchange_weak(last, candidate, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return candidate,
            Err(actual) => last = actual,
        }
    }
}

/// Fresh id with an optional prefix ("hr_", "fg_")
pub fn next_record_id(prefix: &str) -> RecordId {
    RecordId::new(format!("{}{}", prefix, next_millis()))
}
