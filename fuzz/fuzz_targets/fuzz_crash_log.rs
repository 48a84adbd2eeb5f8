//! Fuzz target: `CrashLog` ring buffer
//!
//! Writes entries built from arbitrary bytes (reasons and driver dumps of
//! any length, invalid UTF-8 replaced) and checks:
//! - No panics on truncation or decode
//! - `read_all` never returns more than 4 entries
//! - `clear` leaves nothing behind
//!
//! cargo fuzz run fuzz_crash_log

#![no_main]

use libfuzzer_sys::fuzz_target;
use nfcd::adapters::store::MemStore;
use nfcd::diagnostics::{CrashEntry, CrashLog};

fuzz_target!(|data: &[u8]| {
    let Some((&count, rest)) = data.split_first() else {
        return;
    };

    let store = MemStore::new();
    let mut log = CrashLog::new();
    log.init(&store);

    let text = String::from_utf8_lossy(rest);
    let split = text.char_indices().nth(text.chars().count() / 2).map_or(0, |(i, _)| i);
    let (reason, dump) = text.split_at(split);

    for i in 0..(usize::from(count) % 8) + 1 {
        let entry = CrashEntry::new(i as u64 * 1000, reason, dump);
        assert!(entry.reason.len() <= 64);
        assert!(entry.driver_dump.len() <= 256);
        log.write_entry(&store, &entry);
    }

    let entries = log.read_all(&store);
    assert!(entries.len() <= 4, "read_all returned {} entries", entries.len());

    log.clear(&store);
    assert!(log.read_all(&store).is_empty());
});
