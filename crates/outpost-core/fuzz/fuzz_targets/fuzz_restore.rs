#![no_main]
use libfuzzer_sys::fuzz_target;
use outpost_core::store::InMemoryQueueStore;

fuzz_target!(|data: &[u8]| {
    // Must not panic -- returning Err is fine.
    let _ = InMemoryQueueStore::restore(data);
});
