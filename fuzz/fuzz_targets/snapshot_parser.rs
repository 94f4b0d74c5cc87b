#![no_main]

use libfuzzer_sys::fuzz_target;
use taskscope::config::StoreConfig;
use taskscope::snapshot::TraceSnapshot;

fuzz_target!(|data: &[u8]| {
    // Parsing and replaying must reject bad input without panicking
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(snapshot) = TraceSnapshot::from_json_str(input) {
            if let Ok(store) = snapshot.into_store(StoreConfig::default()) {
                let _ = store.critical_path(None);
                let ids: Vec<u64> = store.registry().tasks().map(|t| t.id).collect();
                let _ = store.get_scheduling_states(&ids, None);
                let _ = store.get_phase_scheduling(None);
            }
        }
    }
});
