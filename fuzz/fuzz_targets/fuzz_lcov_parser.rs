#![no_main]

use lcovmerge_adapters_lcov::{MergeConfig, MergeSession};
use lcovmerge_adapters_source::InMemoryReader;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Rejected input is fine; panics are not. The second parse exercises
    // accumulation. Whatever was merged must read back in.
    let sources = InMemoryReader::new();
    let config = MergeConfig {
        discard_checksums: true,
        generate_checksums: false,
    };
    let mut session = MergeSession::new(&sources, config);
    if session.parse_bytes("fuzz.info", data).is_err() {
        return;
    }
    let _ = session.parse_bytes("fuzz.info", data);

    let merged = session.to_lcov_string();
    let mut again = MergeSession::new(&sources, config);
    let reparsed = again.parse_bytes("merged.info", merged.as_bytes());
    assert!(reparsed.is_ok(), "exported trace rejected: {reparsed:?}");
});
