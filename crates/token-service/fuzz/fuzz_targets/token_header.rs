#![no_main]

use common::jwt::{extract_kid, validate_iat_at, DEFAULT_CLOCK_SKEW};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Header parsing must reject anything odd without panicking
    if let Ok(token_str) = std::str::from_utf8(data) {
        let _ = extract_kid(token_str);
    }

    // Arbitrary iat/now pairs, including overflow edges
    if data.len() >= 16 {
        let mut iat = [0u8; 8];
        let mut now = [0u8; 8];
        iat.copy_from_slice(&data[..8]);
        now.copy_from_slice(&data[8..16]);
        let _ = validate_iat_at(
            i64::from_le_bytes(iat),
            DEFAULT_CLOCK_SKEW,
            i64::from_le_bytes(now),
        );
    }
});
