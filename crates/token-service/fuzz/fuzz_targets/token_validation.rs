#![no_main]

use libfuzzer_sys::fuzz_target;
use std::sync::OnceLock;
use token_test_utils::TestAuthority;

struct Target {
    runtime: tokio::runtime::Runtime,
    harness: TestAuthority,
}

fn target() -> &'static Target {
    static TARGET: OnceLock<Target> = OnceLock::new();
    TARGET.get_or_init(|| {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("fuzz runtime");
        let harness = runtime
            .block_on(TestAuthority::spawn())
            .expect("fuzz authority");
        Target { runtime, harness }
    })
}

fuzz_target!(|data: &[u8]| {
    // Every input must end in a typed error, never a panic
    if let Ok(token_str) = std::str::from_utf8(data) {
        let target = target();
        let _ = target
            .runtime
            .block_on(target.harness.authority.validate(token_str));
    }
});
