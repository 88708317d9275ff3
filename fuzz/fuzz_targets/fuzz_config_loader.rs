#![no_main]
use libfuzzer_sys::fuzz_target;

// Loading and validating arbitrary config text must never panic.
fuzz_target!(|data: &str| {
    if let Ok(cfg) = dispenser_config::load_toml(data) {
        let _ = cfg.validate();
    }
});
