#![no_main]
use dispenser_core::CommandIngress;
use libfuzzer_sys::fuzz_target;

// Any accepted payload must be a positive finite volume within the cap.
fuzz_target!(|data: &[u8]| {
    let ingress = CommandIngress::new(Some(500.0));
    if let Ok(req) = ingress.parse(data) {
        let ml = req.volume_ml();
        assert!(ml.is_finite() && ml > 0.0 && ml <= 500.0);
    }
});
