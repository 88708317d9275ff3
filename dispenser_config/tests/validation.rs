use dispenser_config::{StepMode, load_toml};
use rstest::rstest;

#[test]
fn empty_file_yields_reference_defaults() {
    let cfg = load_toml("").expect("parse TOML");
    cfg.validate().expect("defaults must validate");
    assert_eq!(cfg.mqtt.client_id, "rasp_liquid_system");
    assert_eq!(cfg.topics.command, "liquid_system/command");
    assert_eq!(cfg.stepper.mode, StepMode::Half);
    assert_eq!(cfg.stepper.steps_per_rotation, 509);
    assert!((cfg.dispense.steps_per_ml - 170.0).abs() < f64::EPSILON);
    assert_eq!(cfg.sensors.beam_threshold, 4000);
    assert_eq!(cfg.schedule.tick_ms, 100);
    assert_eq!(cfg.schedule.publish_ms, 2000);
    assert_eq!(cfg.mqtt.keep_alive_s, 0);
    assert_eq!(cfg.dispense.max_ml, Some(50.0));
}

#[test]
fn longest_dispense_covers_rows_and_settle() {
    let cfg = load_toml("").expect("parse TOML");
    // 50 ml * 170 steps * 8 rows * 1 ms + 1 s settle
    assert_eq!(cfg.longest_dispense_ms(), Some(69_000.0));
}

#[test]
fn keep_alive_that_outlasts_the_longest_dispense_is_accepted() {
    let cfg = load_toml("[mqtt]\nkeep_alive_s = 60\n[dispense]\nmax_ml = 1.0\n")
        .expect("parse TOML");
    cfg.validate().expect("short dispenses fit inside the keep-alive grace");
}

#[test]
fn full_file_parses() {
    let toml = r#"
[mqtt]
broker = "192.168.1.10"
port = 1884
client_id = "bench"

[topics]
command = "lab/cmd"

[pins]
coils = [6, 13, 19, 26]
laser = 21
level_channel = 2
beam_channel = 3

[stepper]
mode = "full"
delay_ms = 10

[dispense]
steps_per_ml = 182.0
settle_ms = 500
max_ml = 50.0

[sensors]
beam_threshold = 3500
beam_hysteresis = 100

[schedule]
tick_ms = 50
sample_ms = 500
publish_ms = 1000

[logging]
rotation = "daily"
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert_eq!(cfg.mqtt.port, 1884);
    assert_eq!(cfg.topics.command, "lab/cmd");
    // untouched fields keep defaults
    assert_eq!(cfg.topics.status, "liquid_system/status");
    assert_eq!(cfg.stepper.mode, StepMode::Full);
    assert_eq!(cfg.dispense.max_ml, Some(50.0));
}

#[test]
fn keep_alive_without_a_volume_cap_is_rejected() {
    let mut cfg = load_toml("[mqtt]\nkeep_alive_s = 60\n").expect("parse TOML");
    cfg.dispense.max_ml = None;
    let err = cfg.validate().expect_err("uncapped dispenses can outlast any keep-alive");
    assert!(format!("{err}").contains("max_ml is unset"), "{err}");
}

#[test]
fn unknown_step_mode_is_a_parse_error() {
    assert!(load_toml("[stepper]\nmode = \"quarter\"\n").is_err());
}

#[rstest]
#[case("[mqtt]\nbroker = \"  \"\n", "mqtt.broker")]
#[case("[mqtt]\nport = 0\n", "mqtt.port")]
#[case("[mqtt]\nkeep_alive_s = 3\n", "keep_alive_s")]
#[case("[mqtt]\nkeep_alive_s = 30\n", "outlast the longest dispense")]
#[case("[topics]\nstatus = \"a/#\"\n", "wildcards")]
#[case("[pins]\ncoils = [1, 1, 2, 3]\n", "distinct")]
#[case("[pins]\nlaser = 16\n", "pins.laser")]
#[case("[pins]\nlevel_channel = 1\n", "must differ")]
#[case("[stepper]\ndelay_ms = 0\n", "stepper.delay_ms")]
#[case("[dispense]\nsteps_per_ml = 0.0\n", "steps_per_ml")]
#[case("[dispense]\nmax_ml = -1.0\n", "max_ml")]
#[case("[sensors]\nbeam_threshold = 5000\n", "beam_threshold")]
#[case("[sensors]\nbeam_threshold = 10\nbeam_hysteresis = 20\n", "beam_hysteresis")]
#[case("[schedule]\ntick_ms = 0\n", "tick_ms")]
#[case("[schedule]\ntick_ms = 100\npublish_ms = 50\n", "publish_ms")]
#[case("[logging]\nrotation = \"weekly\"\n", "logging.rotation")]
fn rejects_out_of_range_values(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should be rejected");
    assert!(
        format!("{err}").contains(needle),
        "expected '{needle}' in '{err}'"
    );
}
