use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use dispenser_core::config::{DispenseCfg, ScheduleCfg, Topics};
use dispenser_core::mocks::MemoryChannel;
use dispenser_core::stepper::{DE_ENERGIZED, HALF_STEP};
use dispenser_core::{BuildError, ControlLoop, DispenserError, LoopState};
use dispenser_hardware::SimRig;
use dispenser_traits::ManualClock;

const CMD: &str = "liquid_system/command";

struct Harness {
    rig: SimRig,
    ch: MemoryChannel,
    clock: ManualClock,
    control: ControlLoop,
}

fn harness_with(rig: SimRig, channel: bool) -> Harness {
    let ch = MemoryChannel::new();
    let clock = ManualClock::new();
    let builder = ControlLoop::builder()
        .with_coils(rig.coils())
        .with_temperature_bus(rig.temperature_bus())
        .with_level_sensor(rig.level_sensor())
        .with_beam_sensor(rig.beam_sensor())
        .with_laser(rig.laser())
        .with_clock(Arc::new(clock.clone()));
    let builder = if channel {
        builder.with_channel(ch.clone())
    } else {
        builder
    };
    let mut control = builder.build().unwrap();
    control.start().unwrap();
    Harness {
        rig,
        ch,
        clock,
        control,
    }
}

fn harness() -> Harness {
    harness_with(SimRig::new(), true)
}

#[test]
fn start_turns_laser_on() {
    let h = harness();
    assert_eq!(h.control.state(), LoopState::Running);
    assert!(h.rig.laser_is_on());
    assert!(h.control.channel_connected());
}

#[test]
fn ten_ml_push_end_to_end() {
    let rig = SimRig::with_level_drift(100);
    rig.set_level(1000);
    let mut h = harness_with(rig, true);
    h.ch.push_inbound(CMD, r#"{"ml": 10, "direction": 1}"#);

    let report = h.control.tick().unwrap();

    assert_eq!(report.messages, 1);
    assert_eq!(report.dispensed, 1);
    assert_eq!(report.rejected, 0);

    let log = h.rig.coil_log();
    assert_eq!(log.len(), 1700 * 8 + 1);
    for (i, row) in log[..1700 * 8].iter().enumerate() {
        assert_eq!(*row, HALF_STEP[i % 8]);
    }
    assert_eq!(*log.last().unwrap(), DE_ENERGIZED);

    let status = h.ch.published_on("liquid_system/status");
    assert_eq!(status.len(), 1);
    let v: serde_json::Value = serde_json::from_slice(&status[0]).unwrap();
    assert_eq!(v["ml_dispensed"], 10.0);
    assert_eq!(v["level_before"], 1000);
    // 13600 energized rows at one count per 100 rows
    assert_eq!(v["level_after"], 1136);
    assert_eq!(v["displacement"], 136);
    assert!(!h.control.permit().is_busy());
}

#[test]
fn bad_and_foreign_messages_are_dropped_without_motion() {
    let mut h = harness();
    h.ch.push_inbound(CMD, "abc");
    h.ch.push_inbound(CMD, r#"{"ml": 0}"#);
    h.ch.push_inbound("liquid_system/other", "5");

    let report = h.control.tick().unwrap();

    assert_eq!(report.messages, 3);
    assert_eq!(report.rejected, 2);
    assert_eq!(report.dispensed, 0);
    assert!(h.rig.coil_log().is_empty());
    assert!(h.ch.published().is_empty());
}

#[test]
fn all_queued_commands_run_in_one_tick() {
    let mut h = harness();
    h.ch.push_inbound(CMD, "0.1");
    h.ch.push_inbound(CMD, r#"{"ml": 0.1, "direction": -1}"#);

    let report = h.control.tick().unwrap();

    assert_eq!(report.dispensed, 2);
    assert_eq!(h.ch.pending(), 0);
    assert_eq!(h.ch.published_on("liquid_system/status").len(), 2);
    let log = h.rig.coil_log();
    // 17 forward steps, release, 17 backward steps, release
    assert_eq!(log.len(), 2 * (17 * 8 + 1));
    assert_eq!(log[17 * 8 + 1], HALF_STEP[7]);
}

#[test]
fn schedule_samples_every_tenth_tick_and_publishes_every_twentieth() {
    let rig = SimRig::new();
    rig.set_level(321);
    rig.add_probe("28-a", 20.0);
    let mut h = harness_with(rig, true);

    let mut sampled = Vec::new();
    for tick in 1..=20 {
        let r = h.control.tick().unwrap();
        if r.sampled {
            sampled.push(tick);
        }
        if tick < 20 {
            assert_eq!(r.published, 0, "tick {tick}");
        } else {
            assert_eq!(r.published, 2);
        }
    }
    assert_eq!(sampled, vec![10, 20]);
    // tick 20 reused its own sample: two conversions, not three
    assert_eq!(h.rig.conversions(), 2);
    assert_eq!(h.ch.published_on("liquid_system/level"), vec![b"321".to_vec()]);
    assert_eq!(h.ch.published_on("liquid_system/temperature").len(), 1);
}

#[test]
fn publish_takes_fresh_sample_when_none_this_tick() {
    let rig = SimRig::new();
    let ch = MemoryChannel::new();
    let mut control = ControlLoop::builder()
        .with_coils(rig.coils())
        .with_temperature_bus(rig.temperature_bus())
        .with_level_sensor(rig.level_sensor())
        .with_beam_sensor(rig.beam_sensor())
        .with_laser(rig.laser())
        .with_channel(ch.clone())
        .with_clock(Arc::new(ManualClock::new()))
        .with_schedule(ScheduleCfg {
            tick: Duration::from_millis(100),
            sample_every: Duration::from_millis(1000),
            publish_every: Duration::from_millis(300),
        })
        .build()
        .unwrap();
    control.start().unwrap();

    let reports: Vec<_> = (0..3).map(|_| control.tick().unwrap()).collect();

    assert!(!reports[2].sampled);
    assert_eq!(reports[2].published, 1);
    assert_eq!(ch.published_on("liquid_system/level").len(), 1);
}

#[test]
fn failed_sample_is_skipped() {
    let mut h = harness();
    h.rig.fail_level(true);
    let reports: Vec<_> = (0..20).map(|_| h.control.tick().unwrap()).collect();
    assert!(reports.iter().all(|r| !r.sampled && r.published == 0));
    assert_eq!(h.control.state(), LoopState::Running);
}

#[test]
fn receive_failure_drops_channel_and_keeps_running() {
    let mut h = harness();
    h.ch.fail_poll(true);

    let report = h.control.tick().unwrap();

    assert!(report.channel_lost);
    assert!(!h.control.channel_connected());
    assert!(h.ch.is_closed());
    // local-only from here on; periodic publishing stops
    for _ in 0..20 {
        assert_eq!(h.control.tick().unwrap().published, 0);
    }
}

#[test]
fn failed_close_still_drops_channel() {
    let mut h = harness();
    h.ch.fail_poll(true);
    h.ch.fail_close(true);

    let report = h.control.tick().unwrap();

    assert!(report.channel_lost);
    assert!(!h.control.channel_connected());
    assert!(h.ch.is_closed());
    assert!(h.control.tick().is_ok());
}

#[test]
fn local_only_loop_still_samples_and_dispenses() {
    let rig = SimRig::new();
    let mut h = harness_with(rig, false);
    assert!(!h.control.channel_connected());

    let r = h.control.command(b"0.5").unwrap();
    assert_eq!(r.steps, 85);

    let sampled = (0..10).filter(|_| h.control.tick().unwrap().sampled).count();
    assert_eq!(sampled, 1);
    assert!(h.ch.published().is_empty());
}

#[test]
fn status_publish_failure_does_not_fail_dispense() {
    let mut h = harness();
    h.ch.fail_publish(true);
    h.ch.push_inbound(CMD, "0.1");
    let report = h.control.tick().unwrap();
    assert_eq!(report.dispensed, 1);
    assert_eq!(report.published, 0);
}

#[test]
fn shutdown_releases_coils_turns_laser_off_and_closes_channel() {
    let mut h = harness();
    h.control.shutdown();

    assert_eq!(h.control.state(), LoopState::Stopped);
    assert_eq!(h.rig.coils_state(), DE_ENERGIZED);
    assert!(!h.rig.laser_is_on());
    assert!(h.ch.is_closed());
    assert!(matches!(h.control.tick(), Err(DispenserError::State(_))));

    let writes = h.rig.laser_writes();
    h.control.shutdown();
    assert_eq!(h.rig.laser_writes(), writes);
}

#[test]
fn run_with_stop_already_set_goes_straight_to_stopped() {
    let rig = SimRig::new();
    let mut control = ControlLoop::builder()
        .with_coils(rig.coils())
        .with_temperature_bus(rig.temperature_bus())
        .with_level_sensor(rig.level_sensor())
        .with_beam_sensor(rig.beam_sensor())
        .with_laser(rig.laser())
        .with_clock(Arc::new(ManualClock::new()))
        .build()
        .unwrap();
    let stop = AtomicBool::new(true);

    control.run(&stop).unwrap();

    assert_eq!(control.state(), LoopState::Stopped);
    // on at start, off at shutdown
    assert_eq!(rig.laser_writes(), 2);
    assert!(!rig.laser_is_on());
}

#[test]
fn dispense_blocks_the_tick_on_the_clock() {
    let mut h = harness();
    h.ch.push_inbound(CMD, "1");
    h.control.tick().unwrap();
    assert_eq!(h.clock.elapsed(), Duration::from_millis(170 * 8 + 1000));
}

#[test]
fn oversized_command_rejected_by_cap() {
    let rig = SimRig::new();
    let ch = MemoryChannel::new();
    let mut control = ControlLoop::builder()
        .with_coils(rig.coils())
        .with_temperature_bus(rig.temperature_bus())
        .with_level_sensor(rig.level_sensor())
        .with_beam_sensor(rig.beam_sensor())
        .with_laser(rig.laser())
        .with_channel(ch.clone())
        .with_clock(Arc::new(ManualClock::new()))
        .with_dispense(DispenseCfg {
            max_ml: Some(5.0),
            ..DispenseCfg::default()
        })
        .with_topics(Topics::default())
        .build()
        .unwrap();
    control.start().unwrap();
    ch.push_inbound(CMD, "6");
    assert_eq!(control.tick().unwrap().rejected, 1);
    assert!(rig.coil_log().is_empty());
}

#[test]
fn default_cap_rejects_absurd_volume() {
    let mut h = harness();
    h.ch.push_inbound(CMD, r#"{"ml": 1e12}"#);
    assert_eq!(h.control.tick().unwrap().rejected, 1);
    assert!(h.rig.coil_log().is_empty());
}

#[test]
fn missing_devices_fail_the_build() {
    let rig = SimRig::new();
    let err = ControlLoop::builder()
        .with_coils(rig.coils())
        .with_level_sensor(rig.level_sensor())
        .build()
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::MissingTemperatureBus)
    ));

    let err = ControlLoop::builder()
        .with_coils(rig.coils())
        .with_temperature_bus(rig.temperature_bus())
        .with_level_sensor(rig.level_sensor())
        .with_beam_sensor(rig.beam_sensor())
        .with_laser(rig.laser())
        .with_dispense(DispenseCfg {
            steps_per_ml: 0.0,
            ..DispenseCfg::default()
        })
        .build()
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::InvalidConfig(_))
    ));
}
