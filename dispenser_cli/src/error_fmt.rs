//! Human-readable error descriptions and structured JSON error formatting.

use dispenser_core::{BuildError, DispenserError, ParseError};

/// Prefixes of `Config::validate` messages.
const CONFIG_SECTIONS: [&str; 9] = [
    "mqtt.", "topics.", "pins.", "stepper.", "dispense.", "sensors.", "schedule.", "logging.",
    "calibration",
];

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
            missing => format!(
                "What happened: The controller could not be assembled ({missing}).\nLikely causes: A device failed to initialize and was not handed to the builder.\nHow to fix: Check the startup log for the failing device."
            ),
        };
    }

    if let Some(de) = err.downcast_ref::<DispenserError>() {
        return match de {
            DispenserError::Init(msg) => format!(
                "What happened: Hardware initialization failed ({msg}).\nLikely causes: Wrong pin numbers, SPI or one-wire not enabled, or missing GPIO permissions.\nHow to fix: Check [pins] in the config, enable SPI/1-Wire in the boot config, run with GPIO access, or use --sim."
            ),
            DispenserError::Transport(msg) => format!(
                "What happened: Messaging failed ({msg}).\nLikely causes: Broker not running or unreachable.\nHow to fix: Check [mqtt] broker/port, or use `run --offline`."
            ),
            DispenserError::Busy => "What happened: A dispense is already in progress.\nHow to fix: Wait for it to finish and retry.".to_string(),
            DispenserError::Actuator(msg) => format!(
                "What happened: The stepper could not be driven ({msg}).\nLikely causes: Driver board unpowered or a coil pin in use elsewhere.\nHow to fix: Check the ULN2003 supply and [pins].coils."
            ),
            DispenserError::Sensor(msg) => format!(
                "What happened: A sensor read failed ({msg}).\nLikely causes: Loose LDR wiring or ADC not responding.\nHow to fix: Check the ADC wiring and [pins] channels."
            ),
            DispenserError::HardwareFault(msg) => format!(
                "What happened: Hardware bus fault ({msg}).\nLikely causes: GPIO/SPI access lost or a device file disappeared.\nHow to fix: Check permissions and wiring, then restart."
            ),
            DispenserError::InvalidVolume(ml) => format!(
                "What happened: {ml} ml is not a dispensable volume.\nHow to fix: Pass a positive, finite --ml."
            ),
            DispenserError::State(msg) => format!(
                "What happened: Internal state error ({msg}).\nHow to fix: Re-run with --log-level=debug and report the log."
            ),
        };
    }

    if let Some(pe) = err.downcast_ref::<ParseError>() {
        return match pe {
            ParseError::TooLarge { ml, max } => format!(
                "What happened: {ml} ml exceeds the configured limit of {max} ml.\nHow to fix: Dispense in smaller portions or raise dispense.max_ml."
            ),
            other => format!("What happened: {other}.\nHow to fix: Send a positive volume."),
        };
    }

    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("calibration csv must have headers") {
        return "Invalid headers in calibration CSV. Expected 'steps,ml'.".to_string();
    }

    if lower.contains("read config") || lower.contains("parse config") {
        let cause = err.source().map(|s| format!(" ({s})")).unwrap_or_default();
        return format!(
            "What happened: The config file could not be loaded{cause}.\nHow to fix: Check the --config path and the TOML syntax."
        );
    }

    if lower.contains("must") && CONFIG_SECTIONS.iter().any(|s| lower.starts_with(s)) {
        return format!(
            "What happened: Configuration is invalid: {msg}.\nHow to fix: Edit the TOML config and try again."
        );
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes per failure class; anything unclassified is 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if let Some(de) = err.downcast_ref::<DispenserError>() {
        return match de {
            DispenserError::Init(_) => 3,
            DispenserError::HardwareFault(_) => 4,
            DispenserError::Actuator(_) => 5,
            DispenserError::Sensor(_) => 6,
            DispenserError::InvalidVolume(_) => 7,
            DispenserError::Transport(_) => 8,
            DispenserError::Busy | DispenserError::State(_) => 1,
        };
    }
    if err.downcast_ref::<ParseError>().is_some() {
        return 7;
    }
    1
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(de) = err.downcast_ref::<DispenserError>() {
        return match de {
            DispenserError::Init(_) => "Init",
            DispenserError::Transport(_) => "Transport",
            DispenserError::Busy => "Busy",
            DispenserError::Actuator(_) => "Actuator",
            DispenserError::Sensor(_) => "Sensor",
            DispenserError::HardwareFault(_) => "HardwareFault",
            DispenserError::InvalidVolume(_) => "InvalidVolume",
            DispenserError::State(_) => "State",
        };
    }
    if let Some(pe) = err.downcast_ref::<ParseError>() {
        return match pe {
            ParseError::TooLarge { .. } => "TooLarge",
            ParseError::InvalidVolume(_) => "InvalidVolume",
            ParseError::Encoding | ParseError::Malformed(_) => "Malformed",
        };
    }
    if err.downcast_ref::<BuildError>().is_some() {
        return "Build";
    }
    "Error"
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_errors_get_stable_codes() {
        let e: eyre::Report = DispenserError::Init("open coil pins".into()).into();
        assert_eq!(exit_code_for_error(&e), 3);
        assert!(humanize(&e).contains("--sim"));

        let e: eyre::Report = DispenserError::InvalidVolume(-1.0).into();
        assert_eq!(exit_code_for_error(&e), 7);

        let e: eyre::Report = eyre::eyre!("something else");
        assert_eq!(exit_code_for_error(&e), 1);
        assert!(humanize(&e).starts_with("Something went wrong."));
    }

    #[test]
    fn json_form_names_the_reason() {
        let e: eyre::Report = ParseError::TooLarge { ml: 60.0, max: 50.0 }.into();
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&e)).unwrap();
        assert_eq!(v["reason"], "TooLarge");
        assert_eq!(v["exit_code"], 7);
        assert!(v["message"].as_str().unwrap().contains("dispense.max_ml"));
    }

    #[test]
    fn config_messages_are_recognized() {
        let e = eyre::eyre!("dispense.steps_per_ml must be a finite value > 0");
        assert!(humanize(&e).starts_with("What happened: Configuration is invalid"));
    }
}
