use std::fs::File;
use std::io::Write;

use dispenser_config::{Calibration, CalibrationRow, load_calibration_csv};
use rstest::rstest;
use tempfile::tempdir;

fn row(steps: i64, ml: f64) -> CalibrationRow {
    CalibrationRow { steps, ml }
}

#[rstest]
fn exact_line_recovers_slope() {
    let c = Calibration::from_rows(vec![row(170, 1.0), row(340, 2.0), row(850, 5.0)]).unwrap();
    assert!((c.steps_per_ml - 170.0).abs() < 1e-9);
}

#[rstest]
fn intercept_is_ignored() {
    // 20 steps of backlash before anything moves
    let c = Calibration::from_rows(vec![row(190, 1.0), row(360, 2.0), row(530, 3.0)]).unwrap();
    assert!((c.steps_per_ml - 170.0).abs() < 1e-9);
}

#[rstest]
fn outlier_is_dropped_before_final_fit() {
    let rows = vec![
        row(170, 1.0),
        row(340, 2.0),
        row(510, 3.0),
        row(680, 4.0),
        row(850, 5.0),
        row(1020, 6.0),
        row(1190, 7.0),
        row(1360, 8.0),
        row(1530, 9.0),
        row(1700, 3.0), // air bubble, short delivery
    ];
    let c = Calibration::from_rows(rows).unwrap();
    assert!((c.steps_per_ml - 170.0).abs() < 1e-6, "got {}", c.steps_per_ml);
}

#[rstest]
#[case(vec![row(100, 1.0)], "at least two rows")]
#[case(vec![row(100, 1.0), row(100, 2.0)], "duplicate step counts")]
#[case(vec![row(200, 1.0), row(100, 2.0)], "strictly increasing")]
#[case(vec![row(100, 1.0), row(200, 1.0)], "all ml values equal")]
#[case(vec![row(100, 2.0), row(200, 1.0)], "non-positive")]
#[case(vec![row(100, -1.0), row(200, 1.0)], "finite and >= 0")]
#[case(vec![row(i64::MIN, 1.0), row(i64::MAX, 2.0)], "overflow")]
fn rejects_degenerate_rows(#[case] rows: Vec<CalibrationRow>, #[case] needle: &str) {
    let err = Calibration::from_rows(rows).expect_err("should fail");
    assert!(format!("{err}").contains(needle), "expected '{needle}' in '{err}'");
}

#[rstest]
fn loads_csv_with_strict_headers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cal.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "steps,ml").unwrap();
    writeln!(f, "509, 3.0").unwrap();
    writeln!(f, "1018, 6.0").unwrap();
    let c = load_calibration_csv(&path).unwrap();
    assert!((c.steps_per_ml - 509.0 / 3.0).abs() < 1e-6);
}

#[rstest]
fn bad_headers_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cal.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "raw,grams").unwrap();
    writeln!(f, "1,2").unwrap();
    let err = load_calibration_csv(&path).unwrap_err();
    assert!(format!("{err}").contains("must have headers 'steps,ml'"));
}

#[rstest]
fn bad_row_reports_line_number() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cal.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "steps,ml").unwrap();
    writeln!(f, "100,1.0").unwrap();
    writeln!(f, "lots,2.0").unwrap();
    let err = load_calibration_csv(&path).unwrap_err();
    assert!(format!("{err}").contains("invalid CSV row 3"));
}
