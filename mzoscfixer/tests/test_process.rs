use std::{error::Error, f64::consts::TAU, path::Path, process::Command};

use assert_cmd::prelude::*;
use predicates::prelude::*;

use mzoscfix::{Run, RunStore, Scan};
use mzoscfixer::MzDataRunStore;

fn write_oscillating_run(path: &Path) -> Result<(), Box<dyn Error>> {
    let n = 50;
    let scans = (0..n)
        .map(|i| {
            let t = 10.0 * i as f64 / (n - 1) as f64;
            Scan::new(
                i,
                t,
                vec![250.0, 922.098],
                vec![40.0, (100.0 + (TAU * 0.98 * t).sin()) as f32],
            )
        })
        .collect();
    MzDataRunStore::new().store(&Run::new(scans)?, path)?;
    Ok(())
}

#[test]
fn test_file_missing() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzoscfixer")?;

    cmd.arg("not_real.mzML").arg("-o").arg("-");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("not_real.mzML"));
    Ok(())
}

#[test]
fn test_malformed_tolerance() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzoscfixer")?;

    cmd.arg("not_real.mzML").args(["-o", "-", "-e", "wide"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse tolerance"));
    Ok(())
}

#[test]
fn test_correct_run() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("input.mzML");
    let output = dir.path().join("output.mzML");
    let xics = dir.path().join("xics.csv");
    write_oscillating_run(&input)?;

    let mut cmd = Command::cargo_bin("mzoscfixer")?;
    cmd.env("RUST_LOG", "info");
    cmd.arg(&input)
        .arg("-o")
        .arg(&output)
        .arg("-x")
        .arg(&xics)
        .args(["-w", "20", "-c", "922.098", "--no-detection", "-t", "2"]);
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Scans: 50"))
        .stderr(predicate::str::contains("Channels Corrected: 1 | Dropped: 0"));

    let corrected = MzDataRunStore::new().load(&output)?;
    assert_eq!(corrected.len(), 50);
    for scan in corrected.iter() {
        assert_eq!(scan.mzs, vec![250.0, 922.098]);
        assert_eq!(scan.intensities[0], 40.0);
    }

    let mut reader = csv::Reader::from_path(&xics)?;
    assert_eq!(reader.headers()?.len(), 4);
    assert_eq!(reader.records().count(), 50);
    Ok(())
}
