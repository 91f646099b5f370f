//! Command-line behavior of the `bacanno` binary.

use std::process::Command;
use tempfile::TempDir;

fn bacanno() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_bacanno"));
    cmd.env_remove("BACANNO_CATALOG")
        .env_remove("BACANNO_CONDA_BIN");
    cmd
}

#[test]
fn missing_input_directory_prints_usage_and_exits_2() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let input_dir = temp_dir.path().join("absent");
    let output_dir = temp_dir.path().join("output_annotation");

    let output = bacanno()
        .args([
            "run",
            input_dir.to_str().unwrap(),
            output_dir.to_str().unwrap(),
            "2",
        ])
        .output()
        .expect("Failed to run bacanno");

    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stdout.contains("Usage: bacanno run"), "{stdout}{stderr}");
    assert_eq!(
        stdout.matches("Invalid input directory").count(),
        1,
        "{stdout}{stderr}"
    );
    assert!(!output_dir.exists(), "Output directory was created");
}

#[test]
fn catalog_subcommand_prints_the_built_in_stages() {
    let output = bacanno()
        .arg("catalog")
        .output()
        .expect("Failed to run bacanno");

    assert!(output.status.success(), "Catalog command failed");
    let catalog: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("Catalog output is not JSON");
    let names: Vec<&str> = catalog["stages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|stage| stage["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        [
            "primary-prediction",
            "rRNA-detection",
            "homology-prediction",
            "secondary-prediction-and-function",
        ]
    );
}
