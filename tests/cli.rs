//! CLI tests for the `kaizen` binary.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn kaizen() -> Command {
    cargo_bin_cmd!("kaizen")
}

fn project() -> TempDir {
    TempDir::new().unwrap()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_kaizen_help() {
        kaizen()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("jobs"));
    }

    #[test]
    fn test_kaizen_version() {
        kaizen().arg("--version").assert().success();
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let dir = project();
        kaizen()
            .current_dir(dir.path())
            .args(["run", "--mode", "reckless", "--max-iterations", "1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid mode"));
    }
}

// =============================================================================
// Config Tests
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_init_creates_file() {
        let dir = project();
        kaizen()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created"));

        let content = fs::read_to_string(dir.path().join(".kaizen/kaizen.toml")).unwrap();
        assert!(content.contains("[engine]"));
        assert!(content.contains("[server]"));
    }

    #[test]
    fn test_config_init_does_not_overwrite() {
        let dir = project();
        fs::create_dir_all(dir.path().join(".kaizen")).unwrap();
        fs::write(dir.path().join(".kaizen/kaizen.toml"), "[server]\nport = 9999\n").unwrap();

        kaizen()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        let content = fs::read_to_string(dir.path().join(".kaizen/kaizen.toml")).unwrap();
        assert!(content.contains("9999"));
    }

    #[test]
    fn test_config_show_reports_overrides() {
        let dir = project();
        fs::create_dir_all(dir.path().join(".kaizen")).unwrap();
        fs::write(
            dir.path().join(".kaizen/kaizen.toml"),
            "[architect.thresholds]\nconservative = 0.95\n",
        )
        .unwrap();

        kaizen()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("conservative = 0.95"))
            .stdout(predicate::str::contains("balanced = 0.60 (default)"));
    }

    #[test]
    fn test_config_validate_warns() {
        let dir = project();
        fs::create_dir_all(dir.path().join(".kaizen")).unwrap();
        fs::write(
            dir.path().join(".kaizen/kaizen.toml"),
            "[engine]\ndefault_mode = \"yolo\"\n",
        )
        .unwrap();

        kaizen()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Unknown default_mode 'yolo'"));
    }

    #[test]
    fn test_config_validate_reports_parse_error() {
        let dir = project();
        fs::create_dir_all(dir.path().join(".kaizen")).unwrap();
        fs::write(dir.path().join(".kaizen/kaizen.toml"), "[engine\n").unwrap();

        kaizen()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("Error:"));
    }
}

// =============================================================================
// Stats and Jobs Tests
// =============================================================================

mod readouts {
    use super::*;

    #[test]
    fn test_stats_on_empty_project() {
        let dir = project();
        kaizen()
            .current_dir(dir.path())
            .arg("stats")
            .assert()
            .success()
            .stdout(predicate::str::contains("No sessions or jobs recorded yet."));
    }

    #[test]
    fn test_stats_json_on_empty_project() {
        let dir = project();
        kaizen()
            .current_dir(dir.path())
            .args(["stats", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"total_sessions\": 0"));
    }

    #[test]
    fn test_jobs_list_empty() {
        let dir = project();
        kaizen()
            .current_dir(dir.path())
            .args(["jobs", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No jobs."));
    }

    #[test]
    fn test_analyze_clean_project_finds_nothing() {
        let dir = project();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "pub fn ok() {}\n").unwrap();

        kaizen()
            .current_dir(dir.path())
            .arg("analyze")
            .assert()
            .success()
            .stdout(predicate::str::contains("No improvement opportunities found"));
    }
}
