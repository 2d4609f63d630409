use assert_cmd::{Command, cargo_bin_cmd};
use predicates::prelude::{PredicateBooleanExt, predicate};

/// Offline binary: local model disabled and no cloud key, so only the
/// heuristic backend can answer.
fn glossa() -> Command {
    let mut cmd = cargo_bin_cmd!("glossa");
    cmd.env("GLOSSA_ON_DEVICE_ENABLED", "false")
        .env_remove("GLOSSA_CLOUD_API_KEY")
        .env_remove("GLOSSA_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

mod help_and_version {
    use super::*;

    #[test]
    fn test_help_flag() {
        glossa()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Usage:"))
            .stdout(predicate::str::contains("run"))
            .stdout(predicate::str::contains("serve"));
    }

    #[test]
    fn test_version_flag() {
        glossa()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("glossa"));
    }

    #[test]
    fn test_no_args_shows_help() {
        glossa()
            .assert()
            .failure()
            .stderr(predicate::str::contains("Usage:"));
    }
}

mod run_subcommand {
    use super::*;

    #[test]
    fn test_detect_offline_uses_heuristics() {
        glossa()
            .args(["run", "detect", "Bonjour le monde"])
            .assert()
            .success()
            .stdout(predicate::str::contains("fr"))
            .stdout(predicate::str::contains("heuristic"));
    }

    #[test]
    fn test_detect_json_output() {
        glossa()
            .args(["run", "detect", "Bonjour le monde", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"success\": true"))
            .stdout(predicate::str::contains("\"language\": \"fr\""));
    }

    #[test]
    fn test_translate_offline_fails_with_fixes() {
        glossa()
            .args(["run", "translate", "Bonjour", "--to", "en"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("How to fix:"))
            .stderr(predicate::str::contains("GLOSSA_CLOUD_API_KEY"));
    }

    #[test]
    fn test_unknown_task_is_rejected() {
        glossa()
            .args(["run", "teleport", "text"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid value"));
    }
}

mod serve_subcommand {
    use super::*;

    #[test]
    fn test_serve_answers_each_line() {
        let input = concat!(
            r#"{"requestId":"r-1","taskType":"detect_language","payload":{"text":"Bonjour le monde"}}"#,
            "\n",
            "not json\n"
        );

        glossa()
            .arg("serve")
            .write_stdin(input)
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""requestId":"r-1""#))
            .stdout(predicate::str::contains(r#""language":"fr""#))
            .stdout(predicate::str::contains("malformed request"));
    }
}

mod config_subcommand {
    use super::*;

    #[test]
    fn test_config_json_masks_key() {
        glossa()
            .env("GLOSSA_CLOUD_API_KEY", "sk-abcdef123456")
            .args(["config", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("****3456"))
            .stdout(predicate::str::contains("sk-abcdef").not());
    }

    #[test]
    fn test_config_file_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glossa.toml");
        std::fs::write(&path, "[engine]\nmax_concurrent_tasks = 7\n\n[languages]\nnative_language = \"de\"\n")
            .unwrap();

        glossa()
            .args(["config", "--json", "--config"])
            .arg(&path)
            .assert()
            .success()
            .stdout(predicate::str::contains("\"max_concurrent_tasks\": 7"))
            .stdout(predicate::str::contains("\"native_language\": \"de\""));
    }

    #[test]
    fn test_invalid_env_value_is_reported() {
        glossa()
            .env("GLOSSA_MAX_CONCURRENT_TASKS", "zero")
            .arg("config")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Configuration is invalid"));
    }
}
