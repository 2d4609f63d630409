use colored::Colorize;
use config::ConfigError;
use std::path::Path;
use task_core::{BackendKind, TaskError, TaskErrorKind};

#[derive(Debug)]
pub struct UxError {
    pub what: String,
    pub why: Option<String>,
    pub how_to_fix: Vec<String>,
    pub suggested_command: Option<String>
}

impl UxError {
    pub fn new(what: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            why: None,
            how_to_fix: Vec::new(),
            suggested_command: None
        }
    }

    pub fn why(mut self, reason: impl Into<String>) -> Self {
        self.why = Some(reason.into());
        self
    }

    pub fn fix(mut self, suggestion: impl Into<String>) -> Self {
        self.how_to_fix.push(suggestion.into());
        self
    }

    pub fn suggest(mut self, cmd: impl Into<String>) -> Self {
        self.suggested_command = Some(cmd.into());
        self
    }

    pub fn display(&self) {
        eprintln!();
        eprintln!("{} {}", "error:".red().bold(), self.what.white().bold());

        if let Some(why) = &self.why {
            for line in why.lines() {
                eprintln!("       {}", line.dimmed());
            }
        }

        if !self.how_to_fix.is_empty() {
            eprintln!();
            eprintln!("{}", "How to fix:".yellow().bold());
            for (i, fix) in self.how_to_fix.iter().enumerate() {
                eprintln!("  {}. {}", i + 1, fix);
            }
        }

        if let Some(cmd) = &self.suggested_command {
            eprintln!();
            eprintln!("{}", "Try this:".green().bold());
            eprintln!("  $ {}", cmd.cyan());
        }
        eprintln!();
    }
}

impl std::fmt::Display for UxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.what)
    }
}

impl std::error::Error for UxError {}

pub fn invalid_config(path: Option<&Path>, error: &ConfigError) -> UxError {
    let source = match path {
        Some(path) => format!("'{}' and GLOSSA_* variables", path.display()),
        None => "GLOSSA_* variables".to_string()
    };
    UxError::new("Configuration is invalid")
        .why(format!("{error} (read from {source})"))
        .fix("Correct the reported value in the file or environment")
        .fix("Unset the variable to fall back to the default")
        .suggest("glossa config")
}

pub fn task_failed(error: &TaskError) -> UxError {
    let attempts = error
        .failures
        .iter()
        .map(|f| format!("{}: {}", f.backend, f.message))
        .collect::<Vec<_>>();
    let why = if attempts.is_empty() {
        error.message.clone()
    } else {
        attempts.join("\n")
    };

    let err = UxError::new(format!("Task failed ({})", error.kind)).why(why);
    match error.kind {
        TaskErrorKind::InvalidInput => err
            .fix("Check the text is not empty and under the length limit")
            .fix("Use different --from and --to languages"),
        TaskErrorKind::Timeout => err
            .fix("Allow more time for the task")
            .suggest("glossa run <task> <text> --timeout-ms 60000"),
        TaskErrorKind::RateLimited => err.fix("Wait a minute before retrying the cloud backend"),
        TaskErrorKind::Unavailable | TaskErrorKind::ProcessingFailed => {
            with_backend_fixes(err, error)
        }
    }
}

fn with_backend_fixes(mut err: UxError, error: &TaskError) -> UxError {
    let touched = |backend: BackendKind| error.failures.iter().any(|f| f.backend == backend);
    if touched(BackendKind::OnDevice) {
        err = err.fix("Start the local model server and pull the configured model");
    }
    if error
        .failures
        .iter()
        .any(|f| f.backend == BackendKind::Cloud && f.skipped)
    {
        err = err.fix("Set GLOSSA_CLOUD_API_KEY to enable the cloud backend");
    }
    err.suggest("glossa config")
}

#[cfg(test)]
mod tests {
    use super::*;
    use task_core::BackendFailure;

    #[test]
    fn test_ux_error_builder_chain() {
        let err = UxError::new("Something failed")
            .why("Because")
            .fix("First")
            .fix("Second")
            .suggest("glossa config");

        assert_eq!(err.what, "Something failed");
        assert_eq!(err.why.as_deref(), Some("Because"));
        assert_eq!(err.how_to_fix.len(), 2);
        assert_eq!(err.suggested_command.as_deref(), Some("glossa config"));
        assert_eq!(err.to_string(), "Something failed");
    }

    #[test]
    fn test_timeout_suggests_longer_deadline() {
        let err = task_failed(&TaskError::timeout("request did not complete within 100ms"));
        assert!(err.what.contains("timeout"));
        assert!(err.suggested_command.unwrap().contains("--timeout-ms"));
    }

    #[test]
    fn test_exhausted_chain_lists_backends_and_fixes() {
        let error = TaskError::processing_failed("all backends failed").with_failures(vec![
            BackendFailure {
                backend: BackendKind::OnDevice,
                kind: TaskErrorKind::Unavailable,
                message: "model not installed".to_string(),
                attempts: 3,
                skipped: false
            },
            BackendFailure {
                backend: BackendKind::Cloud,
                kind: TaskErrorKind::Unavailable,
                message: "skipped: missing_credential".to_string(),
                attempts: 0,
                skipped: true
            }
        ]);

        let err = task_failed(&error);
        let why = err.why.clone().unwrap();
        assert!(why.contains("on_device: model not installed"));
        assert!(why.contains("cloud: skipped: missing_credential"));
        assert_eq!(err.how_to_fix.len(), 2);
    }

    #[test]
    fn test_display_does_not_panic() {
        task_failed(&TaskError::invalid_input("text must not be empty")).display();
    }
}
