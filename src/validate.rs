//! Post-fix validation through an external syntax checker
//!
//! A validator only nudges suggestion confidence up or down. It is never
//! required for a fix to succeed, and a checker that hangs or cannot be
//! started yields [`ValidationOutcome::Unknown`].

use crate::config::ValidatorConfig;
use crate::diagnostic::Confidence;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Result of checking one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Passed,
    Failed(String),
    Unknown(String),
}

impl ValidationOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, ValidationOutcome::Passed)
    }
}

/// Errors raised while running a checker
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("cannot run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("checking {} timed out after {secs}s", path.display())]
    Timeout { path: PathBuf, secs: u64 },

    #[error("waiting for '{command}' failed: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Something that can judge whether a file is still well-formed
pub trait Validator: Send + Sync {
    fn check(&self, path: &Path) -> ValidationOutcome;
}

/// Raise confidence on a pass, lower it on a failure
pub fn adjust_confidence(outcome: &ValidationOutcome, confidence: Confidence) -> Confidence {
    match outcome {
        ValidationOutcome::Passed => confidence.raise(),
        ValidationOutcome::Failed(_) => confidence.lower(),
        ValidationOutcome::Unknown(_) => confidence,
    }
}

/// Runs a program against the file, bounded by a timeout
#[derive(Debug, Clone)]
pub struct CommandValidator {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandValidator {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            args: vec!["{file}".to_string()],
            timeout: Duration::from_secs(10),
        }
    }

    /// Build from the `validator` config section, if a command is set
    pub fn from_config(config: &ValidatorConfig) -> Option<Self> {
        config.command.as_deref().map(|command| {
            Self::new(command)
                .with_args(config.args.clone())
                .with_timeout(Duration::from_secs(config.timeout_secs))
        })
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn args_for(&self, path: &Path) -> Vec<String> {
        let file = path.display().to_string();
        self.args.iter().map(|a| a.replace("{file}", &file)).collect()
    }

    /// Run the checker; `Ok(Err(text))` means it ran and rejected the file
    pub fn run(&self, path: &Path) -> Result<Result<(), String>, ValidationError> {
        let mut child = Command::new(&self.command)
            .args(self.args_for(path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ValidationError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        // stderr closes when the child exits, so the reader doubles as an exit signal
        let stderr = child.stderr.take();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut text = String::new();
            if let Some(mut pipe) = stderr {
                let _ = pipe.read_to_string(&mut text);
            }
            let _ = tx.send(text);
        });

        match rx.recv_timeout(self.timeout) {
            Ok(text) => {
                let status = child.wait().map_err(|source| ValidationError::Wait {
                    command: self.command.clone(),
                    source,
                })?;
                if status.success() {
                    Ok(Ok(()))
                } else if text.trim().is_empty() {
                    Ok(Err(format!("{} exited with {}", self.command, status)))
                } else {
                    Ok(Err(text.trim().to_string()))
                }
            }
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(ValidationError::Timeout {
                    path: path.to_path_buf(),
                    secs: self.timeout.as_secs(),
                })
            }
        }
    }
}

impl Validator for CommandValidator {
    fn check(&self, path: &Path) -> ValidationOutcome {
        match self.run(path) {
            Ok(Ok(())) => ValidationOutcome::Passed,
            Ok(Err(message)) => ValidationOutcome::Failed(message),
            Err(e) => {
                log::debug!("validation inconclusive: {}", e);
                ValidationOutcome::Unknown(e.to_string())
            }
        }
    }
}

/// Fixed-answer validator that counts its calls
#[derive(Debug)]
pub struct MockValidator {
    outcome: ValidationOutcome,
    calls: AtomicUsize,
}

impl MockValidator {
    pub fn new(outcome: ValidationOutcome) -> Self {
        Self {
            outcome,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn passing() -> Self {
        Self::new(ValidationOutcome::Passed)
    }

    pub fn failing(message: &str) -> Self {
        Self::new(ValidationOutcome::Failed(message.to_string()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Validator for MockValidator {
    fn check(&self, _path: &Path) -> ValidationOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjust_confidence() {
        let pass = ValidationOutcome::Passed;
        let fail = ValidationOutcome::Failed("syntax error".to_string());
        let unknown = ValidationOutcome::Unknown("timeout".to_string());

        assert_eq!(adjust_confidence(&pass, Confidence::Medium), Confidence::High);
        assert_eq!(adjust_confidence(&pass, Confidence::High), Confidence::High);
        assert_eq!(adjust_confidence(&fail, Confidence::Medium), Confidence::Low);
        assert_eq!(adjust_confidence(&fail, Confidence::Low), Confidence::Low);
        assert_eq!(adjust_confidence(&unknown, Confidence::Medium), Confidence::Medium);
    }

    #[test]
    fn test_mock_validator_counts_calls() {
        let validator = MockValidator::failing("bad");
        assert_eq!(
            validator.check(Path::new("a.asthra")),
            ValidationOutcome::Failed("bad".to_string())
        );
        validator.check(Path::new("b.asthra"));
        assert_eq!(validator.calls(), 2);
    }

    #[test]
    fn test_placeholder_substitution() {
        let validator = CommandValidator::new("checker")
            .with_args(vec!["--check".to_string(), "{file}".to_string()]);
        assert_eq!(
            validator.args_for(Path::new("src/a.asthra")),
            vec!["--check".to_string(), "src/a.asthra".to_string()]
        );
    }

    #[test]
    fn test_missing_program_is_unknown() {
        let validator = CommandValidator::new("conform-no-such-checker-binary");
        let outcome = validator.check(Path::new("a.asthra"));
        assert!(matches!(outcome, ValidationOutcome::Unknown(_)));
    }

    #[test]
    fn test_from_config_requires_command() {
        assert!(CommandValidator::from_config(&ValidatorConfig::default()).is_none());
        let config = ValidatorConfig {
            command: Some("true".to_string()),
            ..Default::default()
        };
        assert!(CommandValidator::from_config(&config).is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_exit_status() {
        assert_eq!(
            CommandValidator::new("true").check(Path::new("x")),
            ValidationOutcome::Passed
        );
        assert!(matches!(
            CommandValidator::new("false").check(Path::new("x")),
            ValidationOutcome::Failed(_)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_is_unknown() {
        let validator = CommandValidator::new("sleep")
            .with_args(vec!["5".to_string()])
            .with_timeout(Duration::from_millis(200));
        let outcome = validator.check(Path::new("x"));
        assert!(matches!(outcome, ValidationOutcome::Unknown(ref r) if r.contains("timed out")));
        assert_eq!(adjust_confidence(&outcome, Confidence::High), Confidence::High);
    }
}
