//! Single-retry recovery for targets that look unreachable.
//!
//! A first attempt that fails with host-discovery symptoms is re-run once with
//! the always-respond override appended. The retry is terminal whatever it
//! yields: its command already carries the override, so a second unreachable
//! classification has nothing left to change.

use std::time::Duration;

use regex::Regex;
use tracing::{debug, info};

use crate::command::CommandLine;
use crate::config::UnreachablePattern;
use crate::error::ConfigError;
use crate::runner::CommandRunner;
use crate::types::{InvocationFailure, ResiliencyNote};

enum Matcher {
    Substring(String),
    Regex(Regex),
}

/// Compiled unreachable-host patterns. Text matching none of them is treated
/// as an ordinary failure.
pub struct UnreachableClassifier {
    matchers: Vec<(String, Matcher)>,
}

impl UnreachableClassifier {
    pub fn new(patterns: &[UnreachablePattern]) -> Result<Self, ConfigError> {
        let matchers = patterns
            .iter()
            .map(|p| match p {
                UnreachablePattern::Substring(s) => Ok((s.clone(), Matcher::Substring(s.clone()))),
                UnreachablePattern::Regex(r) => Regex::new(r)
                    .map(|re| (r.clone(), Matcher::Regex(re)))
                    .map_err(|source| ConfigError::InvalidPattern {
                        pattern: r.clone(),
                        source,
                    }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { matchers })
    }

    /// First pattern matching `details`, if any.
    pub fn classify(&self, details: &str) -> Option<&str> {
        self.matchers
            .iter()
            .find(|(_, m)| match m {
                Matcher::Substring(s) => details.contains(s.as_str()),
                Matcher::Regex(re) => re.is_match(details),
            })
            .map(|(pattern, _)| pattern.as_str())
    }

    pub fn is_unreachable(&self, details: &str) -> bool {
        self.classify(details).is_some()
    }
}

/// Where the controller is in its two-attempt lifecycle.
#[derive(Debug)]
pub enum AttemptState {
    FirstAttempt,
    RetryAttempt {
        reason: String,
        first_failure: InvocationFailure,
    },
}

/// Final attempt's result together with the command that produced it.
#[derive(Debug)]
pub struct ResilientRun {
    pub command: CommandLine,
    pub outcome: Result<String, InvocationFailure>,
    pub note: Option<ResiliencyNote>,
}

pub struct ResiliencyController<'a, R> {
    runner: &'a R,
    classifier: &'a UnreachableClassifier,
    override_flag: &'a str,
}

impl<'a, R: CommandRunner> ResiliencyController<'a, R> {
    pub fn new(runner: &'a R, classifier: &'a UnreachableClassifier, override_flag: &'a str) -> Self {
        Self {
            runner,
            classifier,
            override_flag,
        }
    }

    /// Run `command`, retrying at most once.
    pub async fn execute(&self, command: CommandLine, timeout: Duration) -> ResilientRun {
        let mut command = command;
        let mut state = AttemptState::FirstAttempt;
        loop {
            let result = self.runner.run(&command, timeout).await;
            match (state, result) {
                (AttemptState::FirstAttempt, Ok(output)) => {
                    return ResilientRun {
                        command,
                        outcome: Ok(output),
                        note: None,
                    };
                }
                (AttemptState::FirstAttempt, Err(failure)) => match self.retry_reason(&command, &failure) {
                    Some(reason) => {
                        info!(host = command.target(), %reason, "retrying scan with override flag");
                        command = command.with_flag(self.override_flag);
                        state = AttemptState::RetryAttempt {
                            reason,
                            first_failure: failure,
                        };
                    }
                    None => {
                        return ResilientRun {
                            command,
                            outcome: Err(failure),
                            note: None,
                        };
                    }
                },
                (AttemptState::RetryAttempt { reason, first_failure }, result) => {
                    debug!(host = command.target(), ok = result.is_ok(), "retry attempt finished");
                    return ResilientRun {
                        command,
                        outcome: result,
                        note: Some(ResiliencyNote::triggered(reason, first_failure)),
                    };
                }
            }
        }
    }

    fn retry_reason(&self, command: &CommandLine, failure: &InvocationFailure) -> Option<String> {
        let pattern = self.classifier.classify(&failure.details)?;
        if command.has_flag(self.override_flag) {
            debug!(
                host = command.target(),
                pattern, "host looks unreachable but override already present, not retrying"
            );
            return None;
        }
        Some(format!(
            "host appeared unreachable (matched \"{pattern}\"); retried with {}",
            self.override_flag
        ))
    }
}
