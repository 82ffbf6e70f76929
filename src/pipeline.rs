//! Per-item scan pipeline: derive, build, run, retry, summarize, record.

use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::command::CommandLine;
use crate::config::PipelineConfig;
use crate::error::ConfigError;
use crate::history::{now_rfc3339, HistoryRecorder};
use crate::resiliency::{ResiliencyController, UnreachableClassifier};
use crate::runner::CommandRunner;
use crate::summary::parse_and_summarize;
use crate::types::{
    HistoryRecord, OutputFormat, ResiliencyNote, ScanOutcome, ScanRequest, ScanSuccess, SummaryReport,
};

/// Final state of one processed item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemResult {
    pub target: String,
    pub flags_used: String,
    pub format: OutputFormat,
    pub outcome: ScanOutcome,
    pub resiliency_note: Option<ResiliencyNote>,
    pub parsed: Option<Value>,
    pub summary: Option<SummaryReport>,
}

impl ItemResult {
    /// Flatten into the single object handed back to the host.
    ///
    /// Success: `error:false, target, command, output, format, flags`;
    /// failure: `error:true, message, details, cause, command, stdout, stderr`.
    /// `parsed`, `summary` and `resiliencyNote` are added when present.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        match &self.outcome {
            ScanOutcome::Success(s) => {
                obj.insert("error".into(), Value::Bool(false));
                obj.insert("target".into(), json!(s.target));
                obj.insert("command".into(), json!(s.command));
                obj.insert("output".into(), json!(s.output));
                obj.insert("format".into(), json!(s.format));
                obj.insert("flags".into(), json!(s.flags));
            }
            ScanOutcome::Failure(f) => {
                obj.insert("error".into(), Value::Bool(true));
                obj.insert("message".into(), json!(f.message));
                obj.insert("details".into(), json!(f.details));
                obj.insert("cause".into(), json!(f.cause));
                obj.insert("command".into(), json!(f.command));
                obj.insert("stdout".into(), json!(f.stdout));
                obj.insert("stderr".into(), json!(f.stderr));
            }
        }
        if let Some(parsed) = &self.parsed {
            obj.insert("parsed".into(), parsed.clone());
        }
        if let Some(summary) = &self.summary {
            obj.insert("summary".into(), json!(summary));
        }
        if let Some(note) = &self.resiliency_note {
            obj.insert("resiliencyNote".into(), json!(note));
        }
        Value::Object(obj)
    }

    pub fn history_record(&self, timestamp: String) -> HistoryRecord {
        HistoryRecord {
            timestamp,
            target: self.target.clone(),
            flags_used: self.flags_used.clone(),
            format: self.format,
            summary: self.summary.clone(),
            failure: self.outcome.failure().cloned(),
            resiliency_note: self.resiliency_note.clone(),
        }
    }
}

pub struct Pipeline<R> {
    runner: R,
    classifier: UnreachableClassifier,
    override_flag: String,
    history: HistoryRecorder,
}

impl<R: CommandRunner> Pipeline<R> {
    pub fn new(runner: R, config: &PipelineConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            runner,
            classifier: UnreachableClassifier::new(&config.unreachable_patterns)?,
            override_flag: config.override_flag.clone(),
            history: HistoryRecorder::new(config.history_path.clone()),
        })
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn history(&self) -> &HistoryRecorder {
        &self.history
    }

    /// Process one request to completion. Never fails: every problem ends up
    /// in the returned result.
    pub async fn process(&self, request: &ScanRequest) -> ItemResult {
        let command = CommandLine::build(request);
        info!(
            host = %request.target,
            mode = request.mode.name(),
            format = %request.output_format,
            command = %command,
            "starting scan"
        );

        let timeout = Duration::from_secs(request.timeout_seconds);
        let run = ResiliencyController::new(&self.runner, &self.classifier, &self.override_flag)
            .execute(command, timeout)
            .await;

        let outcome = match run.outcome {
            Ok(output) => ScanOutcome::Success(ScanSuccess {
                target: request.target.clone(),
                command: run.command.to_string(),
                output,
                format: request.output_format,
                flags: run.command.flags_used(),
            }),
            Err(failure) => {
                warn!(host = %request.target, error = %failure, "scan failed");
                ScanOutcome::Failure(failure)
            }
        };

        let (parsed, summary) = match &outcome {
            ScanOutcome::Success(s) if s.format.is_machine_readable() => {
                let (tree, report) = parse_and_summarize(&s.output);
                if let SummaryReport::Error(e) = &report {
                    warn!(host = %request.target, details = %e.details, "could not parse scan output");
                }
                (tree, request.auto_summarize.then_some(report))
            }
            _ => (None, None),
        };

        let result = ItemResult {
            target: request.target.clone(),
            flags_used: run.command.flags_used(),
            format: request.output_format,
            outcome,
            resiliency_note: run.note,
            parsed,
            summary,
        };

        if request.persist_history {
            let record = result.history_record(now_rfc3339());
            if let Err(e) = self.history.append(&record).await {
                warn!(path = %self.history.path().display(), error = %e, "failed to record scan history");
            }
        }

        info!(
            host = %result.target,
            ok = result.outcome.is_success(),
            retried = result.resiliency_note.is_some(),
            "scan finished"
        );
        result
    }

    /// Process requests one after another; a failed item does not stop the rest.
    pub async fn process_batch(&self, requests: &[ScanRequest]) -> Vec<ItemResult> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.process(request).await);
        }
        results
    }
}
