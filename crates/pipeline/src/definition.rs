//! Pipeline definitions and the execution loop.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use kitchenline_core::{JobId, JobKind};

use crate::cancel::CancellationToken;
use crate::context::{ProgressSink, StageContext};
use crate::error::{ErrorClass, PipelineError, StageError};
use crate::stage::{PipelineState, Stage};

/// Where a paused run picks up again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumePoint {
    pub stage_index: usize,
    /// Serialized pipeline state as it was handed to the paused stage.
    pub state: serde_json::Value,
    /// Operator decision, already validated.
    pub decision: serde_json::Value,
    /// Progress reached before the pause.
    pub floor: u8,
}

/// Everything a pipeline needs to execute one run.
pub struct RunRequest<'a> {
    pub job_id: JobId,
    pub run_generation: u64,
    pub input: &'a serde_json::Value,
    pub resume: Option<ResumePoint>,
    pub sink: &'a dyn ProgressSink,
    pub token: &'a CancellationToken,
}

/// How a run ended, as seen by the loop. The dispatcher turns this into a
/// status transition.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Completed {
        result_ref: String,
    },
    Failed {
        stage: String,
        cause: String,
    },
    Canceled {
        stage: String,
    },
    NeedsInput {
        stage_index: usize,
        stage: String,
        reason: String,
        candidates: Vec<serde_json::Value>,
        state: serde_json::Value,
    },
}

/// Object-safe face of a pipeline definition, one per job kind.
pub trait JobPipeline: Send + Sync {
    fn kind(&self) -> JobKind;

    fn stage_names(&self) -> Vec<&'static str>;

    /// Validate and normalize a submission's input.
    fn validate_input(&self, input: &serde_json::Value) -> Result<serde_json::Value, PipelineError>;

    /// Validate and normalize an operator decision for a paused job.
    fn validate_resolution(
        &self,
        decision: &serde_json::Value,
    ) -> Result<serde_json::Value, PipelineError>;

    fn execute(&self, request: RunRequest<'_>) -> PipelineOutcome;
}

struct StageSlot<S> {
    stage: Box<dyn Stage<S>>,
    weight: u8,
    offset: u8,
}

/// Ordered, weighted list of stages for one job kind.
pub struct PipelineDefinition<S> {
    kind: JobKind,
    stages: Vec<StageSlot<S>>,
}

pub struct PipelineBuilder<S> {
    kind: JobKind,
    stages: Vec<(Box<dyn Stage<S>>, u8)>,
}

impl<S: PipelineState> PipelineBuilder<S> {
    pub fn stage(mut self, stage: impl Stage<S> + 'static, weight: u8) -> Self {
        self.stages.push((Box::new(stage), weight));
        self
    }

    /// Fails unless there is at least one stage, names are unique and the
    /// weights sum to exactly 100.
    pub fn build(self) -> Result<PipelineDefinition<S>, PipelineError> {
        if self.stages.is_empty() {
            return Err(PipelineError::InvalidDefinition(format!(
                "{} has no stages",
                self.kind
            )));
        }

        let total: u32 = self.stages.iter().map(|(_, w)| u32::from(*w)).sum();
        if total != 100 {
            return Err(PipelineError::InvalidDefinition(format!(
                "{} stage weights sum to {total}, expected 100",
                self.kind
            )));
        }

        let mut names: Vec<&'static str> = Vec::with_capacity(self.stages.len());
        for (stage, _) in &self.stages {
            if names.contains(&stage.name()) {
                return Err(PipelineError::InvalidDefinition(format!(
                    "duplicate stage name '{}'",
                    stage.name()
                )));
            }
            names.push(stage.name());
        }

        let mut offset = 0u8;
        let stages = self
            .stages
            .into_iter()
            .map(|(stage, weight)| {
                let slot = StageSlot {
                    stage,
                    weight,
                    offset,
                };
                offset += weight;
                slot
            })
            .collect();

        Ok(PipelineDefinition {
            kind: self.kind,
            stages,
        })
    }
}

impl<S: PipelineState> PipelineDefinition<S> {
    pub fn builder(kind: JobKind) -> PipelineBuilder<S> {
        PipelineBuilder {
            kind,
            stages: Vec::new(),
        }
    }

    fn first_stage_name(&self) -> &'static str {
        self.stages
            .first()
            .map(|s| s.stage.name())
            .unwrap_or("Pipeline")
    }

    fn initial_state(&self, request: &mut RunRequest<'_>) -> Result<(usize, S, u8), PipelineOutcome> {
        match request.resume.take() {
            Some(resume) => {
                let Some(slot) = self.stages.get(resume.stage_index) else {
                    return Err(PipelineOutcome::Failed {
                        stage: self.first_stage_name().to_string(),
                        cause: format!("resume point {} is out of range", resume.stage_index),
                    });
                };
                let fail = |cause: String| PipelineOutcome::Failed {
                    stage: slot.stage.name().to_string(),
                    cause,
                };
                let mut state: S = serde_json::from_value(resume.state)
                    .map_err(|e| fail(PipelineError::ResumeState(e.to_string()).to_string()))?;
                state
                    .apply_resolution(&resume.decision)
                    .map_err(|e| fail(e.to_string()))?;
                Ok((resume.stage_index, state, resume.floor))
            }
            None => {
                let fail = |cause: String| PipelineOutcome::Failed {
                    stage: self.first_stage_name().to_string(),
                    cause,
                };
                let input: S::Input = serde_json::from_value(request.input.clone())
                    .map_err(|e| fail(PipelineError::InvalidInput(e.to_string()).to_string()))?;
                let input = S::validate(input).map_err(|e| fail(e.to_string()))?;
                Ok((0, S::from_input(input), 0))
            }
        }
    }

    /// Drive the stages in order from the start (or the resume point).
    pub fn run(&self, mut request: RunRequest<'_>) -> PipelineOutcome {
        let (start, mut state, floor) = match self.initial_state(&mut request) {
            Ok(v) => v,
            Err(outcome) => return outcome,
        };

        let floor = AtomicU8::new(floor);
        let superseded = AtomicBool::new(false);

        for (index, slot) in self.stages.iter().enumerate().skip(start) {
            let name = slot.stage.name();
            let ctx = StageContext::new(
                request.job_id,
                request.run_generation,
                name,
                slot.offset,
                slot.weight,
                request.sink,
                request.token,
                &floor,
                &superseded,
            );

            if ctx.is_canceled() {
                return PipelineOutcome::Canceled {
                    stage: name.to_string(),
                };
            }

            let entry = slot.offset.max(floor.fetch_max(slot.offset, Ordering::SeqCst));
            if !request.sink.set_progress(entry, name) {
                superseded.store(true, Ordering::SeqCst);
                return PipelineOutcome::Canceled {
                    stage: name.to_string(),
                };
            }
            info!(
                job_id = %request.job_id,
                run_generation = request.run_generation,
                stage = name,
                "stage started"
            );
            ctx.log(format!("{name} started"));

            let policy = slot.stage.retry_policy();
            let mut attempt: u32 = 0;
            let output = loop {
                attempt += 1;
                if ctx.is_canceled() {
                    return PipelineOutcome::Canceled {
                        stage: name.to_string(),
                    };
                }

                let err = match slot.stage.run(&ctx, &state) {
                    Ok(output) => break output,
                    Err(err) => err,
                };

                let class = match &err {
                    StageError::Canceled => {
                        return PipelineOutcome::Canceled {
                            stage: name.to_string(),
                        };
                    }
                    StageError::NeedsInput { reason, candidates } => {
                        return match serde_json::to_value(&state) {
                            Ok(snapshot) => PipelineOutcome::NeedsInput {
                                stage_index: index,
                                stage: name.to_string(),
                                reason: reason.clone(),
                                candidates: candidates.clone(),
                                state: snapshot,
                            },
                            Err(e) => PipelineOutcome::Failed {
                                stage: name.to_string(),
                                cause: format!("could not persist paused state: {e}"),
                            },
                        };
                    }
                    StageError::Transient(_) => ErrorClass::Transient,
                    StageError::Fatal(_) => ErrorClass::Fatal,
                    StageError::Service(service) => slot.stage.error_policy().classify(service),
                };

                if ctx.is_canceled() {
                    return PipelineOutcome::Canceled {
                        stage: name.to_string(),
                    };
                }

                if class == ErrorClass::Transient && policy.should_retry(attempt) {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        job_id = %request.job_id,
                        stage = name,
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "stage attempt failed; retrying"
                    );
                    ctx.log(format!(
                        "{name} attempt {attempt}/{} failed: {err}; retrying in {} ms",
                        policy.max_attempts,
                        delay.as_millis()
                    ));
                    if ctx.sleep(delay).is_err() {
                        return PipelineOutcome::Canceled {
                            stage: name.to_string(),
                        };
                    }
                    continue;
                }

                let cause = if class == ErrorClass::Transient && attempt > 1 {
                    format!("{err} (gave up after {attempt} attempts)")
                } else {
                    err.to_string()
                };
                warn!(
                    job_id = %request.job_id,
                    stage = name,
                    error = %cause,
                    "stage failed"
                );
                return PipelineOutcome::Failed {
                    stage: name.to_string(),
                    cause,
                };
            };

            state = output;
            ctx.report_progress(100);
            ctx.log(format!("{name} finished"));
        }

        match state.result_ref() {
            Some(result_ref) => PipelineOutcome::Completed {
                result_ref: result_ref.to_string(),
            },
            None => PipelineOutcome::Failed {
                stage: self
                    .stages
                    .last()
                    .map(|s| s.stage.name())
                    .unwrap_or("Pipeline")
                    .to_string(),
                cause: "pipeline finished without producing an artifact".to_string(),
            },
        }
    }
}

impl<S: PipelineState> JobPipeline for PipelineDefinition<S> {
    fn kind(&self) -> JobKind {
        self.kind
    }

    fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.stage.name()).collect()
    }

    fn validate_input(&self, input: &serde_json::Value) -> Result<serde_json::Value, PipelineError> {
        let parsed: S::Input = serde_json::from_value(input.clone())
            .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
        let normalized = S::validate(parsed)?;
        serde_json::to_value(normalized).map_err(|e| PipelineError::InvalidInput(e.to_string()))
    }

    fn validate_resolution(
        &self,
        decision: &serde_json::Value,
    ) -> Result<serde_json::Value, PipelineError> {
        S::validate_resolution(decision)
    }

    fn execute(&self, request: RunRequest<'_>) -> PipelineOutcome {
        self.run(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::ServiceError;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        progress: Mutex<Vec<(u8, String)>>,
        logs: Mutex<Vec<String>>,
    }

    impl ProgressSink for RecordingSink {
        fn set_progress(&self, percent: u8, step: &str) -> bool {
            self.progress.lock().unwrap().push((percent, step.to_string()));
            true
        }
        fn append_log(&self, message: &str) -> bool {
            self.logs.lock().unwrap().push(message.to_string());
            true
        }
        fn merge_metadata(&self, _key: &str, _value: serde_json::Value) -> bool {
            true
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Tally {
        value: i64,
        hint: Option<String>,
        output: Option<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct TallyInput {
        start: i64,
    }

    impl PipelineState for Tally {
        type Input = TallyInput;

        fn validate(input: TallyInput) -> Result<TallyInput, PipelineError> {
            if input.start < 0 {
                return Err(PipelineError::InvalidInput("start must be >= 0".into()));
            }
            Ok(input)
        }

        fn from_input(input: TallyInput) -> Self {
            Self {
                value: input.start,
                hint: None,
                output: None,
            }
        }

        fn result_ref(&self) -> Option<&str> {
            self.output.as_deref()
        }

        fn validate_resolution(decision: &serde_json::Value) -> Result<serde_json::Value, PipelineError> {
            match decision.get("hint").and_then(|v| v.as_str()) {
                Some(h) => Ok(json!({ "hint": h })),
                None => Err(PipelineError::InvalidResolution("hint is required".into())),
            }
        }

        fn apply_resolution(&mut self, decision: &serde_json::Value) -> Result<(), PipelineError> {
            self.hint = decision.get("hint").and_then(|v| v.as_str()).map(String::from);
            Ok(())
        }
    }

    struct Add(&'static str, i64);

    impl Stage<Tally> for Add {
        fn name(&self) -> &'static str {
            self.0
        }
        fn run(&self, ctx: &StageContext<'_>, state: &Tally) -> Result<Tally, StageError> {
            ctx.report_progress(50);
            let mut next = state.clone();
            next.value += self.1;
            Ok(next)
        }
    }

    struct Finish;

    impl Stage<Tally> for Finish {
        fn name(&self) -> &'static str {
            "Finish"
        }
        fn run(&self, _ctx: &StageContext<'_>, state: &Tally) -> Result<Tally, StageError> {
            let mut next = state.clone();
            next.output = Some(format!("tally/{}", state.value));
            Ok(next)
        }
    }

    /// Fails with `error` for the first `failures` attempts.
    struct Flaky {
        failures: u32,
        error: StageError,
        calls: AtomicU32,
    }

    impl Stage<Tally> for Flaky {
        fn name(&self) -> &'static str {
            "Flaky"
        }
        fn run(&self, _ctx: &StageContext<'_>, state: &Tally) -> Result<Tally, StageError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                Err(self.error.clone())
            } else {
                Ok(state.clone())
            }
        }
        fn retry_policy(&self) -> RetryPolicy {
            RetryPolicy::fixed(3, Duration::from_millis(1))
        }
    }

    struct AskOnce;

    impl Stage<Tally> for AskOnce {
        fn name(&self) -> &'static str {
            "Ask"
        }
        fn run(&self, _ctx: &StageContext<'_>, state: &Tally) -> Result<Tally, StageError> {
            match &state.hint {
                Some(h) => {
                    let mut next = state.clone();
                    next.value += h.len() as i64;
                    Ok(next)
                }
                None => Err(StageError::needs_input("which one?", vec![json!("a"), json!("bb")])),
            }
        }
    }

    fn run(def: &PipelineDefinition<Tally>, input: serde_json::Value, sink: &RecordingSink) -> PipelineOutcome {
        let token = CancellationToken::new();
        def.run(RunRequest {
            job_id: JobId::new(),
            run_generation: 1,
            input: &input,
            resume: None,
            sink,
            token: &token,
        })
    }

    fn flaky(failures: u32, error: StageError) -> Flaky {
        Flaky {
            failures,
            error,
            calls: AtomicU32::new(0),
        }
    }

    #[test]
    fn weights_must_sum_to_100() {
        let err = PipelineDefinition::<Tally>::builder(JobKind::MenuImport)
            .stage(Add("A", 1), 40)
            .stage(Finish, 50)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::InvalidDefinition(_)));

        assert!(PipelineDefinition::<Tally>::builder(JobKind::MenuImport)
            .build()
            .is_err());
    }

    #[test]
    fn duplicate_stage_names_rejected() {
        let res = PipelineDefinition::<Tally>::builder(JobKind::MenuImport)
            .stage(Add("A", 1), 50)
            .stage(Add("A", 2), 50)
            .build();
        assert!(res.is_err());
    }

    #[test]
    fn completes_with_monotone_progress() {
        let def = PipelineDefinition::builder(JobKind::MenuImport)
            .stage(Add("A", 1), 30)
            .stage(Add("B", 10), 60)
            .stage(Finish, 10)
            .build()
            .unwrap();
        let sink = RecordingSink::default();

        let outcome = run(&def, json!({"start": 5}), &sink);

        assert_eq!(
            outcome,
            PipelineOutcome::Completed {
                result_ref: "tally/16".into()
            }
        );
        let progress: Vec<u8> = sink.progress.lock().unwrap().iter().map(|(p, _)| *p).collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
        assert_eq!(progress.last(), Some(&100));
        assert!(sink.logs.lock().unwrap().contains(&"B started".to_string()));
    }

    #[test]
    fn transient_failures_are_retried_in_place() {
        let def = PipelineDefinition::builder(JobKind::MenuImport)
            .stage(flaky(2, ServiceError::timeout("slow").into()), 90)
            .stage(Finish, 10)
            .build()
            .unwrap();
        let sink = RecordingSink::default();

        assert!(matches!(
            run(&def, json!({"start": 0}), &sink),
            PipelineOutcome::Completed { .. }
        ));
        let logs = sink.logs.lock().unwrap();
        assert_eq!(logs.iter().filter(|l| l.contains("retrying")).count(), 2);
    }

    #[test]
    fn exhausted_retries_fail_with_stage_name() {
        let def = PipelineDefinition::builder(JobKind::MenuImport)
            .stage(flaky(5, ServiceError::unavailable("down").into()), 90)
            .stage(Finish, 10)
            .build()
            .unwrap();
        let sink = RecordingSink::default();

        match run(&def, json!({"start": 0}), &sink) {
            PipelineOutcome::Failed { stage, cause } => {
                assert_eq!(stage, "Flaky");
                assert!(cause.contains("gave up after 3 attempts"), "{cause}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn fatal_errors_are_not_retried() {
        let stage = flaky(5, ServiceError::not_found("no menu").into());
        let def = PipelineDefinition::builder(JobKind::MenuImport)
            .stage(stage, 90)
            .stage(Finish, 10)
            .build()
            .unwrap();
        let sink = RecordingSink::default();

        assert!(matches!(
            run(&def, json!({"start": 0}), &sink),
            PipelineOutcome::Failed { .. }
        ));
        assert!(!sink.logs.lock().unwrap().iter().any(|l| l.contains("retrying")));
    }

    #[test]
    fn invalid_input_fails_first_stage() {
        let def = PipelineDefinition::builder(JobKind::MenuImport)
            .stage(Add("A", 1), 90)
            .stage(Finish, 10)
            .build()
            .unwrap();
        let sink = RecordingSink::default();
        assert!(matches!(
            run(&def, json!({"start": -1}), &sink),
            PipelineOutcome::Failed { ref stage, .. } if stage == "A"
        ));
        assert!(def.validate_input(&json!({"start": -1})).is_err());
        assert!(def.validate_input(&json!({"begin": 1})).is_err());
    }

    #[test]
    fn canceled_token_stops_before_next_stage() {
        let def = PipelineDefinition::builder(JobKind::MenuImport)
            .stage(Add("A", 1), 50)
            .stage(Finish, 50)
            .build()
            .unwrap();
        let sink = RecordingSink::default();
        let token = CancellationToken::new();
        token.cancel();
        let input = json!({"start": 0});

        let outcome = def.run(RunRequest {
            job_id: JobId::new(),
            run_generation: 1,
            input: &input,
            resume: None,
            sink: &sink,
            token: &token,
        });

        assert_eq!(outcome, PipelineOutcome::Canceled { stage: "A".into() });
        assert!(sink.progress.lock().unwrap().is_empty());
    }

    #[test]
    fn needs_input_pauses_and_resumes_at_the_same_stage() {
        let def = PipelineDefinition::builder(JobKind::MenuImport)
            .stage(Add("A", 1), 20)
            .stage(AskOnce, 70)
            .stage(Finish, 10)
            .build()
            .unwrap();
        let sink = RecordingSink::default();

        let (stage_index, state) = match run(&def, json!({"start": 1}), &sink) {
            PipelineOutcome::NeedsInput {
                stage_index,
                stage,
                candidates,
                state,
                ..
            } => {
                assert_eq!(stage, "Ask");
                assert_eq!(candidates.len(), 2);
                (stage_index, state)
            }
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(stage_index, 1);

        let decision = def.validate_resolution(&json!({"hint": "bb"})).unwrap();
        let token = CancellationToken::new();
        let input = json!({"start": 1});
        let outcome = def.run(RunRequest {
            job_id: JobId::new(),
            run_generation: 1,
            input: &input,
            resume: Some(ResumePoint {
                stage_index,
                state,
                decision,
                floor: 20,
            }),
            sink: &sink,
            token: &token,
        });

        assert_eq!(
            outcome,
            PipelineOutcome::Completed {
                result_ref: "tally/4".into()
            }
        );
        assert!(def.validate_resolution(&json!({})).is_err());
    }
}
