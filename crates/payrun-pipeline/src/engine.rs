//! Pipeline engine: strictly sequential step execution.
//!
//! One step is in flight at a time. Each step runs its external work, then
//! (for validating steps) asks the flagger. Flags halt the run; a clean
//! checkpoint halts for review; anything else advances automatically.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use payrun_types::{FlagType, PayrunError, Result, ValidationFlag};

use crate::collaborators::{LoggingNotifier, Notification, NotificationKind, Notifier, StepWorker};
use crate::events::{EventEmitter, PipelineEvent};
use crate::flagger::ValidationFlagger;
use crate::registry::{StepDefinition, StepRegistry};
use crate::run::{PipelineRun, Resolution, SharedRun};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What happens when the user comes back from a remediation page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationPolicy {
    /// Re-run the flagged step's work and validation; override remains
    /// available if issues persist.
    #[default]
    Revalidate,
    /// Leave the step flagged; only an explicit override resolves it.
    RequireOverride,
}

/// Configuration for a pipeline engine.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound on one step's work plus validation. `None` waits forever.
    pub step_timeout: Option<Duration>,
    pub remediation_policy: RemediationPolicy,
    pub event_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            step_timeout: None,
            remediation_policy: RemediationPolicy::default(),
            event_capacity: 256,
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineEngine
// ---------------------------------------------------------------------------

/// Drives a [`PipelineRun`] through its steps. Shared by every session that
/// uses the same catalogue and collaborators.
pub struct PipelineEngine {
    registry: Arc<StepRegistry>,
    flagger: Arc<dyn ValidationFlagger>,
    worker: Arc<dyn StepWorker>,
    notifier: Arc<dyn Notifier>,
    events: EventEmitter,
    config: PipelineConfig,
}

impl PipelineEngine {
    pub fn new(
        registry: StepRegistry,
        flagger: Arc<dyn ValidationFlagger>,
        worker: Arc<dyn StepWorker>,
    ) -> Self {
        let config = PipelineConfig::default();
        Self {
            registry: Arc::new(registry),
            flagger,
            worker,
            notifier: Arc::new(LoggingNotifier),
            events: EventEmitter::new(config.event_capacity),
            config,
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.events = EventEmitter::new(config.event_capacity);
        self.config = config;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// A fresh run over this engine's catalogue.
    pub fn new_run(&self) -> PipelineRun {
        PipelineRun::new(&self.registry)
    }

    /// Begin processing at step 0. No-op if the run has already started.
    pub async fn start(&self, run: &SharedRun) -> Result<()> {
        {
            let mut guard = run.write().await;
            if !guard.mark_started() {
                tracing::debug!(run = %guard.id(), "Run already started");
                return Ok(());
            }
            tracing::info!(run = %guard.id(), steps = self.registry.len(), "Payroll run started");
            self.events.emit(PipelineEvent::RunStarted {
                run_id: guard.id(),
                step_count: self.registry.len(),
            });
        }
        self.process_current_step(run).await
    }

    /// Process steps until the run pauses or completes.
    ///
    /// No-op if the run is paused, complete, not started, or its current step
    /// is already in flight or resolved.
    pub async fn process_current_step(&self, run: &SharedRun) -> Result<()> {
        loop {
            let Some(index) = run.write().await.begin_step() else {
                return Ok(());
            };
            if self.execute_step(run, index).await? != Resolution::Advanced {
                return Ok(());
            }
        }
    }

    /// Re-run a step already moved back in flight by the gate, then carry on.
    pub(crate) async fn revalidate(&self, run: &SharedRun, index: usize) -> Result<()> {
        if self.execute_step(run, index).await? == Resolution::Advanced {
            self.process_current_step(run).await?;
        }
        Ok(())
    }

    /// Run the in-flight step at `index` to a terminal state.
    async fn execute_step(&self, run: &SharedRun, index: usize) -> Result<Resolution> {
        let step = self.registry.get_step(index)?;
        tracing::info!(step = %step.id, index, "Step started");
        self.events.emit(PipelineEvent::StepStarted {
            step_id: step.id.clone(),
            index,
        });

        let started = Instant::now();
        let flags = self.step_flags(index, step).await;
        let flag_count = flags.len();

        let mut guard = run.write().await;
        let resolution = guard.resolve_step(index, flags)?;
        debug_assert!(guard.check_invariants().is_ok(), "{:?}", guard.check_invariants());

        if resolution == Resolution::Flagged {
            tracing::warn!(step = %step.id, index, flags = flag_count, "Step flagged");
            self.events.emit(PipelineEvent::StepFlagged {
                step_id: step.id.clone(),
                index,
                flag_count,
            });
            self.notifier.notify(Notification::new(
                NotificationKind::Warning,
                format!("Issues found: {}", step.name),
                format!("{flag_count} issue(s) require attention before processing can continue"),
            ));
        } else {
            tracing::info!(step = %step.id, index, "Step completed");
            self.events.emit(PipelineEvent::StepCompleted {
                step_id: step.id.clone(),
                index,
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }
        self.announce(&guard, index, resolution);
        Ok(resolution)
    }

    /// The step's work and validation, bounded by the configured timeout.
    /// Failures never escape: they become a run-wide flag on the step.
    async fn step_flags(&self, index: usize, step: &StepDefinition) -> Vec<ValidationFlag> {
        let work = async {
            self.worker.process(index, step).await?;
            if step.validation.is_some() {
                self.flagger.flag(index, step).await
            } else {
                Ok(Vec::new())
            }
        };
        let outcome = match self.config.step_timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(result) => result,
                Err(_) => Err(PayrunError::StepTimeout {
                    step: step.id.clone(),
                    timeout_ms: limit.as_millis() as u64,
                }),
            },
            None => work.await,
        };
        match outcome {
            Ok(flags) => flags,
            Err(e) => {
                tracing::warn!(step = %step.id, index, error = %e, "Step work failed; flagging");
                vec![failure_flag(step, &e)]
            }
        }
    }

    /// Emit the events and notifications that follow a resolution.
    pub(crate) fn announce(&self, run: &PipelineRun, index: usize, resolution: Resolution) {
        let step = &run.steps()[index];
        match resolution {
            Resolution::CheckpointPause => {
                tracing::info!(step = %step.id, index, "Checkpoint reached; awaiting review");
                self.events.emit(PipelineEvent::CheckpointReached {
                    step_id: step.id.clone(),
                    index,
                });
                let message = if step.requires_confirmation {
                    "Review and confirm to hand off for approval"
                } else {
                    "Review the results before continuing"
                };
                self.notifier.notify(Notification::new(
                    NotificationKind::Info,
                    format!("Checkpoint: {}", step.name),
                    message,
                ));
            }
            Resolution::Completed => {
                tracing::info!(run = %run.id(), "Payroll run complete");
                self.events.emit(PipelineEvent::RunCompleted { run_id: run.id() });
                self.notifier.notify(Notification::new(
                    NotificationKind::Success,
                    "Payroll run complete",
                    "All steps have been processed",
                ));
            }
            Resolution::Flagged | Resolution::Advanced => {}
        }
        self.events.emit(PipelineEvent::Progress {
            percent: run.overall_progress(),
        });
    }

    pub(crate) fn notify(&self, notification: Notification) {
        self.notifier.notify(notification);
    }
}

fn failure_flag(step: &StepDefinition, error: &PayrunError) -> ValidationFlag {
    let flag_type = match error {
        PayrunError::StepTimeout { .. } => FlagType::ProcessingTimeout,
        _ => FlagType::ProcessingError,
    };
    let flag = ValidationFlag::run_wide(
        format!("{}-{}", step.id, Uuid::new_v4()),
        flag_type,
        error.to_string(),
    );
    match step.target_page {
        Some(page) => flag.with_target(page),
        None => flag,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{RecordingNotifier, SimulatedWorker};
    use crate::flagger::{NoFlags, ScriptedFlagger};
    use crate::registry::ValidationKind;
    use async_trait::async_trait;
    use payrun_types::{Severity, StepStatus, TargetPage};

    fn flag(id: &str) -> ValidationFlag {
        ValidationFlag::employee(
            id,
            "E1",
            "Katherine Johnson",
            FlagType::MissingTaxCode,
            "No tax code",
            Severity::Warning,
        )
    }

    fn engine_with(flagger: Arc<dyn ValidationFlagger>) -> PipelineEngine {
        PipelineEngine::new(
            StepRegistry::payroll_default(),
            flagger,
            Arc::new(SimulatedWorker::instant()),
        )
    }

    #[tokio::test]
    async fn start_runs_until_first_checkpoint() {
        let engine = engine_with(Arc::new(NoFlags));
        let run = engine.new_run().shared();
        engine.start(&run).await.unwrap();

        let run = run.read().await;
        assert_eq!(run.current_step_index(), 5);
        assert!(run.is_paused());
        assert_eq!(run.current_step().status, StepStatus::Done);
        assert!(run.steps()[..6].iter().all(|s| s.status == StepStatus::Done));
        assert!(run.steps()[6..].iter().all(|s| s.status == StepStatus::Pending));
        assert_eq!(run.overall_progress(), 67);
        run.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn start_twice_is_a_no_op() {
        let flagger = Arc::new(ScriptedFlagger::new());
        let engine = engine_with(flagger.clone());
        let run = engine.new_run().shared();
        engine.start(&run).await.unwrap();
        let before = run.read().await.snapshot();
        engine.start(&run).await.unwrap();
        assert_eq!(run.read().await.snapshot(), before);
        // Only the three validating steps before the checkpoint were asked.
        assert_eq!(flagger.calls(), vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn process_before_start_is_a_no_op() {
        let engine = engine_with(Arc::new(NoFlags));
        let run = engine.new_run().shared();
        engine.process_current_step(&run).await.unwrap();
        assert!(run
            .read()
            .await
            .steps()
            .iter()
            .all(|s| s.status == StepStatus::Pending));
    }

    #[tokio::test]
    async fn flagged_step_halts_and_is_idempotent() {
        let flagger = ScriptedFlagger::new().with_flags(2, vec![flag("a")]);
        let engine = engine_with(Arc::new(flagger));
        let run = engine.new_run().shared();
        engine.start(&run).await.unwrap();

        let snap = run.read().await.snapshot();
        assert_eq!(snap.current_step_index, 2);
        assert!(snap.is_paused);
        assert_eq!(snap.steps[2].status, StepStatus::Flagged);
        assert_eq!(snap.steps[2].flags, vec![flag("a")]);

        engine.process_current_step(&run).await.unwrap();
        engine.process_current_step(&run).await.unwrap();
        assert_eq!(run.read().await.snapshot(), snap);
    }

    #[tokio::test]
    async fn non_validating_steps_are_never_asked() {
        // Flags scripted on a step without a validation kind are never fetched.
        let flagger = Arc::new(ScriptedFlagger::new().with_flags(1, vec![flag("x")]));
        let engine = engine_with(flagger.clone());
        let run = engine.new_run().shared();
        engine.start(&run).await.unwrap();
        assert_eq!(run.read().await.steps()[1].status, StepStatus::Done);
        assert!(!flagger.calls().contains(&1));
    }

    struct FailingWorker;

    #[async_trait]
    impl StepWorker for FailingWorker {
        async fn process(&self, _index: usize, step: &StepDefinition) -> Result<()> {
            Err(PayrunError::Other(format!("calculation service down for {}", step.id)))
        }
    }

    #[tokio::test]
    async fn worker_failure_flags_the_step() {
        let engine = PipelineEngine::new(
            StepRegistry::payroll_default(),
            Arc::new(NoFlags),
            Arc::new(FailingWorker),
        );
        let run = engine.new_run().shared();
        engine.start(&run).await.unwrap();

        let run = run.read().await;
        let step = run.current_step();
        assert_eq!(step.status, StepStatus::Flagged);
        assert_eq!(step.flags.len(), 1);
        assert_eq!(step.flags[0].flag_type, FlagType::ProcessingError);
        assert!(step.flags[0].is_run_wide());
        assert_eq!(step.flags[0].target_page, Some(TargetPage::Employees));
        assert!(run.is_paused());
    }

    struct StuckWorker;

    #[async_trait]
    impl StepWorker for StuckWorker {
        async fn process(&self, _index: usize, _step: &StepDefinition) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_flags_the_step() {
        let engine = PipelineEngine::new(
            StepRegistry::payroll_default(),
            Arc::new(NoFlags),
            Arc::new(StuckWorker),
        )
        .with_config(PipelineConfig {
            step_timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let run = engine.new_run().shared();
        engine.start(&run).await.unwrap();

        let run = run.read().await;
        let step = run.current_step();
        assert_eq!(step.status, StepStatus::Flagged);
        assert_eq!(step.flags[0].flag_type, FlagType::ProcessingTimeout);
        assert!(step.flags[0].description.contains("30000ms"));
    }

    #[tokio::test]
    async fn events_follow_the_run() {
        let engine = engine_with(Arc::new(NoFlags));
        let mut rx = engine.events().subscribe();
        let run = engine.new_run().shared();
        engine.start(&run).await.unwrap();

        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        assert!(matches!(events[0], PipelineEvent::RunStarted { step_count: 9, .. }));
        assert!(events.contains(&PipelineEvent::CheckpointReached {
            step_id: "gross_to_net".into(),
            index: 5,
        }));
        assert_eq!(
            events.last(),
            Some(&PipelineEvent::Progress { percent: 67 })
        );
        let started = events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::StepStarted { .. }))
            .count();
        assert_eq!(started, 6);
    }

    #[tokio::test]
    async fn notifier_hears_flags_and_checkpoints() {
        let notifier = Arc::new(RecordingNotifier::default());
        let flagger = ScriptedFlagger::new().with_flags(0, vec![flag("a"), flag("b")]);
        let engine = engine_with(Arc::new(flagger)).with_notifier(notifier.clone());
        let run = engine.new_run().shared();
        engine.start(&run).await.unwrap();

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::Warning);
        assert!(sent[0].message.starts_with("2 issue(s)"));
    }

    #[tokio::test]
    async fn custom_catalogue_validates_any_marked_step() {
        let registry = StepRegistry::from_definitions(vec![
            StepDefinition::new("a", "A"),
            StepDefinition::new("b", "B")
                .validated_by(ValidationKind::VariablePay)
                .target(TargetPage::Timesheets),
        ])
        .unwrap();
        let flagger = ScriptedFlagger::new().with_flags(1, vec![flag("b1")]);
        let engine = PipelineEngine::new(
            registry,
            Arc::new(flagger),
            Arc::new(SimulatedWorker::instant()),
        );
        let run = engine.new_run().shared();
        engine.start(&run).await.unwrap();
        let run = run.read().await;
        assert_eq!(run.current_step_index(), 1);
        assert_eq!(run.current_step().status, StepStatus::Flagged);
        assert_eq!(run.overall_progress(), 50);
    }
}
