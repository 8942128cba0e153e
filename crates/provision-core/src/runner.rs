//! Sequential execution of a flattened task list.
//!
//! Each entry is either a policy gate (checked against host facts, fatal on
//! failure) or an action: options are split off, the action is built and
//! validated, then run under its retry budget. An exhausted action either
//! stops the run or, with `on_error: continue`, is logged and skipped.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::actions::{Action, ActionError, ActionRegistry};
use crate::context::ExecContext;
use crate::document::TaskEntry;
use crate::error::{ProvisionError, Result};
use crate::policy::{self, HostFacts};
use crate::retry::{retry, Backoff, RetryError};
use crate::run_options::{OnError, RunOptions};

pub const DEFAULT_ACTION_BASE_DELAY: Duration = Duration::from_secs(1);

/// An exhausted entry that was allowed to continue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    pub index: usize,
    pub action: String,
    pub attempts: u32,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub gates_passed: usize,
    pub succeeded: usize,
    pub continued: Vec<TaskFailure>,
}

/// Split options off `entry`, build its action and validate it.
///
/// `index` is 1-based and only used for error context.
pub fn prepare(
    registry: &ActionRegistry,
    ctx: &ExecContext,
    index: usize,
    entry: &TaskEntry,
) -> Result<(RunOptions, Box<dyn Action>)> {
    let name = entry.key();
    let factory = registry.get(name).ok_or_else(|| ProvisionError::UnknownAction {
        index,
        action: name.to_string(),
    })?;
    let (options, config) = RunOptions::extract(entry.value()).map_err(|message| ProvisionError::RunOptions {
        index,
        action: name.to_string(),
        message,
    })?;
    let action = factory(ctx, &config).map_err(|source| ProvisionError::ActionConfig {
        index,
        action: name.to_string(),
        source,
    })?;
    action.validate().map_err(|source| ProvisionError::Validation {
        index,
        action: name.to_string(),
        source,
    })?;
    Ok((options, action))
}

/// Run `action` up to `backoff.max_attempts` times, returning the number of
/// attempts the successful run took.
pub async fn run_with_retry(
    action: &dyn Action,
    ctx: &ExecContext,
    backoff: &Backoff,
    label: &str,
) -> std::result::Result<u32, RetryError<ActionError>> {
    let (_, attempts) = retry(&ctx.cancel, backoff, label, move |attempt| {
        debug!(action = label, attempt, "attempt");
        action.run(ctx)
    })
    .await?;
    Ok(attempts)
}

pub struct Runner<'a> {
    registry: &'a ActionRegistry,
    facts: &'a dyn HostFacts,
    ctx: ExecContext,
    base_delay: Duration,
}

impl<'a> Runner<'a> {
    pub fn new(registry: &'a ActionRegistry, facts: &'a dyn HostFacts, ctx: ExecContext) -> Self {
        Self {
            registry,
            facts,
            ctx,
            base_delay: DEFAULT_ACTION_BASE_DELAY,
        }
    }

    /// Base of the exponential wait between action attempts.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn context(&self) -> &ExecContext {
        &self.ctx
    }

    /// Execute every entry in order. Stops at the first gate failure,
    /// configuration defect, aborting action failure, or cancellation.
    pub async fn run(&self, tasks: &[TaskEntry]) -> Result<RunSummary> {
        let mut summary = RunSummary {
            total: tasks.len(),
            ..RunSummary::default()
        };
        for (i, entry) in tasks.iter().enumerate() {
            let index = i + 1;
            self.ctx.cancel.check().map_err(ProvisionError::Cancelled)?;

            if entry.is_gate() {
                self.check_gate(index, entry)?;
                summary.gates_passed += 1;
                continue;
            }

            info!(index, total = summary.total, action = entry.key(), "running task");
            match self.run_action(index, entry).await? {
                None => summary.succeeded += 1,
                Some(failure) => summary.continued.push(failure),
            }
        }
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            continued = summary.continued.len(),
            "run complete"
        );
        Ok(summary)
    }

    fn check_gate(&self, index: usize, entry: &TaskEntry) -> Result<()> {
        let policies =
            policy::parse_gate(entry.value()).map_err(|source| ProvisionError::Policy { index, source })?;
        for p in &policies {
            debug!(index, policy = p.name(), "checking policy");
            p.check(self.facts)
                .map_err(|source| ProvisionError::Policy { index, source })?;
        }
        info!(index, policies = policies.len(), "policy gate passed");
        Ok(())
    }

    /// `Ok(Some(_))` is an exhausted entry whose disposition is continue.
    async fn run_action(&self, index: usize, entry: &TaskEntry) -> Result<Option<TaskFailure>> {
        let name = entry.key();
        let (options, action) = prepare(self.registry, &self.ctx, index, entry)?;
        let backoff = Backoff::from_retries(options.retries, self.base_delay);

        match run_with_retry(action.as_ref(), &self.ctx, &backoff, name).await {
            Ok(attempts) => {
                debug!(index, action = name, attempts, "task succeeded");
                Ok(None)
            }
            Err(RetryError::Cancelled(cause)) => Err(ProvisionError::Cancelled(cause)),
            Err(RetryError::Exhausted { attempts, last }) => {
                // An attempt killed by cancellation is not a task failure.
                if let Err(cause) = self.ctx.cancel.check() {
                    return Err(ProvisionError::Cancelled(cause));
                }
                match options.on_error {
                    OnError::Continue => {
                        warn!(index, action = name, attempts, error = %last, "task failed, continuing");
                        Ok(Some(TaskFailure {
                            index,
                            action: name.to_string(),
                            attempts,
                            error: last.to_string(),
                        }))
                    }
                    OnError::Abort => Err(ProvisionError::Execution {
                        index,
                        action: name.to_string(),
                        attempts,
                        source: last,
                    }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::tests::Scripted;
    use crate::cancel::{Cancellation, Cancelled};
    use crate::document::ConfigDocument;
    use crate::policy::{PolicyError, StaticFacts};
    use async_trait::async_trait;
    use serde_yaml::Value;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// Appends its `label` to a shared log on every run.
    struct Recorder {
        label: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Action for Recorder {
        fn validate(&self) -> std::result::Result<(), ActionError> {
            Ok(())
        }

        async fn run(&self, _ctx: &ExecContext) -> std::result::Result<(), ActionError> {
            self.log.lock().unwrap().push(self.label.clone());
            Ok(())
        }
    }

    struct Harness {
        registry: ActionRegistry,
        runs: Arc<AtomicU32>,
        log: Arc<Mutex<Vec<String>>>,
        facts: StaticFacts,
    }

    impl Harness {
        fn new() -> Self {
            let runs = Arc::new(AtomicU32::new(0));
            let log = Arc::new(Mutex::new(Vec::new()));
            let mut registry = ActionRegistry::new();

            let counter = runs.clone();
            registry.register("test.flaky", move |_: &ExecContext, value: &Value| {
                let failures = value.get("failures").and_then(Value::as_u64).unwrap_or(0) as u32;
                let invalid = value.get("invalid").and_then(Value::as_bool).unwrap_or(false);
                Ok(Box::new(Scripted {
                    runs: counter.clone(),
                    failures,
                    invalid,
                }) as Box<dyn Action>)
            });
            let shared = log.clone();
            registry.register("test.record", move |_: &ExecContext, value: &Value| {
                Ok(Box::new(Recorder {
                    label: value.as_str().unwrap_or_default().to_string(),
                    log: shared.clone(),
                }) as Box<dyn Action>)
            });

            Self {
                registry,
                runs,
                log,
                facts: StaticFacts {
                    os_family: "windows".into(),
                    os_version: "11".into(),
                    device_model: "Latitude 7440".into(),
                    chassis_type: "laptop".into(),
                },
            }
        }

        async fn run_with(&self, cancel: Cancellation, src: &str) -> Result<RunSummary> {
            let doc = ConfigDocument::parse("test.yaml", src.as_bytes()).unwrap();
            let ctx = ExecContext {
                cancel,
                ..ExecContext::default()
            };
            Runner::new(&self.registry, &self.facts, ctx)
                .with_base_delay(Duration::from_millis(1))
                .run(&doc.tasks)
                .await
        }

        async fn run(&self, src: &str) -> Result<RunSummary> {
            self.run_with(Cancellation::never(), src).await
        }

        fn runs(&self) -> u32 {
            self.runs.load(Ordering::SeqCst)
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn runs_entries_in_order() {
        let h = Harness::new();
        let summary = h
            .run("- test.record: a\n- test.record: b\n- test.record: c\n")
            .await
            .unwrap();
        assert_eq!(h.log(), ["a", "b", "c"]);
        assert_eq!(summary.succeeded, 3);
        assert!(summary.continued.is_empty());
    }

    #[tokio::test]
    async fn retry_stops_at_first_success() {
        let h = Harness::new();
        h.run("- test.flaky: {failures: 2, retries: 3}\n").await.unwrap();
        assert_eq!(h.runs(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_propagate_last_error() {
        let h = Harness::new();
        let err = h
            .run("- test.flaky: {failures: 100, retries: 2}\n- test.record: after\n")
            .await
            .unwrap_err();
        assert_eq!(h.runs(), 3);
        match err {
            ProvisionError::Execution {
                index,
                action,
                attempts,
                source,
            } => {
                assert_eq!(index, 1);
                assert_eq!(action, "test.flaky");
                assert_eq!(attempts, 3);
                assert!(source.to_string().contains("run 3 failed"), "{source}");
            }
            other => panic!("expected Execution, got {other:?}"),
        }
        assert!(h.log().is_empty());
    }

    #[tokio::test]
    async fn no_retries_means_one_attempt() {
        let h = Harness::new();
        assert!(h.run("- test.flaky: {failures: 1}\n").await.is_err());
        assert_eq!(h.runs(), 1);
    }

    #[tokio::test]
    async fn continue_disposition_moves_on() {
        let h = Harness::new();
        let summary = h
            .run("- test.flaky: {failures: 100, retries: 1, on_error: continue}\n- test.record: after\n")
            .await
            .unwrap();
        assert_eq!(h.runs(), 2);
        assert_eq!(h.log(), ["after"]);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.continued.len(), 1);
        assert_eq!(summary.continued[0].index, 1);
        assert_eq!(summary.continued[0].attempts, 2);
    }

    #[tokio::test]
    async fn unknown_action_aborts_before_later_entries() {
        let h = Harness::new();
        let err = h
            .run("- test.record: first\n- test.nope: {}\n- test.record: never\n")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::UnknownAction { index: 2, .. }), "{err}");
        assert_eq!(h.log(), ["first"]);
    }

    #[tokio::test]
    async fn invalid_action_never_runs() {
        let h = Harness::new();
        let err = h
            .run("- test.flaky: {invalid: true, on_error: continue}\n")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Validation { .. }), "{err}");
        assert_eq!(h.runs(), 0);
    }

    #[tokio::test]
    async fn bad_run_options_abort() {
        let h = Harness::new();
        let err = h.run("- test.flaky: {retries: -2}\n").await.unwrap_err();
        assert!(matches!(err, ProvisionError::RunOptions { .. }), "{err}");
    }

    #[tokio::test]
    async fn unknown_action_reported_before_its_options() {
        let h = Harness::new();
        let err = h.run("- no.such: {retries: -1}\n").await.unwrap_err();
        assert!(matches!(err, ProvisionError::UnknownAction { index: 1, .. }), "{err}");
    }

    #[tokio::test]
    async fn passing_gate_lets_tasks_run() {
        let h = Harness::new();
        let summary = h
            .run("- policy:\n  - os_version: {allowed_versions: ['10', '11']}\n  - chassis_type: {allowed: [laptop]}\n- test.record: a\n")
            .await
            .unwrap();
        assert_eq!(summary.gates_passed, 1);
        assert_eq!(h.log(), ["a"]);
    }

    #[tokio::test]
    async fn failing_gate_aborts_run() {
        let h = Harness::new();
        let err = h
            .run("- test.record: before\n- policy:\n  - device_model: {allowed: [OptiPlex]}\n- test.record: after\n")
            .await
            .unwrap_err();
        match err {
            ProvisionError::Policy { index, source } => {
                assert_eq!(index, 2);
                assert!(matches!(source, PolicyError::Unmet { policy: "device_model", .. }));
            }
            other => panic!("expected Policy, got {other:?}"),
        }
        assert_eq!(h.log(), ["before"]);
    }

    #[tokio::test]
    async fn unknown_policy_aborts_run() {
        let h = Harness::new();
        let err = h.run("- policy: [disk_size]\n- test.record: a\n").await.unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Policy {
                source: PolicyError::Unknown(_),
                ..
            }
        ));
        assert!(h.log().is_empty());
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let h = Harness::new();
        let (handle, cancel) = Cancellation::new();
        let doc = ConfigDocument::parse("t", b"- test.flaky: {failures: 100, retries: 5}\n").unwrap();
        let ctx = ExecContext {
            cancel,
            ..ExecContext::default()
        };
        let runner = Runner::new(&h.registry, &h.facts, ctx).with_base_delay(Duration::from_secs(30));
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });
        let started = std::time::Instant::now();
        let err = runner.run(&doc.tasks).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Cancelled(Cancelled::Requested)), "{err}");
        assert!(err.is_cancelled());
        assert_eq!(h.runs(), 1);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn expired_deadline_runs_nothing() {
        let h = Harness::new();
        let cancel = Cancellation::never().with_timeout(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let err = h.run_with(cancel, "- test.record: a\n").await.unwrap_err();
        assert!(matches!(err, ProvisionError::Cancelled(Cancelled::DeadlineExceeded)), "{err}");
        assert!(h.log().is_empty());
    }

    #[tokio::test]
    async fn empty_task_list_succeeds() {
        let h = Harness::new();
        let summary = h.run("").await.unwrap();
        assert_eq!(summary, RunSummary::default());
    }
}
