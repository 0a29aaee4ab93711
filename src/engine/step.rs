//! Test steps
//!
//! A [`Step`] is a display note, an optional timeout and a [`StepKind`].
//! Executing a step returns a boxed future with explicit suspension points;
//! the executor owns the timeout around it.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};

use super::action::{self, ActionSpec};
use super::condition::{Condition, ConditionSpec, MatchMode};
use super::frames::Frames;
use super::waiter::{WaitStats, Waiter};
use crate::common::{Error, Result};
use crate::host::Host;

/// Everything a step body can reach while it runs
#[derive(Clone)]
pub struct StepContext {
    host: Arc<dyn Host>,
    waiter: Waiter,
    label: String,
}

impl StepContext {
    pub fn new(host: Arc<dyn Host>, waiter: Waiter) -> Self {
        Self {
            host,
            waiter,
            label: String::new(),
        }
    }

    /// Same context, labelled for diagnostics
    pub fn labelled(&self, label: impl Into<String>) -> Self {
        Self {
            host: self.host.clone(),
            waiter: self.waiter,
            label: label.into(),
        }
    }

    pub fn host(&self) -> &dyn Host {
        self.host.as_ref()
    }

    pub fn waiter(&self) -> Waiter {
        self.waiter
    }

    pub fn frames(&self) -> Frames {
        self.waiter.frames()
    }

    /// Label of the step being executed, e.g. `step 2 'Press Play'`
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wait for a condition with the ambient wait timeout
    ///
    /// Timeout messages name the line this is called from.
    #[track_caller]
    pub fn wait_for<'a>(
        &'a self,
        condition: &'a mut dyn Condition,
    ) -> impl Future<Output = Result<WaitStats>> + Send + 'a {
        self.wait_for_within(condition, Duration::ZERO)
    }

    /// Wait for a condition; a zero `timeout` uses the ambient one
    #[track_caller]
    pub fn wait_for_within<'a>(
        &'a self,
        condition: &'a mut dyn Condition,
        timeout: Duration,
    ) -> impl Future<Output = Result<WaitStats>> + Send + 'a {
        let label = (!self.label.is_empty()).then_some(self.label.as_str());
        self.waiter
            .with_timeout(timeout)
            .wait(self.host.as_ref(), condition, label)
    }
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("waiter", &self.waiter)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Custom step body supplied by the embedding program
#[async_trait]
pub trait StepBody: Send + Sync {
    /// Name shown when the step has no note
    fn name(&self) -> String;

    async fn run(&self, ctx: &StepContext) -> Result<()>;
}

/// What a step does
#[derive(Clone)]
pub enum StepKind {
    /// One boundary action, with the waits it implies
    Action(ActionSpec),
    /// Wait until all (or any) of the conditions hold
    WaitFor {
        conditions: Vec<ConditionSpec>,
        mode: MatchMode,
        /// Timeout of the wait itself; zero uses the ambient wait timeout
        wait_timeout: Duration,
    },
    /// Fixed delay in real time
    WaitTime(Duration),
    /// Emit a log line
    Log(String),
    /// Sub-steps executed in order; the first failure fails the group
    Group(Vec<Step>),
    /// Delegate to a custom body
    Custom(Arc<dyn StepBody>),
}

impl fmt::Debug for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Action(a) => f.debug_tuple("Action").field(a).finish(),
            Self::WaitFor {
                conditions,
                mode,
                wait_timeout,
            } => f
                .debug_struct("WaitFor")
                .field("conditions", conditions)
                .field("mode", mode)
                .field("wait_timeout", wait_timeout)
                .finish(),
            Self::WaitTime(d) => f.debug_tuple("WaitTime").field(d).finish(),
            Self::Log(m) => f.debug_tuple("Log").field(m).finish(),
            Self::Group(steps) => f.debug_tuple("Group").field(steps).finish(),
            Self::Custom(body) => f.debug_tuple("Custom").field(&body.name()).finish(),
        }
    }
}

/// An atomic unit of a test case
#[derive(Debug, Clone)]
pub struct Step {
    /// Display label; falls back to a description of the kind
    pub note: Option<String>,
    /// Budget for the whole step; zero uses the ambient step timeout
    pub timeout: Duration,
    pub kind: StepKind,
}

impl Step {
    pub fn new(kind: StepKind) -> Self {
        Self {
            note: None,
            timeout: Duration::ZERO,
            kind,
        }
    }

    pub fn action(action: ActionSpec) -> Self {
        Self::new(StepKind::Action(action))
    }

    pub fn wait_for(mode: MatchMode, conditions: Vec<ConditionSpec>) -> Self {
        Self::new(StepKind::WaitFor {
            conditions,
            mode,
            wait_timeout: Duration::ZERO,
        })
    }

    pub fn wait_time(duration: Duration) -> Self {
        Self::new(StepKind::WaitTime(duration))
    }

    pub fn log(message: impl Into<String>) -> Self {
        Self::new(StepKind::Log(message.into()))
    }

    pub fn group(steps: Vec<Step>) -> Self {
        Self::new(StepKind::Group(steps))
    }

    pub fn custom(body: Arc<dyn StepBody>) -> Self {
        Self::new(StepKind::Custom(body))
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The step's own timeout if set, the ambient one otherwise
    pub fn effective_timeout(&self, ambient: Duration) -> Duration {
        if self.timeout.is_zero() {
            ambient
        } else {
            self.timeout
        }
    }

    /// Run the step body
    ///
    /// Errors are returned to the caller; the step never enforces its own
    /// timeout except for the sub-steps of a group.
    pub fn execute<'a>(&'a self, ctx: &'a StepContext) -> BoxFuture<'a, Result<()>> {
        async move {
            match &self.kind {
                StepKind::Action(spec) => action::perform(spec, ctx).await,
                StepKind::WaitFor {
                    conditions,
                    mode,
                    wait_timeout,
                } => {
                    let mut condition = ConditionSpec::combine(*mode, conditions.clone()).build();
                    ctx.wait_for_within(&mut *condition, *wait_timeout)
                        .await
                        .map(|_| ())
                }
                StepKind::WaitTime(duration) => {
                    tokio::time::sleep(*duration).await;
                    Ok(())
                }
                StepKind::Log(message) => {
                    tracing::info!(step = %ctx.label(), "{}", message);
                    Ok(())
                }
                StepKind::Group(steps) => {
                    for (i, step) in steps.iter().enumerate() {
                        let child = ctx.labelled(format!("{} > {} '{}'", ctx.label(), i + 1, step));
                        if step.timeout.is_zero() {
                            step.execute(&child).await?;
                        } else {
                            tokio::time::timeout(step.timeout, step.execute(&child))
                                .await
                                .map_err(|_| Error::StepTimeout {
                                    step: step.to_string(),
                                    timeout: step.timeout,
                                })??;
                        }
                    }
                    Ok(())
                }
                StepKind::Custom(body) => body.run(ctx).await,
            }
        }
        .boxed()
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(note) = self.note.as_deref().filter(|n| !n.trim().is_empty()) {
            return f.write_str(note);
        }
        match &self.kind {
            StepKind::Action(spec) => write!(f, "Action: {}", spec),
            StepKind::WaitFor {
                conditions, mode, ..
            } => match conditions.len() {
                1 => write!(f, "Wait for {:?}", conditions[0]),
                n => write!(f, "Wait for {} of {} conditions", mode, n),
            },
            StepKind::WaitTime(d) => write!(f, "Wait {:.2}s", d.as_secs_f64()),
            StepKind::Log(message) => write!(f, "Log: {}", message),
            StepKind::Group(steps) => write!(f, "Group ({} steps)", steps.len()),
            StepKind::Custom(body) => write!(f, "Custom: {}", body.name()),
        }
    }
}
