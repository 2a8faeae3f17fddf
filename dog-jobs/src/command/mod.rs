//! Multi-step state transitions
//!
//! A command is an ordered list of main steps plus a list of always-run
//! steps. Main steps run in order until one fails or asks to finish early.
//! Always-run steps then run regardless, so cleanup such as releasing the
//! worker or persisting a failure happens even after a failed step. A step
//! error is captured on the result instead of unwinding the caller.

mod retry_job;
mod run_job;
mod start_worker;
mod stop_worker;

pub use retry_job::RetryJob;
pub use run_job::RunJob;
pub use start_worker::StartWorker;
pub use stop_worker::StopWorker;

use futures::future::BoxFuture;
use tracing::{debug, warn, Instrument};

use crate::{CommandFailure, QueueResult};

/// What to do after a main step succeeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepFlow {
    Continue,
    /// Skip the remaining main steps
    Finish,
}

pub type StepFn<C> = for<'a> fn(&'a mut C) -> BoxFuture<'a, QueueResult<StepFlow>>;

/// A named step of command `C`
pub struct Step<C> {
    pub name: &'static str,
    pub run: StepFn<C>,
}

impl<C> Step<C> {
    pub const fn new(name: &'static str, run: StepFn<C>) -> Self {
        Self { name, run }
    }
}

pub trait Command: Send + Sized {
    const NAME: &'static str;

    /// Checked before any step runs
    fn validate(&self) -> QueueResult<()> {
        Ok(())
    }

    fn steps() -> Vec<Step<Self>>;

    fn always() -> Vec<Step<Self>> {
        Vec::new()
    }
}

/// A command after execution, with the first captured step failure
#[derive(Debug)]
pub struct Executed<C> {
    pub command: C,
    pub failure: Option<CommandFailure>,
}

impl<C> Executed<C> {
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    pub fn error_message(&self) -> Option<String> {
        self.failure.as_ref().map(CommandFailure::error_message)
    }

    pub fn error_stack(&self) -> Option<String> {
        self.failure.as_ref().map(CommandFailure::error_stack)
    }

    pub fn into_result(self) -> QueueResult<C> {
        match self.failure {
            Some(failure) => Err(failure.into()),
            None => Ok(self.command),
        }
    }
}

/// Execute a command, re-raising a captured failure
pub async fn run<C: Command>(command: C) -> QueueResult<C> {
    execute(command).await.into_result()
}

/// Execute a command and hand back any failure instead of raising it
pub async fn run_allowing_failure<C: Command>(command: C) -> Executed<C> {
    execute(command).await
}

async fn execute<C: Command>(mut command: C) -> Executed<C> {
    let span = tracing::debug_span!("command", command = C::NAME);

    async move {
        if let Err(error) = command.validate() {
            warn!(error = %error, "Command arguments rejected");
            return Executed {
                command,
                failure: Some(CommandFailure {
                    command: C::NAME,
                    step: "validate",
                    error,
                }),
            };
        }

        let mut failure = None;

        for step in C::steps() {
            match (step.run)(&mut command).await {
                Ok(StepFlow::Continue) => {}
                Ok(StepFlow::Finish) => {
                    debug!(step = step.name, "Command finished early");
                    break;
                }
                Err(error) => {
                    warn!(step = step.name, error = %error, "Command step failed");
                    failure = Some(CommandFailure {
                        command: C::NAME,
                        step: step.name,
                        error,
                    });
                    break;
                }
            }
        }

        for step in C::always() {
            if let Err(error) = (step.run)(&mut command).await {
                warn!(step = step.name, error = %error, "Command cleanup step failed");
                failure.get_or_insert(CommandFailure {
                    command: C::NAME,
                    step: step.name,
                    error,
                });
            }
        }

        Executed { command, failure }
    }
    .instrument(span)
    .await
}
