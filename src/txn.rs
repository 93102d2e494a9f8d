//! Module `txn` is the transaction engine (component J): queues of
//! `{action, rollback}` steps run sequentially or concurrently, with
//! rollback-on-failure and rollback-failure attachment (§4.J).

use std::thread;

use crate::error::{Error, Result};

/// One durable step: `action` performs the write, `rollback` restores
/// the prior byte content (or releases allocated space) if a later step
/// in the same transaction fails. Borrows the caller's mutable state for
/// the duration of the transaction via the `'a` lifetime, so steps run
/// on scoped threads in [run_parallel] rather than `'static` ones.
pub struct Step<'a> {
    pub action: Box<dyn FnOnce() -> Result<()> + Send + 'a>,
    pub rollback: Box<dyn FnOnce() -> Result<()> + Send + 'a>,
}

impl<'a> Step<'a> {
    pub fn new<A, R>(action: A, rollback: R) -> Step<'a>
    where
        A: FnOnce() -> Result<()> + Send + 'a,
        R: FnOnce() -> Result<()> + Send + 'a,
    {
        Step {
            action: Box::new(action),
            rollback: Box::new(rollback),
        }
    }
}

type Rollback<'a> = Box<dyn FnOnce() -> Result<()> + Send + 'a>;

fn rollback_all(rollbacks: Vec<Rollback<'_>>, original: Error) -> Error {
    let mut err = original;
    for rollback in rollbacks.into_iter().rev() {
        if let Err(rollback_err) = rollback() {
            err = err.with_rollback_failure(rollback_err);
        }
    }
    err
}

/// Run steps in order. On the first failure, invoke the rollbacks of
/// every step that had already succeeded, most-recent first.
pub fn run_sequential(steps: Vec<Step<'_>>) -> Result<()> {
    let mut completed: Vec<Rollback<'_>> = Vec::with_capacity(steps.len());
    for step in steps {
        match (step.action)() {
            Ok(()) => completed.push(step.rollback),
            Err(original) => return Err(rollback_all(completed, original)),
        }
    }
    Ok(())
}

/// Fire all steps concurrently on scoped threads. On any failure, roll
/// back only the steps that completed successfully; the first failure
/// encountered (in step order) is the error the rollback is attached to.
pub fn run_parallel(steps: Vec<Step<'_>>) -> Result<()> {
    let outcomes: Vec<std::result::Result<Rollback<'_>, Error>> = thread::scope(|scope| {
        let handles: Vec<_> = steps
            .into_iter()
            .map(|step| {
                scope.spawn(move || match (step.action)() {
                    Ok(()) => Ok(step.rollback),
                    Err(e) => Err(e),
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|_| Err(Error::ThreadFail("transaction step panicked".into()))))
            .collect()
    });

    let mut first_error = None;
    let mut completed = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        match outcome {
            Ok(rollback) => completed.push(rollback),
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    match first_error {
        Some(original) => Err(rollback_all(completed, original)),
        None => Ok(()),
    }
}

#[cfg(test)]
#[path = "txn_test.rs"]
mod txn_test;
