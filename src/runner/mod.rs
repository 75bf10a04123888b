//! Background validation loops.
//!
//! A [`Runner`] calls a user function over and over on its own thread,
//! passing a step counter that starts at 0. The loop ends when
//! [`Runner::stop`] is requested or when the function fails; the first
//! failure is kept and handed back by [`Runner::stop`] / [`Runner::check`].
//!
//! Cancellation is cooperative: the stop flag is read before each call,
//! never during one.


use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::debug;
use tracing::error;

use crate::Result;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Error retained from a background function.
#[derive(Clone)]
pub struct TaskFailure {
    pub task: String,
    /// Step counter value of the failing call
    pub step: u64,
    source: Arc<dyn StdError + Send + Sync>,
}

impl TaskFailure {
    fn new(
        task: &str,
        step: u64,
        source: BoxError,
    ) -> Self {
        Self {
            task: task.to_string(),
            step,
            source: Arc::from(source),
        }
    }

    /// The error returned (or panic raised) by the user function.
    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.source
    }

    pub fn downcast_ref<T: StdError + 'static>(&self) -> Option<&T> {
        self.source.downcast_ref::<T>()
    }
}

impl fmt::Debug for TaskFailure {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("TaskFailure")
            .field("task", &self.task)
            .field("step", &self.step)
            .field("source", &self.source.to_string())
            .finish()
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "background task {} failed at step {}: {}",
            self.task, self.step, self.source
        )
    }
}

impl StdError for TaskFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.source)
    }
}

/// Raised by a panicking background function
#[derive(Debug)]
struct TaskPanicked(String);

impl fmt::Display for TaskPanicked {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "panicked: {}", self.0)
    }
}

impl StdError for TaskPanicked {}

#[derive(Default)]
struct Shared {
    stopped: AtomicBool,
    finished: AtomicBool,
    steps: AtomicU64,
    error: Mutex<Option<TaskFailure>>,
}

/// Handle to one background loop.
///
/// Dropping the handle without [`Runner::stop`] raises the stop flag but
/// does not wait for the thread.
pub struct Runner {
    name: String,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Runner {
    /// Starts `func` on a dedicated thread.
    pub fn spawn<F, E>(
        name: impl Into<String>,
        mut func: F,
    ) -> Result<Self>
    where
        F: FnMut(u64) -> std::result::Result<(), E> + Send + 'static,
        E: Into<BoxError>,
    {
        let name = name.into();
        let shared = Arc::new(Shared::default());

        let worker_shared = shared.clone();
        let worker_name = name.clone();
        let handle = thread::Builder::new()
            .name(format!("runner-{}", name))
            .spawn(move || {
                let mut step: u64 = 0;
                while !worker_shared.stopped.load(Ordering::SeqCst) {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| func(step)));
                    let failure: Option<BoxError> = match outcome {
                        Ok(Ok(())) => None,
                        Ok(Err(e)) => Some(e.into()),
                        Err(payload) => Some(Box::new(TaskPanicked(panic_message(payload)))),
                    };
                    if let Some(e) = failure {
                        error!("runner {} failed at step {}: {}", worker_name, step, e);
                        *worker_shared.error.lock() = Some(TaskFailure::new(&worker_name, step, e));
                        break;
                    }
                    step += 1;
                    worker_shared.steps.store(step, Ordering::SeqCst);
                }
                worker_shared.finished.store(true, Ordering::SeqCst);
                debug!("runner {} exited after {} steps", worker_name, step);
            })?;

        Ok(Self {
            name,
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Completed successful calls so far.
    pub fn steps(&self) -> u64 {
        self.shared.steps.load(Ordering::SeqCst)
    }

    /// False once the loop has exited, whether stopped or failed.
    pub fn is_running(&self) -> bool {
        !self.shared.finished.load(Ordering::SeqCst)
    }

    /// Signals the loop to end, waits for the in-flight call, and returns the
    /// retained failure if there is one.
    pub fn stop(&self) -> std::result::Result<(), TaskFailure> {
        self.shared.stopped.store(true, Ordering::SeqCst);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(payload) = handle.join() {
                let e: BoxError = Box::new(TaskPanicked(panic_message(payload)));
                let mut slot = self.shared.error.lock();
                if slot.is_none() {
                    *slot = Some(TaskFailure::new(&self.name, self.steps(), e));
                }
            }
        }
        self.check()
    }

    /// Returns the retained failure without stopping the loop.
    pub fn check(&self) -> std::result::Result<(), TaskFailure> {
        match self.shared.error.lock().as_ref() {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
    }
}

impl fmt::Debug for Runner {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Runner")
            .field("name", &self.name)
            .field("steps", &self.steps())
            .field("running", &self.is_running())
            .finish()
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
