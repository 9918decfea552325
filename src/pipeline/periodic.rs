//! Shared driver for the fixed-period loops.
use crate::error::{LoggerError, LoggerResult};
use crate::shutdown::ShutdownSignal;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tracing::{error, info};

/// Run `cycle` every `interval` until `shutdown` fires.
///
/// The first cycle runs after one full interval. A failed or panicking cycle
/// is logged and followed by `cooldown` before the normal period resumes.
pub(crate) async fn run_periodic<F>(
    task: &'static str,
    interval: Duration,
    cooldown: Duration,
    shutdown: &ShutdownSignal,
    mut cycle: F,
) where
    F: FnMut() -> LoggerResult<()>,
{
    info!(task, ?interval, "Periodic task started");
    loop {
        if shutdown.sleep(interval).await {
            break;
        }
        let result = catch_unwind(AssertUnwindSafe(&mut cycle))
            .unwrap_or_else(|panic| Err(LoggerError::CycleFailed(panic_message(panic.as_ref()))));
        let failed = match result {
            Ok(()) => false,
            Err(e) => {
                error!(
                    task,
                    error = %e,
                    recoverable = e.is_recoverable(),
                    ?cooldown,
                    "Problem in periodic task"
                );
                true
            }
        };
        if failed && shutdown.sleep(cooldown).await {
            break;
        }
    }
    info!(task, "Periodic task stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
