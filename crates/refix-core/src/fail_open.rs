//! Fail-open helper for infrastructure side effects
//!
//! Telemetry writes must never change the outcome of a run. Wrap them with
//! [`fail_open`] so a broken log file shows up as a warning instead.
//!
//! DO NOT use fail-open for collaborator calls (analysis, correction,
//! validation); their failures drive the state machine.

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Await an operation, logging and discarding its error
///
/// Returns `None` when the operation failed.
///
/// ```no_run
/// use refix_core::fail_open::fail_open;
/// use refix_core::Result;
///
/// async fn append_record() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let written = fail_open("telemetry::append", append_record()).await;
///     assert!(written.is_some());
/// }
/// ```
pub async fn fail_open<Fut, T>(operation_name: &str, fut: Fut) -> Option<T>
where
    Fut: Future<Output = Result<T>>,
{
    match fut.await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RefixError;

    #[tokio::test]
    async fn test_fail_open_success() {
        let result = fail_open("test_op", async { Ok::<_, RefixError>(42) }).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn test_fail_open_failure() {
        let result = fail_open("test_op", async {
            Err::<i32, _>(RefixError::Telemetry("disk full".to_string()))
        })
        .await;
        assert_eq!(result, None);
    }
}
