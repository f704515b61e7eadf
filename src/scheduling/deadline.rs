// Bounded external calls
//
// Every store, cache and rate lookup made by the engines goes through
// `CallTimeout::run`. A call that exceeds the bound fails with
// `SchedulingError::Timeout`; the pending future is dropped, which rolls back
// any open transaction.

use std::future::Future;
use std::time::Duration;

use crate::scheduling::error::{SchedulingError, SchedulingResult};

/// Default bound for a single external call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeout(Duration);

impl CallTimeout {
    pub fn new(limit: Duration) -> Self {
        Self(limit)
    }

    pub fn limit(&self) -> Duration {
        self.0
    }

    /// Await `call`, failing with `Timeout { operation }` past the bound
    pub async fn run<T, E, F>(&self, operation: &'static str, call: F) -> SchedulingResult<T>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<SchedulingError>,
    {
        match tokio::time::timeout(self.0, call).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => {
                tracing::warn!("{} exceeded {}ms", operation, self.0.as_millis());
                Err(SchedulingError::Timeout { operation })
            }
        }
    }
}

impl Default for CallTimeout {
    fn default() -> Self {
        Self(DEFAULT_CALL_TIMEOUT)
    }
}
