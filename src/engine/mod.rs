mod availability;
mod calendar;
mod conflict;
mod error;
mod lifecycle;
mod reconcile;

pub use calendar::current_month;
pub use error::EngineError;
pub use reconcile::{CalendarSubmission, ReconcileReport};

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::observability;
use crate::store::PersistenceStore;

/// Availability, calendar, and reservation logic over a persistence store.
///
/// Holds no locks of its own: every decision reads the store, and the store's
/// overlap constraint is what keeps concurrent writers honest.
pub struct Engine {
    store: Arc<dyn PersistenceStore>,
}

impl Engine {
    pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn PersistenceStore> {
        &self.store
    }
}

/// Run `fut` as engine operation `op`, recording outcome and latency.
async fn instrumented<T, F>(op: &'static str, fut: F) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    let start = Instant::now();
    let result = fut.await;
    observability::record_operation(op, start, &result);
    if let Err(e) = &result {
        debug!(op, error = %e, "operation failed");
    }
    result
}
