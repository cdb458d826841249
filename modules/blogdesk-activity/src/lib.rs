//! Append-only activity log.
//!
//! The task runner appends a record for each meaningful step of its work;
//! observers read them back newest-first. Records are never updated. The
//! only deletion path is explicit age-based clearing.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

use std::sync::Arc;

use blogdesk_common::Config;
use tracing::warn;

pub use error::{ActivityLogError, Result};
pub use memory::MemoryActivityLog;
pub use postgres::PgActivityLog;
pub use store::ActivityLogStore;

/// Postgres when `DATABASE_URL` is set, otherwise an in-memory log.
pub async fn open_store(config: &Config) -> Result<Arc<dyn ActivityLogStore>> {
    match &config.database_url {
        Some(url) => Ok(Arc::new(PgActivityLog::connect(url).await?)),
        None => {
            warn!("DATABASE_URL not set, activity log is in-memory and will not survive restarts");
            Ok(Arc::new(MemoryActivityLog::new()))
        }
    }
}
