//! Outbound port to the sync server. Replication and reconciliation talk to
//! the server exclusively through [RemoteStore], so tests can swap in a mock
//! and offline use simply never constructs one.

pub mod http;
pub mod identity;

use async_trait::async_trait;
use chrono::NaiveDate;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

use crate::storage::entities::{CurrentTaskDoc, DailyRecord, TasksConfig, TimerRunState};

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("ResponseError: status {status}: {message}")]
    Response { status: u16, message: String },
    #[error("ParsingError: {0}")]
    Parsing(String),
    #[error("TransportError: {0}")]
    Transport(String),
}

/// Per-user document store on the server. Fetches return `None` for documents
/// that were never written; puts overwrite whole documents, mirroring how the
/// local store treats its files.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    async fn fetch_tasks(&self, user: &str) -> Result<Option<TasksConfig>, RemoteError>;

    async fn put_tasks(&self, user: &str, config: &TasksConfig) -> Result<(), RemoteError>;

    async fn fetch_current_task(&self, user: &str) -> Result<Option<CurrentTaskDoc>, RemoteError>;

    async fn put_current_task(&self, user: &str, doc: &CurrentTaskDoc) -> Result<(), RemoteError>;

    async fn fetch_timer_state(&self, user: &str) -> Result<Option<TimerRunState>, RemoteError>;

    /// `None` clears the server-side document.
    async fn put_timer_state<'a>(
        &self,
        user: &str,
        state: Option<&'a TimerRunState>,
    ) -> Result<(), RemoteError>;

    async fn fetch_day(&self, user: &str, date: &str) -> Result<Option<DailyRecord>, RemoteError>;

    async fn put_day(&self, user: &str, day: &DailyRecord) -> Result<(), RemoteError>;

    /// Day keys with server-side batches inside the inclusive range.
    async fn recorded_dates(
        &self,
        user: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<String>, RemoteError>;
}
