//! Queue server transport
//!
//! Four calls against the queue server (acquire, fetch, report, cancel).
//! Non-success responses are classified into [`ClientError`] kinds that carry
//! the server's backoff delay; connection failures and 5xx responses are
//! retried underneath by [`retry`] before they ever reach the caller.

pub mod error;
pub mod http;
pub mod models;
pub mod retry;
pub mod stream;

pub use error::{ClientError, NO_TASKS_STATUS, classify};
pub use http::HttpQueueClient;
pub use models::{DEMO_TASK_ID, DocumentReport, ErrorResult, PageResult, Task};
pub use retry::{CircuitBreaker, CircuitState, RetryPolicy, TransientFailure};
pub use stream::FileStream;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Operations the worker needs from the queue server
///
/// Every call except [`QueueClient::cancel_task`] takes the cycle's
/// cancellation token and returns [`ClientError::Cancelled`] once it fires.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Ask for the next image task
    async fn acquire_task(&self, cancel: &CancellationToken) -> Result<Task, ClientError>;

    /// Download the image belonging to a task
    async fn fetch_file(
        &self,
        cancel: &CancellationToken,
        task_id: &str,
    ) -> Result<FileStream, ClientError>;

    /// Send the result of a task; the worker identity is stamped in here
    async fn report_result(
        &self,
        cancel: &CancellationToken,
        task_id: &str,
        report: DocumentReport,
    ) -> Result<(), ClientError>;

    /// Tell the server a task was abandoned so it can be handed out again
    ///
    /// Not cancellable.
    async fn cancel_task(&self, task_id: &str) -> Result<(), ClientError>;
}
