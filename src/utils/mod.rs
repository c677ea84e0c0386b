//! Utility modules supporting the query engines.
//!
//! - [`Transport`]: async HTTP seam; [`HttpTransport`] is the reqwest implementation
//!   with built-in rate limiting and retries
//! - [`RetryConfig`] / [`with_retry`]: exponential backoff on transient errors
//! - [`QuotaStore`]: remaining-request bookkeeping per service
//! - [`ResultCountCache`]: cached total hit counts per search term
//!
//! # Retry
//!
//! ```rust,no_run
//! use research_federation::utils::{with_retry, RetryConfig};
//! use research_federation::sources::SourceError;
//!
//! # async fn example() -> Result<(), SourceError> {
//! let body: String = with_retry(RetryConfig::default(), || async {
//!     Ok::<_, SourceError>("response".to_string())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod http;
mod retry;

pub use cache::{
    FileQuotaStore, FileResultCountCache, MemoryQuotaStore, MemoryResultCountCache, QuotaStore,
    ResultCountCache,
};
pub use http::{HttpTransport, Transport, TransportResponse};
pub use retry::{with_retry, RetryConfig, TransientError};
