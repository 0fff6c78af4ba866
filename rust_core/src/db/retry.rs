//! Database retry logic for transient failures
//!
//! Provides automatic retry with exponential backoff for database operations.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// SQLSTATE codes worth retrying: serialization failure, deadlock,
/// too many connections, admin shutdown.
const RETRIABLE_SQLSTATES: &[&str] = &["40001", "40P01", "53300", "57P01"];

/// SQLSTATE class 08: connection exception.
const CONNECTION_EXCEPTION_CLASS: &str = "08";

/// Execute a database operation with automatic retry on transient failures
///
/// # Example
/// ```ignore
/// use mirrorx_core::db::retry::execute_with_retry;
///
/// let time = execute_with_retry(
///     || async {
///         Ok(sqlx::query_scalar("INSERT INTO ticks ... RETURNING time")
///             .bind(symbol)
///             .fetch_one(&pool)
///             .await?)
///     },
///     3 // max attempts
/// ).await?;
/// ```
pub async fn execute_with_retry<F, Fut, T>(f: F, max_attempts: u32) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    execute_with_retry_custom(f, max_attempts, 100, 5_000).await
}

/// Execute with retry and custom backoff configuration
pub async fn execute_with_retry_custom<F, Fut, T>(
    mut f: F,
    max_attempts: u32,
    base_backoff_ms: u64,
    max_backoff_ms: u64,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < max_attempts && is_retriable_error(&e) => {
                let backoff_ms = base_backoff_ms
                    .saturating_mul(2_u64.saturating_pow(attempt - 1))
                    .min(max_backoff_ms);
                warn!(
                    "Database operation failed (attempt {}/{}): {:#}. Retrying in {}ms",
                    attempt, max_attempts, e, backoff_ms
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Check if a database error is retriable
pub fn is_retriable_error(e: &anyhow::Error) -> bool {
    for cause in e.chain() {
        if cause.is::<tokio::time::error::Elapsed>() {
            return true;
        }
        if let Some(db_err) = cause.downcast_ref::<sqlx::Error>() {
            return match db_err {
                sqlx::Error::Io(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed => true,
                sqlx::Error::Database(d) => d
                    .code()
                    .map(|code| is_retriable_sqlstate(&code))
                    .unwrap_or(false),
                _ => false,
            };
        }
    }

    let err_str = format!("{:#}", e).to_lowercase();

    // Connection-related errors that are likely transient
    err_str.contains("connection")
        || err_str.contains("timeout")
        || err_str.contains("timed out")
        || err_str.contains("broken pipe")
        // PostgreSQL specific transient errors
        || err_str.contains("could not serialize")
        || err_str.contains("deadlock detected")
        || err_str.contains("too many clients")
        || err_str.contains("ssl error")
        || err_str.contains("network error")
}

fn is_retriable_sqlstate(code: &str) -> bool {
    code.starts_with(CONNECTION_EXCEPTION_CLASS) || RETRIABLE_SQLSTATES.contains(&code)
}
