//! Link configuration.

/// Retry and deadline policy applied at the link boundary.
///
/// Subscription setup retries transient backend failures a bounded number
/// of times; ticket flushes run under a deadline. Neither path is allowed
/// to hang indefinitely on a stalled backend.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// How many times to retry a transient subscription failure.
    pub subscribe_retries: u32,
    /// Linear backoff between retries (ms).
    pub retry_backoff_ms: u64,
    /// Deadline for one `process_tickets` call (ms).
    pub flush_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            subscribe_retries: 3,
            retry_backoff_ms: 25,
            flush_timeout_ms: 30_000,
        }
    }
}
