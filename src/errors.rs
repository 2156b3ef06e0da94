use thiserror::Error;

/// Classification of a failure at a port boundary, per the error-handling
/// design: callers branch on kind to decide retry / drop-silently / fatal
/// shutdown rather than matching on concrete error types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ErrorKind {
    #[error("transient network error: {0}")]
    NetworkTransient(String),

    #[error("rate-limited, cooldown {cooldown_ms}ms: {message}")]
    NetworkBlocked { message: String, cooldown_ms: u64 },

    #[error("parser confidence below threshold: {0}")]
    ParseReject(String),

    #[error("insufficient liquidity: {0}")]
    InsufficientLiquidity(String),

    #[error("risk manager rejected trade: {0}")]
    RiskReject(String),

    #[error("order venue rejected order: {0}")]
    OrderRejected(String),

    #[error("fatal error: {0}")]
    Fatal(String),
}

impl ErrorKind {
    /// True for kinds the caller should log-and-continue without dropping
    /// any in-flight work (the loop itself just retries next cycle).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::NetworkTransient(_))
    }

    /// True for kinds that should trigger the process-wide shutdown path.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::Fatal(_))
    }

    pub fn from_http_status(status: u16, body: impl Into<String>, cooldown_ms: u64) -> Self {
        let body = body.into();
        if status == 429 {
            ErrorKind::NetworkBlocked {
                message: body,
                cooldown_ms,
            }
        } else if (500..600).contains(&status) {
            ErrorKind::NetworkTransient(body)
        } else {
            ErrorKind::OrderRejected(body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable() {
        assert!(ErrorKind::NetworkTransient("timeout".into()).is_retryable());
        assert!(!ErrorKind::Fatal("panic".into()).is_retryable());
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            ErrorKind::from_http_status(503, "down", 60_000),
            ErrorKind::NetworkTransient(_)
        ));
        assert!(matches!(
            ErrorKind::from_http_status(429, "slow down", 90_000),
            ErrorKind::NetworkBlocked { .. }
        ));
        assert!(matches!(
            ErrorKind::from_http_status(400, "bad", 60_000),
            ErrorKind::OrderRejected(_)
        ));
    }

    #[test]
    fn rate_limit_cooldown_is_threaded_through() {
        match ErrorKind::from_http_status(429, "slow down", 90_000) {
            ErrorKind::NetworkBlocked { cooldown_ms, .. } => assert_eq!(cooldown_ms, 90_000),
            other => panic!("expected NetworkBlocked, got {:?}", other),
        }
    }
}
