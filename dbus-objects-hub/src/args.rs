use std::time::Duration;

/// Hub configuration
#[derive(Debug, Clone)]
pub struct Args {
    /// Reply timeout for calls made with the transport default timeout
    pub default_call_timeout: Duration,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            default_call_timeout: Duration::from_secs(25),
        }
    }
}
