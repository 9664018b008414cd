use std::time::Duration;

use env_flags::env_flags;

env_flags! {
    pub STUDIO_API_BASE: &str = "http://localhost:8100";
    pub STUDIO_REQUEST_MAX_RETRIES: u64 = 2;

    /// Unset means a run stream may stay silent indefinitely; long agent
    /// steps routinely go quiet for minutes.
    pub STUDIO_STREAM_IDLE_TIMEOUT_MS: Option<Duration> = None, |value| {
        value.parse::<u64>().map(|ms| Some(Duration::from_millis(ms)))
    };
}
