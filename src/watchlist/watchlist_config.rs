use std::time::Duration;
use anyhow::bail;

#[derive(Debug, Clone)]
pub struct WatchlistConfig {
    /// Time to wait for a response (refresh or status) to a request sent on a physical stream.
    ///  Every part of a multi-part refresh restarts the timer.
    pub request_timeout: Duration,

    /// Time to wait for the acknowledgement of a post that requested one. If none arrives in time,
    ///  a negative acknowledgement is synthesized locally.
    pub post_ack_timeout: Duration,

    /// Maximum number of acknowledgement-requesting posts that are waiting for their ack. Posts
    ///  in excess of this are rejected rather than queued.
    pub max_outstanding_posts: usize,

    /// If set, a service's advertised open window limits the number of requests that are sent
    ///  but not yet answered. Requests in excess of it wait for earlier requests to complete.
    pub obey_open_window: bool,

    /// Physical stream ids are assigned locally, counting up from here. Lower ids are left for the
    ///  login and directory streams.
    pub initial_stream_id: i32,
}

impl WatchlistConfig {
    pub fn new() -> WatchlistConfig {
        WatchlistConfig {
            request_timeout: Duration::from_secs(15),
            post_ack_timeout: Duration::from_secs(15),
            max_outstanding_posts: 100_000,
            obey_open_window: true,
            initial_stream_id: 5,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.request_timeout.is_zero() {
            bail!("request timeout must be greater than zero");
        }
        if self.post_ack_timeout.is_zero() {
            bail!("post ack timeout must be greater than zero");
        }
        if self.max_outstanding_posts == 0 {
            bail!("max outstanding posts must be greater than zero");
        }
        if self.initial_stream_id <= 0 {
            bail!("initial stream id must be positive");
        }
        Ok(())
    }
}

impl Default for WatchlistConfig {
    fn default() -> Self {
        WatchlistConfig::new()
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(WatchlistConfig::new().validate().is_ok());
    }

    #[rstest]
    #[case::request_timeout(|c: &mut WatchlistConfig| c.request_timeout = Duration::ZERO)]
    #[case::post_ack_timeout(|c: &mut WatchlistConfig| c.post_ack_timeout = Duration::ZERO)]
    #[case::max_outstanding_posts(|c: &mut WatchlistConfig| c.max_outstanding_posts = 0)]
    #[case::initial_stream_id(|c: &mut WatchlistConfig| c.initial_stream_id = 0)]
    fn test_validate_rejects(#[case] modify: fn(&mut WatchlistConfig)) {
        let mut config = WatchlistConfig::new();
        modify(&mut config);
        assert!(config.validate().is_err());
    }
}
