use crate::domain::{FetchResult, RawEvent};
use async_trait::async_trait;

/// Source of raw sales events, polled once per cycle
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Issue one bounded request and return the page as a uniform event list
    async fn fetch(&self) -> FetchResult<Vec<RawEvent>>;
}
