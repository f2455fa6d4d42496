pub mod domain;
pub mod elasticsearch;
pub mod telemetry;

pub use domain::*;
pub use elasticsearch::*;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockFeedSource;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockPurchaseStore;
