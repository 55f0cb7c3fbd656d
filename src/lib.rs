pub mod bucket;
pub mod clock;
pub mod config;
pub mod config_validator;
pub mod error;
pub mod headers;
pub mod metrics;
pub mod query;
pub mod ratelimiter;
pub mod replay;
pub mod request;
pub mod route;
pub mod timer;

pub use bucket::{Bucket, BucketId, BucketState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RatelimitConfig;
pub use error::{QueryError, RatelimitError, RatelimitResult};
pub use ratelimiter::Ratelimiter;
pub use request::{PendingRequest, Request, RequestId, Requestor};
pub use route::{Method, Route, RouteKey};
