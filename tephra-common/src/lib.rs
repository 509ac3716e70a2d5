//! Shared plumbing for Tephra services.
//!
//! This crate holds the pieces every Tephra service needs but none owns:
//! a mockable clock, the per-request context carrying tenant identity, and
//! object-store configuration.

pub mod clock;
pub mod context;
pub mod objstore;

pub use clock::{Clock, MockClock, SystemClock};
pub use context::RequestContext;
pub use objstore::{AwsConfig, LocalConfig, ObjectStoreConfig, create_object_store};
