//! Route synchronization daemon.
//!
//! Consumes a decoded route feed (JSON lines), canonicalizes ECMP path
//! sets, and publishes `ROUTE_TABLE` entries with full warm restart
//! support.

pub mod route;
pub mod sync;

pub use route::{
    canonical_route_entry, feed_to_change, FeedOp, FeedRecord, APP_NAME, APP_ROUTE_TABLE,
};
pub use sync::{FeedSource, RouteSyncd};
