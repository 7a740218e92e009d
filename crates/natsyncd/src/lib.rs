//! Static NAT synchronization daemon.
//!
//! Watches the `STATIC_NAT` config table, publishes `NAT_TABLE` app
//! entries, and expands each into its SNAT / DNAT / DNAT-pool dataplane
//! entries, with full warm restart support.

pub mod nat;
pub mod sync;

pub use nat::{NatEntry, APP_NAME, APP_NAT_TABLE, CFG_STATIC_NAT_TABLE, DATAPLANE_NAT_TABLE};
pub use sync::{ConfigNatSource, DataplanePublisher, NatSyncd};
