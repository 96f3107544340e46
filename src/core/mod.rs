//! Core DHT logic - pure computation with no direct I/O.
//!
//! Lookup bookkeeping (`lookup_manager`, `closest_contacts`), sanity checks on
//! returned contacts (`scrubber`) and replication decisions (`store_forward`).
//! Sending and receiving lives in `rpc/`, which calls into this module.

pub(crate) mod closest_contacts;
pub(crate) mod lookup_manager;
pub(crate) mod scrubber;
pub(crate) mod store_forward;
