#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

// Public modules
mod common;
mod core;
mod error;

#[cfg(feature = "async")]
pub mod async_dht;
mod dht;
pub mod rpc;

pub use crate::common::{
    lock_database, BucketRouteTable, Contact, ContactState, Database, DhtValue,
    InMemoryDatabase, Kuid, Message, MessageId, MessageType, RequestKind, RequestSpecific,
    ResponseSpecific, RouteTable, SecurityToken, SelectMode, SharedDatabase, StoreStatus,
    StoreStatusCode,
};
pub use crate::rpc::{Config, DhtFuture, Rpc};
pub use bytes::Bytes;
pub use dht::{Dht, DhtBuilder, Testnet};
pub use error::{Error, RequestTimeout, Result};
