//! Value types and collaborator contracts shared by every layer.

mod contact;
mod database;
mod kuid;
mod max_stack;
mod messages;
mod routing_table;

pub use contact::*;
pub use database::*;
pub use kuid::*;
pub use max_stack::*;
pub use messages::*;
pub use routing_table::*;
