#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

//! A blocking MongoDB driver core: connection-string parsing, server discovery and monitoring
//! (SDAM), server selection, the wire protocol, authentication, and CRUD/aggregation/bulk-write
//! dispatch with retry, built on `std::net`/`std::thread` rather than an async runtime.
//!
//! The entry point is [`Client`]; [`Client::with_uri_str`] parses a connection string and starts
//! topology monitoring. [`Client::database`]/[`Client::collection`] (or
//! [`Database::collection`]) produce value-object handles for issuing operations.

pub use ::bson;

mod bulk_write;
mod client;
mod cmap;
mod coll;
mod compression;
pub mod concern;
mod cursor;
mod db;
pub mod error;
mod hello;
mod operation;
pub mod options;
pub mod read_preference;
pub mod results;
mod sdam;
mod srv;

pub use crate::{
    bulk_write::WriteModel,
    client::Client,
    coll::{Collection, FindOptions},
    cursor::Cursor,
    db::Database,
    sdam::{ServerStatus, TopologyStatus},
};
