//! Persistent-object store for a ColdC-style MUD runtime.
//!
//! This crate is the hard engineering nucleus of the runtime, not the
//! runtime itself: the object cache, the block-allocated object file, and
//! the buffer/identifier types they share. The parser, bytecode
//! interpreter, object model, network loop and native built-ins are all
//! external collaborators that talk to this crate only through
//! [`cache::Cache`] and [`db::Db`].

pub mod buffer;
pub mod cache;
pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod ident;
pub mod store;

pub use buffer::Buffer;
pub use cache::Cache;
pub use codec::ObjectBody;
pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use ident::{Ident, IdentTable};

/// Object number: the persistent primary key of an object.
pub type ObjNum = i64;

/// The empty object number, used by holder shells that carry no object.
pub const INV_OBJNUM: ObjNum = -1;
