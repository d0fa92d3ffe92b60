#![forbid(unsafe_code, clippy::unwrap_used)]
#![allow(clippy::needless_return)]
#![warn(clippy::await_holding_lock, clippy::inefficient_to_string)]

pub mod connection;
pub mod error;
pub mod params;
pub mod rows;

pub use rusqlite::types::Value;

pub use connection::Connection;
pub use error::Error;
pub use params::{NamedParams, Params, ToSqlType};
pub use rows::{Row, Rows};
