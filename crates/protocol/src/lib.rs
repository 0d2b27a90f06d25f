//! Wire types for the sqlw session protocol.
//!
//! This crate contains the serde-serializable types exchanged between the
//! controller and an execution context. Every message crosses the boundary
//! as a JSON value, so the shapes here are the whole contract:
//!
//! - [`Command`]: controller to context, tagged by `action`
//! - [`Reply`]: successful outcome of a command, tagged by `type`
//! - [`ErrorPayload`]: typed failure of a command
//! - [`Event`]: unsolicited context notifications, tagged by `event`
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization and simple accessors
//! - **Lossless**: Binary payloads (snapshots, blob values) travel as base64
//! - **Ordered**: Result records keep the column order of the statement

pub mod command;
pub mod message;
pub mod snapshot;
pub mod value;

pub use command::*;
pub use message::*;
pub use snapshot::*;
pub use value::*;
