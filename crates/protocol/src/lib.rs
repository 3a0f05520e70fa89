//! Wire types for the mdrive session protocol.
//!
//! This crate contains the serde-serializable types exchanged with clients
//! over the JSON wire protocol: the desired-capability object sent with a
//! new-session request and the response envelope every endpoint returns.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization and a few
//!   string conversions
//! * 1:1 with protocol: Key names match the JSON wire-protocol family
//! * Stable: Changes only when the wire protocol changes
//!
//! Negotiation, reservation and lifecycle logic live in `mdrive-core`.

pub mod capabilities;
pub mod response;

pub use capabilities::*;
pub use response::*;
