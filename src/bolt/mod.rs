//! # Bolt Protocol Boundary
//!
//! Protocol-facing types shared by the connection pool and the routing layer.
//!
//! ## Overview
//!
//! The pool and the routing layer never touch the wire format. They only need to:
//!
//! - **Compare protocol versions** - minimum version floors, re-authentication support
//! - **Emit a few requests** - RESET (liveness), LOGOFF/LOGON (re-auth), ROUTE (rediscovery)
//! - **Pass the rest through** - BEGIN, RUN, PULL, ... forwarded unchanged
//! - **Classify replies** - summaries, records and failures delivered by a flush
//!
//! ## Submodules
//!
//! - [`version`] - Negotiated protocol version and feature checks
//! - [`value`] - Minimal value model for parameters and metadata
//! - [`message`] - Request messages
//! - [`response`] - Replies and the response handler trait
//!
//! ## Note
//!
//! Framing, PackStream encoding and the handshake belong to the
//! [`crate::driver::ConnectionFactory`] implementation.

pub mod message;
pub mod response;
pub mod value;
pub mod version;

pub use message::{AccessMode, AuthToken, Message, TransactionParams};
pub use response::{CollectingHandler, Response, ResponseHandler, RouteSummary, Summary};
pub use value::Value;
pub use version::BoltVersion;
