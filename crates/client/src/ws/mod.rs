//! Broker transport.
//!
//! ```text
//!   Connector (socket)  ->  Session (STOMP, routing)  ->  handlers
//!                                 |
//!                       SubscriptionRegistry
//! ```
//!
//! Components subscribe through the [`Session`]; the registry guarantees one
//! live subscription per destination.

mod connection;
mod registry;
mod session;

pub use connection::{ConnectionState, Connector, Link, WsConnector};
pub use registry::{Cancel, SubscriptionCategory, SubscriptionRegistry};
pub use session::{Connection, Handler, Session, SubscriptionHandle};
