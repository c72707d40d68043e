//! Server-owned UI trees replicated to thin remote clients.
//!
//! The server side ([`server`]) runs each session's tree on a cooperative
//! [`scheduler`], captures every mutation as an ordered render event
//! ([`collector`]) and answers each client request with the events produced
//! since the last one. The client side ([`client`]) replays those events
//! onto a shadow tree and long-polls for more.

pub mod client;
pub mod collector;
pub mod config;
pub mod demo;
pub mod logging;
pub mod protocol;
pub mod scheduler;
pub mod server;
pub mod tree;
