//! Mira: a guided beauty assistant backend.
//!
//! Turns are routed through resumable conversation flows by the
//! [`agent::Dispatcher`]. A front end in another process talks to the
//! backend over a pair of shared-memory queues ([`ipc`]) served by
//! [`service::BackendService`].

pub mod agent;
pub mod config;
pub mod conversation;
pub mod error;
pub mod flows;
pub mod ipc;
pub mod service;
pub mod store;
pub mod tools;
