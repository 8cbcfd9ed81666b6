//! Devhub backend: cached community profiles, comments and taxonomy with
//! real-time notification fan-out.
//!
//! The crate is layered bottom-up: `domain` holds the records, `cache` the
//! key/value store and consistency machinery, `application` the services and
//! job queues, `gateway` the websocket fan-out, and `infra` the HTTP surface
//! plus the in-memory primary store.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod infra;
pub(crate) mod util;
