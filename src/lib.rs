//! The rendezvous core: nameplates, mailboxes, and the persisted,
//! two-sided state machines that back Magic Wormhole's introduction
//! protocol. See `rendezvous::Rendezvous` for the entry point.

pub mod app_namespace;
pub mod config;
pub mod error;
pub mod helpers;
pub mod mailbox;
pub mod message;
pub mod rendezvous;
pub mod store;
