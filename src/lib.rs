//! visitguard - adaptive per-IPv4 rate limiting and banning.
//!
//! Every request's client address is classified against a sparse
//! 4-level trie holding one signed byte per address: a visit count, a
//! temporary ban in minutes, or a permanent ban. A periodic sweep decays
//! counters and bans and frees arrays that drain to zero. Permanent bans
//! persist across restarts in a gzip ban list.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod metrics;
pub mod runtime;
pub mod security;
