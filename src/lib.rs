//! photo-preload: adaptive decoded-image cache and preloading engine.
//!
//! Keeps a byte-bounded set of decoded images resident while the user
//! pages through a photo collection, prefetching ahead of navigation and
//! backing off as memory pressure rises or paging speeds up:
//!   navigation → manager → cache (hit) / decode (miss)
//!                       ↘ scheduler → workers → cache
//!
//! Exposes a small HTTP API so a separate UI process can drive it.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod decode;
pub mod manager;
pub mod monitor;
pub mod preload;
pub mod server;
