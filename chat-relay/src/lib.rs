//! # chat-relay
//!
//! Prekey bundle store and realtime signaling relay for SecureChat.
//!
//! This crate implements a server that:
//! - Stores signed prekeys and one-time prekeys per device
//! - Serves X3DH bundles, handing out each one-time key at most once
//! - Relays opaque signaling envelopes between connected identities
//! - Keeps one latest encrypted backup blob per user
//! - Never sees plaintext or private key material
//!
//! ## Architecture
//!
//! ```text
//! Device A ──┐                          ┌── Device B
//!            │   WebSocket /ws          │
//!            ├─────────────────────────►│
//!            │   HTTP /prekeys/*        │
//!        ┌───┴──────────────────────────┴───┐
//!        │            chat-relay            │
//!        │  ┌────────────────────────────┐  │
//!        │  │ ConnectionRegistry (mem)   │  │
//!        │  ├────────────────────────────┤  │
//!        │  │ SQLite (prekeys, backups)  │  │
//!        │  └────────────────────────────┘  │
//!        └──────────────────────────────────┘
//! ```
//!
//! ## Relay protocol
//!
//! Text frames carry `{to, from, type, payload}` JSON. The relay overwrites
//! `from` with the authenticated sender and forwards to the live connection
//! registered for `to`. Anything it cannot deliver is dropped silently; there
//! is no acknowledgement or error frame.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod http;
pub mod limits;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod storage;
