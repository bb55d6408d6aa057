//! tlstream - TLS over borrowed sockets
//!
//! This crate wraps an already-connected blocking byte stream in a TLS client
//! session: handshake, record encryption and decryption, and orderly close,
//! with the socket itself left to the caller.

pub mod net;
pub mod tls;
