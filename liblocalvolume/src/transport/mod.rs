//! QUIC transport layer.
//!
//! [`CsiServer`](server::CsiServer) exchanges [`CsiMessage`](crate::CsiMessage)
//! values over QUIC bi-directional streams using `quinn`.

pub mod server;
