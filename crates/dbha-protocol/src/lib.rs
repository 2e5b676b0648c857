//! dbha-protocol — the private detector → controller wire protocol.
//!
//! Persistent TCP, one ASCII-framed report at a time, acknowledged with
//! a literal `OK`. See [`frame`] for the grammar.

pub mod client;
pub mod error;
pub mod frame;
pub mod server;

pub use client::ReportClient;
pub use error::FrameError;
pub use frame::{ACK, DecodeState, Frame, FrameDecoder, HEADER, MAX_BODY_LEN, encode_frame};
pub use server::{ConnectionStats, Inbound, handle_connection, serve};
