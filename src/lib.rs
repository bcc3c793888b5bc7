//! `sack-over-udp`: a reliable, ordered text stream over UDP using selective
//! acknowledgements.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐   data{seq,id,payload}  ┌──────────┐
//!  │  Client  │────────────────────────▶│  Server  │
//!  │ (Sender) │◀────────────────────────│(Receiver │
//!  └────┬─────┘     ack{sacks,id}       │ per peer)│
//!       │                               └─────┬────┘
//!  ┌────▼──────┐                              │
//!  │ Simulator │  (optional loss / reorder)   │
//!  └────┬──────┘                              │
//!  ┌────▼─────────────────────────────────────▼────┐
//!  │       Socket (JSON datagrams over tokio UDP)  │
//!  └───────────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]     : wire format (`data` / `ack` / `fin` as JSON)
//! - [`sender`]     : outbound segment window and ack tracking
//! - [`receiver`]   : out-of-order buffering and in-order delivery
//! - [`state`]      : finite-state-machine types
//! - [`source`]     : the stream being sent, sliced by offset
//! - [`session`]    : per-peer receive sessions
//! - [`timer`]      : connection-wide ack deadline
//! - [`simulator`]  : optional lossy/reorder network layer for testing
//! - [`socket`]     : async UDP socket abstraction
//! - [`config`]     : process-level configuration
//! - [`client`]     : sending control loop and termination handshake
//! - [`server`]     : receiving control loop

pub mod client;
pub mod config;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod server;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod source;
pub mod state;
pub mod timer;

pub use client::{send_stream, Client, ClientError, TransferReport};
pub use packet::{Packet, SeqRange, MAX_PACKET_SIZE, MAX_PAYLOAD_SIZE};
pub use receiver::Receiver;
pub use sender::{AckOutcome, SendOutcome, Sender};
pub use server::{Server, ServerError};
