//! A transport for device-to-device (D2D) messaging between small devices connected by
//!  unreliable links (UART, USB, sockets, ...). It provides sessions, request / response
//!  correlation, acknowledgement with retry, one-hop relaying and broadcast on top of a link
//!  layer that can only send and receive raw frames.
//!
//! ## Design goals
//!
//! * Every device has an 8-bit id. Ids are unique within a network of devices, `0xFF` is
//!   the broadcast address
//! * Application code talks through *sessions*: a session is opened towards a destination
//!    device, and its id doubles as the packet id of everything sent through it. Responses and
//!    acks carry the packet id back, which is how they are correlated with the request
//! * Devices relay packets that are not addressed to them, so a device can talk to devices it
//!    has no direct link to. Relaying is dumb: no routing protocol, the link layer's peer table
//!    decides the port
//! * Requests addressed to a device are executed by a registered handler on a bounded pool of
//!    workers, so a slow handler does not block reception
//! * Payloads can be encrypted (AES-256-GCM). Headers always travel in clear so relaying
//!    devices need no keys
//!
//! ## Frame format
//!
//! ```ascii
//! 0: source device id (u8)
//! 1: destination device id (u8), 0xFF for broadcast
//! 2: packet id (u8)
//! 3: info (u8):
//!    * bit 7-6: packet type (00 request, 01 response, 10 ack)
//!    * bit 5:   need ack
//!    * bit 4:   need response
//!    * bit 3-2: priority
//!    * bit 1-0: reserved
//! 4: payload (optional), transformed by the security codec
//! ```
//!
//! The header is exactly four bytes, frames shorter than that are dropped. Framing on the
//!  physical line (delimiters, checksums) is the link layer's business.
//!
//! ## Acknowledgement and retry
//!
//! A packet with `need ack` is acknowledged by its final destination with an ack packet
//!  (same packet id, source and destination swapped, no payload). The sender waits for the ack
//!  and re-sends the packet if it does not arrive in time, up to a configured total number of
//!  attempts. Acks are never acknowledged, and broadcasts can neither ask for acks nor for
//!  responses.
//!
//! A link going down fails all pending waits on the device immediately.

pub mod config;
pub mod error;
pub mod device_id;
pub mod pbuf;
pub mod packet_header;
pub mod packet;
pub mod security;
pub mod codec;
pub mod correlation;
pub mod session;
pub mod link;
pub mod send_path;
pub mod request_exec;
pub mod dispatcher;
pub mod transport;

pub use transport::D2dTransport;
