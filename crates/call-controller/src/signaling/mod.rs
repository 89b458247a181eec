//! Client signaling over WebSocket.
//!
//! - [`events`] - tagged JSON wire format
//! - [`router`] - dispatch of client events to meeting actors
//! - [`server`] - axum WebSocket route

pub mod events;
pub mod router;
pub mod server;

pub use events::{ClientEvent, PresenceStatus, ServerEvent};
pub use router::{ClientSession, EventRouter};
pub use server::{signaling_router, SignalingState};
