//! Call Controller Library
//!
//! Coordinates group calls for meetings: a host rings a set of invitees,
//! each invitee accepts or declines within a fixed window, and everyone who
//! joins gets a media session (transports, producers, consumers) in the
//! meeting's media room.
//!
//! # Architecture
//!
//! ```text
//! WebSocket ──► EventRouter ──► CallControllerActor ──► MeetingActor (per meeting)
//!                                                      ├── CallInvitation + timer
//!                                                      └── MediaRoom ──► MediaEngine
//! MeetingActor ──► PresenceDirectory ──► client outbound queues
//! ```
//!
//! # Modules
//!
//! - [`actors`] - controller and per-meeting actors
//! - [`api`] - HTTP meeting API
//! - [`config`] - service configuration from environment
//! - [`errors`] - error type with client-safe codes
//! - [`invitation`] - invitation state machine
//! - [`media`] - media engine seam and media rooms
//! - [`observability`] - metrics and health endpoints
//! - [`presence`] - identity to connection directory
//! - [`routes`] - combined Axum router
//! - [`signaling`] - wire format, event router, WebSocket server
//! - [`store`] - session store seam and in-memory store

pub mod actors;
pub mod api;
pub mod config;
pub mod errors;
pub mod invitation;
pub mod media;
pub mod observability;
pub mod presence;
pub mod routes;
pub mod signaling;
pub mod store;
