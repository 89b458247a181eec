//! Observability for the Call Controller.
//!
//! Logging uses `tracing` with per-component targets (`cc.actor.meeting`,
//! `cc.signaling`, `cc.media`, `cc.presence`, `cc.api`). Span fields are
//! allow-listed with `#[instrument(skip_all, fields(...))]`: meeting ids and
//! identities only, never RTP or DTLS payloads.
//!
//! # Metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `cc_meetings_active` | Gauge | none |
//! | `cc_rooms_active` | Gauge | none |
//! | `cc_clients_connected` | Gauge | none |
//! | `cc_actor_mailbox_depth` | Gauge | `actor_type` |
//! | `cc_invitations_total` | Counter | `outcome` |
//! | `cc_notifications_dropped_total` | Counter | none |
//! | `cc_engine_failures_total` | Counter | `operation` |
//! | `cc_actor_panics_total` | Counter | `actor_type` |
//! | `cc_signaling_event_latency_seconds` | Histogram | `event`, `status` |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
