//! Observability for the signaling service.
//!
//! Metric labels are bounded to prevent cardinality explosion:
//! - `actor_type`: 2 values (registry, room)
//! - `message_type`: bounded by protocol event names
//! - `reason`: bounded drop reasons (unknown_target, full, closed)
//! - `outcome`: bounded admission outcomes
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `sig_connections_active` | Gauge | none | Open WebSocket sessions |
//! | `sig_rooms_active` | Gauge | none | Live room actors |
//! | `sig_messages_total` | Counter | `message_type` | Inbound client events |
//! | `sig_message_latency_seconds` | Histogram | `message_type` | Inbound event handling time |
//! | `sig_relay_undeliverable_total` | Counter | `reason` | Negotiation messages that went nowhere |
//! | `sig_admissions_total` | Counter | `outcome` | Join and approval results |
//! | `sig_outbound_dropped_total` | Counter | `reason` | Deliveries lost to full or closed mailboxes |
//! | `sig_actor_panics_total` | Counter | `actor_type` | Actor task panics |

pub mod health;
pub mod metrics;

pub use health::{health_router, rooms_router, HealthState};
pub use metrics::{
    init_metrics_recorder, record_actor_panic, record_admission, record_message,
    record_message_latency, record_outbound_dropped, record_relay_undeliverable,
    set_connections_active, set_rooms_active,
};
