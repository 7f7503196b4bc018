//! Observability for the signaling service.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! Room IDs appear in logs but never as metric labels.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `signaling_connections_active` | Gauge | none | Open WebSocket connections |
//! | `signaling_rooms_active` | Gauge | none | Rooms in the registry |
//! | `signaling_messages_total` | Counter | `message_type` | Handled inbound messages |
//! | `signaling_message_latency_seconds` | Histogram | `message_type` | Handler latency |
//! | `signaling_errors_total` | Counter | `error_type` | Failed messages |
//! | `signaling_engine_failures_total` | Counter | `operation` | Failed engine calls |
//! | `signaling_messages_dropped_total` | Counter | `reason` | Dropped inbound/outbound messages |
//! | `signaling_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator |
//! | `signaling_actor_panics_total` | Counter | `actor_type` | Actor task panics |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::{
    init_metrics_recorder, record_actor_panic, record_engine_failure, record_error,
    record_message, record_message_dropped, set_actor_mailbox_depth, set_connections_active,
    set_rooms_active,
};
