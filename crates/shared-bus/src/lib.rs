//! # Shared Bus - Lifecycle Event Bus
//!
//! Subsystems announce what happened (a key was proposed, a session was
//! established, a job was published, a return arrived) and any number of
//! observers react without the publisher knowing about them.
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │ fm-02 auth   │                    │ event archive│
//! │ fm-04 jobs   │    publish()       │ (job cache)  │
//! │ runtime      │ ──────┐            │ tests        │
//! └──────────────┘       │            └──────────────┘
//!                        ▼                    ↑
//!                  ┌──────────────┐          │
//!                  │  Event Bus   │ ─────────┘
//!                  └──────────────┘  subscribe()
//! ```
//!
//! Delivery is best effort: a lagging subscriber skips events rather than
//! slowing the publisher.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod events;
pub mod publisher;
pub mod subscriber;

// Re-export main types
pub use events::{EventFilter, EventTopic, MasterEvent};
pub use publisher::{EventPublisher, InMemoryEventBus};
pub use subscriber::{EventStream, Subscription, SubscriptionError};

/// Maximum events to buffer per subscriber before it starts lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
