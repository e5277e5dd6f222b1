#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Shared charge-session polling for EV charging clients.
//!
//! Charging UIs tend to have many views interested in the same live session
//! (a status banner, a detail screen, a widget). Polling the backend once per
//! view multiplies traffic for no gain. This crate polls once and fans the
//! result out.
//!
//! # Overview
//!
//! - [`ChargeProvider`] runs a single polling loop per provider and hands
//!   every caller its own [`SessionUpdates`] stream. The loop starts with the
//!   first subscriber, stops by itself once nobody is listening, and ends
//!   every stream with the same typed [`ApiError`] when a fetch fails.
//! - [`SubscriptionRegistry`] is the serialized subscriber set the loop
//!   fans out to.
//! - [`reduce`] / [`SessionState`] turn the latest session, error and flags
//!   into a discrete status for display.
//! - [`SessionMonitor`] wires the two together and republishes the derived
//!   state on a `watch` channel.
//!
//! The backend itself is abstracted behind [`SessionFetcher`] and
//! [`SessionCommands`]; `evcharge-http` provides a reqwest implementation.
//!
//! # Modules
//!
//! - [`api`] - Backend collaborator traits
//! - [`auth`] - Credentials
//! - [`context`] - Persisted session-context flag
//! - [`error`] - Typed backend errors
//! - [`monitor`] - Live derived state
//! - [`provider`] - Shared polling coordinator
//! - [`registry`] - Subscriber registry
//! - [`session`] - Session snapshots
//! - [`state`] - State derivation
//! - [`timestamp`] - Unix timestamps
//! - [`updates`] - Per-subscriber newest-wins streams
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation for debugging and monitoring

pub mod api;
pub mod auth;
pub mod context;
pub mod error;
pub mod monitor;
pub mod provider;
pub mod registry;
pub mod session;
pub mod state;
pub mod timestamp;
pub mod updates;

pub use api::{BoxFuture, SessionCommands, SessionFetcher};
pub use auth::Authentication;
pub use context::{InMemorySessionContextStore, SessionContextStore};
pub use error::{ApiError, ConnectivityError};
pub use monitor::SessionMonitor;
pub use provider::{ChargeProvider, ProviderConfig};
pub use registry::{SubscriberId, SubscriptionRegistry};
pub use session::{Session, SessionStatus};
pub use state::{SessionInputs, SessionState, reduce};
pub use timestamp::UnixTimestamp;
pub use updates::{SessionSink, SessionUpdates};
