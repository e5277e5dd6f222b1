#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! HTTP transport for the evcharge session API.
//!
//! Provides [`HttpChargeClient`], a reqwest-backed implementation of the
//! [`SessionFetcher`](evcharge::SessionFetcher) and
//! [`SessionCommands`](evcharge::SessionCommands) collaborators consumed by
//! [`ChargeProvider`](evcharge::ChargeProvider).
//!
//! # Modules
//!
//! - [`client`] - The HTTP client
//! - [`constants`] - Endpoint paths and limits
//! - [`error`] - Client construction errors

pub mod client;
pub mod constants;
pub mod error;

pub use client::HttpChargeClient;
pub use error::HttpClientError;
