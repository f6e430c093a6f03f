//! # vigil-consul
//!
//! Blocking-query access to Consul.
//!
//! - [`ConsulBackend`]: the query interface the relay polls through
//! - [`HttpConsulBackend`]: `reqwest` client for the Consul HTTP API
//! - [`MockBackend`]: in-memory backend with real blocking semantics, for tests
//!
//! Every query takes a [`QueryOptions`] resume marker and returns the value
//! together with Consul's `X-Consul-Index` as an [`Indexed`].

#![deny(unsafe_code)]

pub mod backend;
pub mod errors;
pub mod http;
pub mod mock;

pub use backend::{ConsulBackend, Indexed, QueryOptions};
pub use errors::ConsulError;
pub use http::HttpConsulBackend;
pub use mock::MockBackend;
