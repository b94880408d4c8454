//! # keyward-daemon
//!
//! mTLS reverse proxy that injects per-user impersonation tokens.
//!
//! Clients authenticate with a certificate issued by the configured CA. The
//! certificate's subject common name is mapped to an upstream user, a
//! short-lived token is minted for that user (or taken from the cache), and
//! the request is forwarded with `PRIVATE-TOKEN` and `Authorization: Basic`
//! headers set.
//!
//! Request counts, latencies, cache efficiency and authentication outcomes
//! are exported in the Prometheus text format on a separate listener.

pub mod config;
pub mod error;
pub mod forward;
pub mod metrics;
pub mod server;
pub mod tls;

pub use config::DaemonConfig;
pub use error::{DaemonError, ForwardError, Result};
pub use forward::Forwarder;
pub use metrics::ProxyMetrics;
pub use server::{AppState, Server};
