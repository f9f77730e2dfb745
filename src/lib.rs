//! # Zeta4G Bolt Connection
//!
//! Pooled and routed Bolt connections for [Zeta4G](https://github.com/zeta9044/zeta4g)
//! graph database clusters.
//!
//! ## Features
//!
//! - **Connection Pooling** - Per-address pools with bounded size, pending queue and acquisition timeout
//! - **Liveness & Re-auth** - Idle connections are tested with RESET, stale credentials are swapped with LOGOFF/LOGON
//! - **Cluster Routing** - Per-database routing tables refreshed with ROUTE, one lookup per stale table
//! - **Failure Feedback** - Server failures seen on a routed connection update the routing table
//! - **Async/Await** - Built on Tokio, pluggable transport through [`driver::ConnectionFactory`]
//!
//! ## Quick Start
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! zeta4g-bolt-connection = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ## Routing Configuration
//!
//! Routers, the routing context and the security plan all come from a `zeta4g://` URI:
//!
//! ```rust
//! use zeta4g_bolt_connection::driver::routing::{RoutingConfig, RoutingPolicy};
//! use zeta4g_bolt_connection::driver::ServerAddress;
//!
//! let config = RoutingConfig::from_uri("zeta4g+s://core1:7687,core2:7687?region=eu").unwrap();
//!
//! assert_eq!(config.initial_routers[1], ServerAddress::new("core2", 7687));
//! assert_eq!(config.routing_context["region"], "eu");
//! assert_eq!(config.policy, RoutingPolicy::LeastConnected);
//! assert!(config.pool.security_plan.encrypted);
//! ```
//!
//! ## Acquiring Connections
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use zeta4g_bolt_connection::bolt::{AccessMode, AuthToken, CollectingHandler};
//! use zeta4g_bolt_connection::driver::routing::{RoutedConnectionProvider, RoutingConfig};
//! use zeta4g_bolt_connection::driver::{static_auth, AcquireParams, DatabaseName, NoopMetricsListener, SystemClock};
//!
//! let provider = RoutedConnectionProvider::new(
//!     RoutingConfig::from_uri("zeta4g://core1:7687")?,
//!     Arc::new(MyTransport::default()),
//!     Arc::new(SystemClock),
//!     Arc::new(NoopMetricsListener),
//! );
//!
//! let params = AcquireParams::new(static_auth(AuthToken::basic("zeta4g", "password")))
//!     .with_database(DatabaseName::named("movies"))
//!     .with_access_mode(AccessMode::Write);
//!
//! let mut conn = provider.connect(&params).await?;
//! conn.run_in_auto_commit("CREATE (n:Node)", Default::default(), Default::default()).await?
//!     .pull(-1, -1).await?;
//!
//! let mut handler = CollectingHandler::new();
//! conn.flush(&mut handler).await?;
//! conn.close().await?;
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`DriverResult`]. Connectivity errors are distinguished from server failures:
//!
//! ```rust
//! use zeta4g_bolt_connection::{DriverError, NOT_A_LEADER};
//!
//! let err = DriverError::failure(NOT_A_LEADER, "No write operations are allowed");
//! assert_eq!(err.code(), Some(NOT_A_LEADER));
//! assert!(!err.is_connectivity_error());
//! assert!(DriverError::service_unavailable("gone").is_connectivity_error());
//! ```
//!
//! ## Modules
//!
//! - [`driver`] - Connection pool, routing and the connection boundary
//! - [`bolt`] - Protocol-facing types: versions, messages and replies
//!

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod bolt;
pub mod driver;

// Re-exports for convenience
pub use driver::{
    AcquireParams, BoltConnection, ConnectionFactory, ConnectionPool, PoolConfig,
    DatabaseName, ServerAddress,
    DriverError, DriverResult, NOT_A_LEADER,
};

pub use driver::routing::{RoutedConnection, RoutedConnectionProvider, RoutingConfig};

pub use bolt::{AccessMode, AuthToken, BoltVersion};
