//! Driver Module
//!
//! 연결 계층: 주소별 연결 풀과 클러스터 라우팅
//!
//! # Components
//!
//! - 연결 풀 (ConnectionPool, PoolConfig, PooledConnection)
//! - 연결 경계 (BoltConnection, ConnectionFactory, AcquireParams)
//! - 라우팅 (RoutingTable, RoutingTableRegistry, RoutedConnectionProvider)
//! - 공통 기반 (DriverError, Clock, MetricsListener)
//!
//! # Example
//!
//! ```ignore
//! use zeta4g_bolt_connection::driver::{static_auth, AcquireParams, ConnectionPool, PoolConfig};
//! use zeta4g_bolt_connection::driver::{NoopMetricsListener, ServerAddress, SystemClock};
//! use zeta4g_bolt_connection::bolt::AuthToken;
//!
//! // 단일 서버 풀 (bolt://)
//! let pool = ConnectionPool::new(
//!     ServerAddress::new("localhost", 7687),
//!     PoolConfig::default(),
//!     factory,
//!     Arc::new(SystemClock),
//!     Arc::new(NoopMetricsListener),
//! );
//!
//! let params = AcquireParams::new(static_auth(AuthToken::basic("zeta4g", "password")));
//! let mut conn = pool.acquire(&params).await?;
//! conn.write(vec![Message::Reset]).await?;
//! conn.flush(&mut handler).await?;
//!
//! // 연결은 drop 또는 close 시 풀로 돌아갑니다
//! drop(conn);
//! pool.close().await?;
//! ```

pub mod routing;
mod clock;
mod connection;
mod error;
mod metrics;
mod pool;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::{Clock, FakeClock, SystemClock};
pub use connection::{AcquireParams, BoltConnection, ConnectParams, ConnectionFactory, ConnectionState};
pub use error::{
    DriverError, DriverResult, ErrorSource, AUTHORIZATION_EXPIRED, DATABASE_NOT_FOUND, DATABASE_UNAVAILABLE,
    FORBIDDEN_ON_READ_ONLY_DATABASE, INVALID_BOOKMARK, NOT_A_LEADER,
};
pub use metrics::{MetricsListener, NoopMetricsListener, PoolGauges, PoolMetrics};
pub use pool::{ConnectionPool, PoolConfig, PoolConfigBuilder, PooledConnection};
pub use types::{
    static_auth, AuthInfo, AuthTokenSupplier, DatabaseName, NotificationConfig, SecurityPlan, ServerAddress,
    TrustStrategy, DEFAULT_PORT, SYSTEM_DATABASE_NAME,
};
