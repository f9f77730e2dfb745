//! 라우팅 모듈
//!
//! 클러스터 환경에서 데이터베이스별 라우팅 테이블을 관리하고, 접근 모드에 맞는
//! 서버로 연결을 라우팅합니다.
//!
//! # 개요
//!
//! - [`RoutingTable`]: 한 데이터베이스의 리더/라이터/라우터 목록과 만료 시각
//! - [`RouteRediscovery`]: 라우터에 ROUTE 요청을 보내 클러스터 구성을 조회
//! - [`RoutingTableHandler`]: 테이블 갱신을 하나로 합치고 서버 실패를 반영
//! - [`RoutingTableRegistry`]: 데이터베이스 이름별 핸들러 관리, 홈 데이터베이스 해석
//! - [`RoutedConnection`]: 응답 오류를 분류해 라우팅 테이블에 알리는 연결 래퍼
//! - [`RoutedConnectionProvider`]: 위 구성요소와 주소별 연결 풀을 묶는 진입점
//!
//! # 예시
//!
//! ```ignore
//! use zeta4g_bolt_connection::driver::routing::{RoutingConfig, RoutedConnectionProvider};
//! use zeta4g_bolt_connection::driver::{static_auth, AcquireParams, NoopMetricsListener, SystemClock};
//! use zeta4g_bolt_connection::bolt::{AccessMode, AuthToken};
//!
//! let config = RoutingConfig::from_uri("zeta4g://server1:7687,server2:7687?region=eu")?;
//! let provider = RoutedConnectionProvider::new(config, factory, Arc::new(SystemClock), Arc::new(NoopMetricsListener));
//!
//! let params = AcquireParams::new(static_auth(AuthToken::basic("zeta4g", "password")))
//!     .with_access_mode(AccessMode::Read);
//! let mut conn = provider.connect(&params).await?;
//! conn.run_in_auto_commit("MATCH (n) RETURN n", Default::default(), Default::default()).await?
//!     .pull(-1, -1).await?;
//! conn.flush(&mut handler).await?;
//!
//! provider.close().await?;
//! ```

mod connection;
mod handler;
mod policy;
mod provider;
mod rediscovery;
mod registry;
mod table;

pub use connection::RoutedConnection;
pub use handler::{RetainAddresses, RoutingFailureListener, RoutingTableHandler};
pub use policy::{ConnectionCounter, RoutingPolicy, ServerSelector};
pub use provider::{
    is_routing_uri, parse_routing_context, parse_routing_uri, RoutedConnectionProvider, RoutingConfig,
    RoutingConfigBuilder, RoutingMetrics,
};
pub use rediscovery::{
    ClusterCompositionLookupResult, ConnectionSource, Rediscovery, RouteRediscovery, ServerAddressResolver,
};
pub use registry::{RoutingTableHandlerFactory, RoutingTableRegistry};
pub use table::{ClusterComposition, RoutingTable, ServerRole};
