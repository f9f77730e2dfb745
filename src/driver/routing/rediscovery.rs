//! 재탐색 (Rediscovery)
//!
//! 알려진 라우터에 ROUTE 요청을 보내 클러스터 구성을 조회합니다.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::super::clock::Clock;
use super::super::connection::{AcquireParams, BoltConnection};
use super::super::error::{DriverError, DriverResult};
use super::super::types::{dedup_addresses, ServerAddress};
use super::table::{ClusterComposition, RoutingTable};
use crate::bolt::{AccessMode, CollectingHandler, Message};

/// 클러스터 구성 조회 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterCompositionLookupResult {
    /// 클러스터 구성
    pub composition: ClusterComposition,
    /// 초기 라우터를 사용했다면 해석된 주소 목록
    pub resolved_initial_routers: Option<Vec<ServerAddress>>,
}

impl ClusterCompositionLookupResult {
    /// 조회 결과 생성
    pub fn new(composition: ClusterComposition) -> Self {
        Self {
            composition,
            resolved_initial_routers: None,
        }
    }

    /// 해석된 초기 라우터 설정
    pub fn with_resolved_initial_routers(mut self, routers: Vec<ServerAddress>) -> Self {
        self.resolved_initial_routers = Some(routers);
        self
    }
}

/// 주소별 연결 공급원 (보통 주소별 연결 풀)
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    /// 해당 주소로 연결 획득
    async fn acquire(
        &self,
        address: &ServerAddress,
        params: &AcquireParams,
    ) -> DriverResult<Box<dyn BoltConnection>>;
}

/// 클러스터 구성 조회기
#[async_trait]
pub trait Rediscovery: Send + Sync {
    /// 라우팅 테이블의 라우터(또는 초기 라우터)에서 클러스터 구성 조회
    async fn lookup_cluster_composition(
        &self,
        table: &RoutingTable,
        source: Arc<dyn ConnectionSource>,
        params: &AcquireParams,
    ) -> DriverResult<ClusterCompositionLookupResult>;
}

/// 초기 라우터 주소 해석기 (예: DNS 조회)
pub type ServerAddressResolver = Arc<dyn Fn(&ServerAddress) -> Vec<ServerAddress> + Send + Sync>;

// ============================================================================
// RouteRediscovery - ROUTE 메시지 기반 재탐색
// ============================================================================

/// ROUTE 메시지 기반 재탐색
pub struct RouteRediscovery {
    initial_routers: Vec<ServerAddress>,
    routing_context: HashMap<String, String>,
    resolver: ServerAddressResolver,
    clock: Arc<dyn Clock>,
}

impl RouteRediscovery {
    /// 새 재탐색기 생성
    pub fn new(
        initial_routers: Vec<ServerAddress>,
        routing_context: HashMap<String, String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            initial_routers,
            routing_context,
            resolver: Arc::new(|address| vec![address.clone()]),
            clock,
        }
    }

    /// 주소 해석기 설정
    pub fn with_resolver(mut self, resolver: ServerAddressResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// 초기 라우터 목록
    pub fn initial_routers(&self) -> &[ServerAddress] {
        &self.initial_routers
    }

    fn resolve_initial_routers(&self) -> Vec<ServerAddress> {
        dedup_addresses(self.initial_routers.iter().flat_map(|a| (self.resolver)(a)))
    }

    /// 라우터 하나에 ROUTE 요청
    async fn lookup_on_router(
        &self,
        router: &ServerAddress,
        table: &RoutingTable,
        source: &dyn ConnectionSource,
        params: &AcquireParams,
    ) -> DriverResult<ClusterComposition> {
        let params = params
            .clone()
            .with_database(table.database().clone())
            .with_access_mode(AccessMode::Read);
        let mut connection = source.acquire(router, &params).await?;

        if !connection.protocol_version().supports_route() {
            connection.close().await?;
            return Err(DriverError::protocol(format!(
                "Server at {} does not support ROUTE (protocol {})",
                router,
                connection.protocol_version()
            )));
        }

        let message = Message::route(
            self.routing_context.clone(),
            table.database().name().map(str::to_string),
            params.impersonated_user.clone(),
            params.bookmarks.clone(),
        );
        let mut handler = CollectingHandler::new();
        let flushed = connection.write_and_flush(vec![message], &mut handler).await;
        if let Err(e) = connection.close().await {
            debug!(address = %router, error = %e, "Failed to release routing connection");
        }
        flushed?;

        if let Some(error) = handler.error() {
            return Err(error.clone());
        }
        let route = handler
            .route_summary()
            .ok_or_else(|| DriverError::protocol("ROUTE returned no summary"))?;

        let composition = ClusterComposition::parse(&route.metadata, self.clock.millis())?;
        if !composition.has_routers_and_readers() {
            return Err(DriverError::protocol(format!(
                "Failed to parse routing table from {}: no router or reader found in {}",
                router, composition
            )));
        }
        Ok(composition)
    }

    /// 라우터 목록을 순서대로 시도
    ///
    /// 치명적인 오류(인증, 존재하지 않는 데이터베이스 등)는 즉시 전파합니다.
    async fn lookup_on_routers(
        &self,
        routers: &[ServerAddress],
        seen: &mut HashSet<ServerAddress>,
        table: &RoutingTable,
        source: &dyn ConnectionSource,
        params: &AcquireParams,
        last_error: &mut Option<DriverError>,
    ) -> DriverResult<Option<ClusterComposition>> {
        for router in routers {
            if !seen.insert(router.clone()) {
                continue;
            }
            match self.lookup_on_router(router, table, source, params).await {
                Ok(composition) => return Ok(Some(composition)),
                Err(e) if e.is_fatal_during_discovery() => return Err(e),
                Err(e) => {
                    warn!(
                        address = %router,
                        database = %table.database(),
                        error = %e,
                        "Failed to update routing table with server"
                    );
                    *last_error = Some(e);
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Rediscovery for RouteRediscovery {
    async fn lookup_cluster_composition(
        &self,
        table: &RoutingTable,
        source: Arc<dyn ConnectionSource>,
        params: &AcquireParams,
    ) -> DriverResult<ClusterCompositionLookupResult> {
        let mut seen = HashSet::new();
        let mut last_error = None;
        let resolved = self.resolve_initial_routers();
        let known = table.routers().to_vec();

        let (first, second, first_is_initial) = if table.prefer_initial_router() {
            (&resolved, &known, true)
        } else {
            (&known, &resolved, false)
        };

        let found = match self
            .lookup_on_routers(first, &mut seen, table, source.as_ref(), params, &mut last_error)
            .await?
        {
            Some(composition) => Some((composition, first_is_initial)),
            None => self
                .lookup_on_routers(second, &mut seen, table, source.as_ref(), params, &mut last_error)
                .await?
                .map(|composition| (composition, !first_is_initial)),
        };

        match found {
            Some((composition, from_initial)) => {
                debug!(database = %table.database(), %composition, "Cluster composition fetched");
                let result = ClusterCompositionLookupResult::new(composition);
                Ok(if from_initial {
                    result.with_resolved_initial_routers(resolved)
                } else {
                    result
                })
            }
            None => {
                let message = format!(
                    "Could not perform discovery for database '{}'. No routing server available.",
                    table.database()
                );
                Err(match last_error {
                    Some(cause) => DriverError::service_unavailable_caused_by(message, cause),
                    None => DriverError::service_unavailable(message),
                })
            }
        }
    }
}

impl fmt::Debug for RouteRediscovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteRediscovery")
            .field("initial_routers", &self.initial_routers)
            .field("routing_context", &self.routing_context)
            .finish_non_exhaustive()
    }
}
