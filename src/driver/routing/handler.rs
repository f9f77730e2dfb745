//! 라우팅 테이블 핸들러
//!
//! 데이터베이스 하나의 라우팅 테이블을 소유하고 갱신합니다.
//!
//! 갱신은 한 번에 하나만 진행됩니다. 갱신 중에 들어온 호출은 새 조회를 시작하지 않고
//! 진행 중인 갱신의 결과(`Shared` future)를 함께 기다립니다.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, error};

use super::super::connection::AcquireParams;
use super::super::error::{DriverError, DriverResult};
use super::super::types::{dedup_addresses, DatabaseName, ServerAddress};
use super::rediscovery::{ClusterCompositionLookupResult, ConnectionSource, Rediscovery};
use super::registry::RoutingTableRegistry;
use super::table::RoutingTable;
use crate::bolt::AccessMode;

/// 라우팅 실패 수신자
///
/// 연결에서 관찰된 오류를 라우팅 테이블에 반영합니다.
pub trait RoutingFailureListener: Send + Sync {
    /// 서버에 연결할 수 없음 (모든 역할에서 제거)
    fn on_connection_failure(&self, address: &ServerAddress);

    /// 서버가 더 이상 쓰기를 받지 않음 (라이터에서만 제거)
    fn on_write_failure(&self, address: &ServerAddress);
}

/// 유지할 주소 집합을 받는 콜백 (주소별 풀 정리용)
pub type RetainAddresses = Arc<dyn Fn(&[ServerAddress]) + Send + Sync>;

type RefreshFuture = Shared<BoxFuture<'static, DriverResult<RoutingTable>>>;

#[derive(Debug, Clone)]
enum Forget {
    Server(ServerAddress),
    Writer(ServerAddress),
}

struct HandlerState {
    table: RoutingTable,
    refresh: Option<RefreshFuture>,
    resolved_initial_routers: Vec<ServerAddress>,
    /// 갱신 중에 들어온 제거 요청 (갱신 결과에 다시 적용)
    forgotten_during_refresh: Vec<Forget>,
}

impl HandlerState {
    fn apply(&mut self, forget: &Forget) {
        match forget {
            Forget::Server(address) => self.table.forget(address),
            Forget::Writer(address) => self.table.forget_writer(address),
        }
    }

    fn finish_refresh(&mut self) {
        self.refresh = None;
        self.forgotten_during_refresh.clear();
    }
}

// ============================================================================
// RoutingTableHandler - 라우팅 테이블 핸들러
// ============================================================================

/// 라우팅 테이블 핸들러
pub struct RoutingTableHandler {
    database: DatabaseName,
    state: Mutex<HandlerState>,
    rediscovery: Arc<dyn Rediscovery>,
    connection_source: Arc<dyn ConnectionSource>,
    registry: Weak<RoutingTableRegistry>,
    purge_delay: Duration,
    retain: RetainAddresses,
}

impl RoutingTableHandler {
    /// 새 핸들러 생성
    pub fn new(
        table: RoutingTable,
        rediscovery: Arc<dyn Rediscovery>,
        connection_source: Arc<dyn ConnectionSource>,
        registry: Weak<RoutingTableRegistry>,
        purge_delay: Duration,
        retain: RetainAddresses,
    ) -> Arc<Self> {
        Arc::new(Self {
            database: table.database().clone(),
            state: Mutex::new(HandlerState {
                table,
                refresh: None,
                resolved_initial_routers: Vec::new(),
                forgotten_during_refresh: Vec::new(),
            }),
            rediscovery,
            connection_source,
            registry,
            purge_delay,
            retain,
        })
    }

    /// 데이터베이스 이름
    pub fn database(&self) -> &DatabaseName {
        &self.database
    }

    /// 라우팅 테이블 스냅샷
    pub fn routing_table(&self) -> RoutingTable {
        self.state.lock().table.clone()
    }

    /// 최신 라우팅 테이블 확보
    ///
    /// 갱신이 진행 중이면 그 결과를 기다리고, 테이블이 접근 모드 기준으로 오래되었으면
    /// 새 갱신을 시작합니다. 신선하면 네트워크 접근 없이 바로 돌려줍니다.
    pub async fn ensure_routing_table(self: &Arc<Self>, params: &AcquireParams) -> DriverResult<RoutingTable> {
        let refresh = {
            let mut state = self.state.lock();
            if let Some(refresh) = &state.refresh {
                refresh.clone()
            } else if state.table.is_stale_for(params.access_mode) {
                debug!(
                    database = %self.database,
                    routing_table = %state.table,
                    "Routing table is stale"
                );
                let table = state.table.clone();
                let rediscovery = self.rediscovery.clone();
                let source = self.connection_source.clone();
                let params = params.clone();
                self.begin_refresh(&mut state, async move {
                    rediscovery.lookup_cluster_composition(&table, source, &params).await
                })
            } else {
                return Ok(state.table.clone());
            }
        };
        refresh.await
    }

    /// 외부에서 얻은 클러스터 구성으로 테이블 갱신
    ///
    /// 현재 테이블보다 먼저 만료되는 구성은 무시합니다.
    pub async fn update_routing_table(
        self: &Arc<Self>,
        result: ClusterCompositionLookupResult,
    ) -> DriverResult<RoutingTable> {
        let refresh = {
            let mut state = self.state.lock();
            if let Some(refresh) = &state.refresh {
                refresh.clone()
            } else if result.composition.expires_at < state.table.expires_at() {
                return Ok(state.table.clone());
            } else {
                self.begin_refresh(&mut state, future::ready(Ok(result)))
            }
        };
        refresh.await
    }

    fn begin_refresh<F>(self: &Arc<Self>, state: &mut HandlerState, lookup: F) -> RefreshFuture
    where
        F: Future<Output = DriverResult<ClusterCompositionLookupResult>> + Send + 'static,
    {
        let handler = self.clone();
        let task = tokio::spawn(async move {
            match lookup.await {
                Ok(result) => Ok(handler.composition_fetched(result)),
                Err(e) => Err(handler.lookup_failed(e)),
            }
        });

        let weak = Arc::downgrade(self);
        let refresh = task
            .map(move |joined| match joined {
                Ok(result) => result,
                Err(join_error) => {
                    let e = DriverError::internal(format!("Routing table refresh task failed: {}", join_error));
                    match weak.upgrade() {
                        Some(handler) => Err(handler.lookup_failed(e)),
                        None => Err(e),
                    }
                }
            })
            .boxed()
            .shared();

        state.forgotten_during_refresh.clear();
        state.refresh = Some(refresh.clone());
        refresh
    }

    fn composition_fetched(&self, result: ClusterCompositionLookupResult) -> RoutingTable {
        debug!(
            database = %self.database,
            composition = %result.composition,
            "Fetched cluster composition"
        );

        let resolved = {
            let mut state = self.state.lock();
            state.table.update(&result.composition);
            let forgotten = std::mem::take(&mut state.forgotten_during_refresh);
            for forget in &forgotten {
                state.apply(forget);
            }
            if let Some(resolved) = result.resolved_initial_routers {
                state.resolved_initial_routers = resolved;
            }
            state.resolved_initial_routers.clone()
        };

        // registry-wide scans lock other handlers, so this handler's lock is not held here
        let servers = match self.registry.upgrade() {
            Some(registry) => {
                registry.remove_aged();
                registry.all_servers()
            }
            None => self.servers(),
        };
        let retained = dedup_addresses(servers.into_iter().chain(resolved));
        (self.retain)(&retained);

        let mut state = self.state.lock();
        state.finish_refresh();
        debug!(
            database = %self.database,
            routing_table = %state.table,
            "Updated routing table"
        );
        state.table.clone()
    }

    fn lookup_failed(&self, e: DriverError) -> DriverError {
        let table = self.state.lock().table.to_string();
        error!(
            database = %self.database,
            routing_table = %table,
            error = %e,
            "Failed to update routing table"
        );

        if let Some(registry) = self.registry.upgrade() {
            registry.remove_handler(&self.database, self);
        }
        self.state.lock().finish_refresh();
        e
    }

    /// 테이블에 있는 모든 서버
    pub fn servers(&self) -> Vec<ServerAddress> {
        self.state.lock().table.servers()
    }

    /// 퍼지 대상 여부 (갱신 중이 아니고 퍼지 지연보다 오래 만료된 상태)
    pub fn is_routing_table_aged(&self) -> bool {
        let state = self.state.lock();
        state.refresh.is_none() && state.table.has_been_stale_for(self.purge_delay)
    }

    /// 접근 모드 기준 갱신 필요 여부 (갱신 중이면 true)
    pub fn is_stale_for(&self, mode: AccessMode) -> bool {
        let state = self.state.lock();
        state.refresh.is_some() || state.table.is_stale_for(mode)
    }

    /// 갱신 진행 여부
    pub fn is_refreshing(&self) -> bool {
        self.state.lock().refresh.is_some()
    }

    fn forget(&self, forget: Forget) {
        let mut state = self.state.lock();
        state.apply(&forget);
        if state.refresh.is_some() {
            state.forgotten_during_refresh.push(forget);
        }
    }
}

impl RoutingFailureListener for RoutingTableHandler {
    fn on_connection_failure(&self, address: &ServerAddress) {
        debug!(database = %self.database, address = %address, "Removing server from routing table");
        self.forget(Forget::Server(address.clone()));
    }

    fn on_write_failure(&self, address: &ServerAddress) {
        debug!(database = %self.database, address = %address, "Removing writer from routing table");
        self.forget(Forget::Writer(address.clone()));
    }
}

impl fmt::Debug for RoutingTableHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingTableHandler")
            .field("database", &self.database)
            .field("refreshing", &self.is_refreshing())
            .field("purge_delay", &self.purge_delay)
            .finish_non_exhaustive()
    }
}
