//! 라우팅 테이블 레지스트리
//!
//! 데이터베이스 이름별 라우팅 테이블 핸들러를 관리합니다.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::super::clock::Clock;
use super::super::connection::AcquireParams;
use super::super::error::DriverResult;
use super::super::types::{dedup_addresses, DatabaseName, ServerAddress};
use super::handler::{RetainAddresses, RoutingTableHandler};
use super::rediscovery::{ConnectionSource, Rediscovery};
use super::table::RoutingTable;

// ============================================================================
// RoutingTableHandlerFactory - 핸들러 팩토리
// ============================================================================

/// 라우팅 테이블 핸들러 팩토리
///
/// 새 핸들러의 테이블은 라우터가 비어 있어 처음 사용할 때 바로 갱신됩니다.
pub struct RoutingTableHandlerFactory {
    rediscovery: Arc<dyn Rediscovery>,
    connection_source: Arc<dyn ConnectionSource>,
    clock: Arc<dyn Clock>,
    purge_delay: Duration,
    retain: RetainAddresses,
}

impl RoutingTableHandlerFactory {
    /// 새 팩토리 생성
    pub fn new(
        rediscovery: Arc<dyn Rediscovery>,
        connection_source: Arc<dyn ConnectionSource>,
        clock: Arc<dyn Clock>,
        purge_delay: Duration,
        retain: RetainAddresses,
    ) -> Self {
        Self {
            rediscovery,
            connection_source,
            clock,
            purge_delay,
            retain,
        }
    }

    /// 데이터베이스용 핸들러 생성
    pub fn new_instance(
        &self,
        database: DatabaseName,
        registry: Weak<RoutingTableRegistry>,
    ) -> Arc<RoutingTableHandler> {
        RoutingTableHandler::new(
            self.empty_table(database),
            self.rediscovery.clone(),
            self.connection_source.clone(),
            registry,
            self.purge_delay,
            self.retain.clone(),
        )
    }

    fn empty_table(&self, database: DatabaseName) -> RoutingTable {
        RoutingTable::new(database, Vec::new(), self.clock.clone())
    }
}

// ============================================================================
// RoutingTableRegistry - 레지스트리
// ============================================================================

/// 데이터베이스별 라우팅 테이블 레지스트리
pub struct RoutingTableRegistry {
    handlers: RwLock<HashMap<DatabaseName, Arc<RoutingTableHandler>>>,
    factory: RoutingTableHandlerFactory,
    self_ref: Weak<RoutingTableRegistry>,
}

impl RoutingTableRegistry {
    /// 새 레지스트리 생성
    pub fn new(factory: RoutingTableHandlerFactory) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            handlers: RwLock::new(HashMap::new()),
            factory,
            self_ref: self_ref.clone(),
        })
    }

    /// 데이터베이스의 최신 라우팅 테이블 확보
    ///
    /// 기본 데이터베이스 요청이면 홈 데이터베이스 힌트의 핸들러가 신선할 때 그대로
    /// 사용하고, 아니면 라우터에 직접 물어 서버가 알려준 이름으로 핸들러를 등록합니다.
    pub async fn ensure_routing_table(
        &self,
        database: &DatabaseName,
        params: &AcquireParams,
    ) -> DriverResult<Arc<RoutingTableHandler>> {
        if !database.is_default() {
            let handler = self.get_or_create(database);
            handler.ensure_routing_table(params).await?;
            return Ok(handler);
        }

        let hinted = DatabaseName::from(params.home_database_hint.clone());
        if let Some(handler) = self.get_handler(&hinted) {
            if !handler.is_stale_for(params.access_mode) {
                return Ok(handler);
            }
        }

        let table = self.factory.empty_table(DatabaseName::default_database());
        let result = self
            .factory
            .rediscovery
            .lookup_cluster_composition(&table, self.factory.connection_source.clone(), params)
            .await?;

        let resolved = DatabaseName::from(result.composition.database.clone());
        debug!(database = %resolved, "Resolved home database");
        let handler = self.get_or_create(&resolved);
        handler.update_routing_table(result).await?;
        Ok(handler)
    }

    /// 핸들러 조회 (없으면 생성)
    pub fn get_or_create(&self, database: &DatabaseName) -> Arc<RoutingTableHandler> {
        if let Some(handler) = self.handlers.read().get(database) {
            return handler.clone();
        }

        let mut handlers = self.handlers.write();
        handlers
            .entry(database.clone())
            .or_insert_with(|| {
                debug!(database = %database, "Routing table handler created");
                self.factory.new_instance(database.clone(), self.self_ref.clone())
            })
            .clone()
    }

    /// 핸들러 조회
    pub fn get_handler(&self, database: &DatabaseName) -> Option<Arc<RoutingTableHandler>> {
        self.handlers.read().get(database).cloned()
    }

    /// 핸들러 제거
    pub fn remove(&self, database: &DatabaseName) {
        if self.handlers.write().remove(database).is_some() {
            debug!(database = %database, "Routing table handler removed");
        }
    }

    /// 등록된 핸들러가 `handler`일 때만 제거
    pub(crate) fn remove_handler(&self, database: &DatabaseName, handler: &RoutingTableHandler) {
        let mut handlers = self.handlers.write();
        let registered = handlers
            .get(database)
            .is_some_and(|h| std::ptr::eq(Arc::as_ptr(h), handler));
        if registered {
            handlers.remove(database);
            debug!(database = %database, "Routing table handler removed");
        }
    }

    /// 퍼지 지연보다 오래 만료된 핸들러 제거
    pub fn remove_aged(&self) {
        // age checks lock each handler, so they run on a snapshot
        let aged: Vec<(DatabaseName, Arc<RoutingTableHandler>)> = self
            .handlers
            .read()
            .iter()
            .map(|(db, h)| (db.clone(), h.clone()))
            .filter(|(_, h)| h.is_routing_table_aged())
            .collect();

        if aged.is_empty() {
            return;
        }

        let mut handlers = self.handlers.write();
        for (database, handler) in aged {
            let same = handlers.get(&database).is_some_and(|h| Arc::ptr_eq(h, &handler));
            if same {
                handlers.remove(&database);
                info!(
                    database = %database,
                    "Routing table handler has been removed because it has not been used for a long time"
                );
            }
        }
    }

    /// 모든 라우팅 테이블의 서버 합집합
    pub fn all_servers(&self) -> Vec<ServerAddress> {
        let handlers: Vec<Arc<RoutingTableHandler>> = self.handlers.read().values().cloned().collect();
        dedup_addresses(handlers.iter().flat_map(|h| h.servers()))
    }

    /// 등록된 데이터베이스 이름
    pub fn databases(&self) -> Vec<DatabaseName> {
        self.handlers.read().keys().cloned().collect()
    }

    /// 등록된 핸들러 수
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// 비어 있는지 확인
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl fmt::Debug for RoutingTableRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingTableRegistry")
            .field("databases", &self.databases())
            .finish_non_exhaustive()
    }
}
