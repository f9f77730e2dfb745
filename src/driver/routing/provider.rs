//! 라우팅 연결 프로바이더
//!
//! 라우팅 테이블 레지스트리와 주소별 연결 풀을 묶어, 데이터베이스와 접근 모드에 맞는
//! 서버의 연결을 [`RoutedConnection`]으로 제공합니다.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::super::clock::Clock;
use super::super::connection::{AcquireParams, BoltConnection, ConnectionFactory};
use super::super::error::{DriverError, DriverResult};
use super::super::metrics::{MetricsListener, PoolMetrics};
use super::super::pool::{ConnectionPool, PoolConfig};
use super::super::types::{AuthTokenSupplier, DatabaseName, SecurityPlan, ServerAddress};
use super::connection::RoutedConnection;
use super::handler::RoutingFailureListener;
use super::policy::{RoutingPolicy, ServerSelector};
use super::rediscovery::{ConnectionSource, Rediscovery, RouteRediscovery, ServerAddressResolver};
use super::registry::{RoutingTableHandlerFactory, RoutingTableRegistry};
use super::table::RoutingTable;
use crate::bolt::{AccessMode, AuthToken};

/// 라우팅 URI 스킴
const ROUTING_SCHEMES: [&str; 3] = ["zeta4g", "zeta4g+s", "zeta4g+ssc"];

// ============================================================================
// RoutingConfig - 라우팅 설정
// ============================================================================

/// 라우팅 설정
#[derive(Clone)]
pub struct RoutingConfig {
    /// 초기 라우터 주소 목록
    pub initial_routers: Vec<ServerAddress>,
    /// 라우팅 컨텍스트 (ROUTE 요청과 연결 생성에 전달)
    pub routing_context: HashMap<String, String>,
    /// 만료된 라우팅 테이블을 제거하기까지의 지연
    pub routing_table_purge_delay: Duration,
    /// 서버 선택 정책
    pub policy: RoutingPolicy,
    /// 주소별 풀 설정
    pub pool: PoolConfig,
    /// 초기 라우터 주소 해석기
    pub resolver: Option<ServerAddressResolver>,
}

impl RoutingConfig {
    /// 빌더 생성
    pub fn builder() -> RoutingConfigBuilder {
        RoutingConfigBuilder::default()
    }

    /// 라우팅 URI에서 설정 생성
    ///
    /// `zeta4g://host1:port1,host2:port2?region=eu` 형식입니다. 스킴의 `+s`, `+ssc`는
    /// 보안 설정으로, 쿼리 파라미터는 라우팅 컨텍스트로 변환됩니다.
    pub fn from_uri(uri: &str) -> DriverResult<Self> {
        let scheme = uri.split_once("://").map(|(scheme, _)| scheme).unwrap_or_default();
        let routers = parse_routing_uri(uri)?;
        let context = parse_routing_context(uri)?;
        Self::builder()
            .initial_routers(routers)
            .routing_context(context)
            .pool(PoolConfig::builder().security_plan(SecurityPlan::from_scheme(scheme)).build())
            .build()
    }
}

impl fmt::Debug for RoutingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingConfig")
            .field("initial_routers", &self.initial_routers)
            .field("routing_context", &self.routing_context)
            .field("routing_table_purge_delay", &self.routing_table_purge_delay)
            .field("policy", &self.policy)
            .field("pool", &self.pool)
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

/// 라우팅 설정 빌더
pub struct RoutingConfigBuilder {
    initial_routers: Vec<ServerAddress>,
    routing_context: HashMap<String, String>,
    routing_table_purge_delay: Duration,
    policy: RoutingPolicy,
    pool: PoolConfig,
    resolver: Option<ServerAddressResolver>,
}

impl Default for RoutingConfigBuilder {
    fn default() -> Self {
        Self {
            initial_routers: Vec::new(),
            routing_context: HashMap::new(),
            routing_table_purge_delay: Duration::from_secs(30),
            policy: RoutingPolicy::default(),
            pool: PoolConfig::default(),
            resolver: None,
        }
    }
}

impl RoutingConfigBuilder {
    /// 초기 라우터 설정
    pub fn initial_routers(mut self, routers: Vec<ServerAddress>) -> Self {
        self.initial_routers = routers;
        self
    }

    /// 라우팅 컨텍스트 설정
    pub fn routing_context(mut self, context: HashMap<String, String>) -> Self {
        self.routing_context = context;
        self
    }

    /// 라우팅 테이블 퍼지 지연 설정
    pub fn routing_table_purge_delay(mut self, delay: Duration) -> Self {
        self.routing_table_purge_delay = delay;
        self
    }

    /// 서버 선택 정책 설정
    pub fn policy(mut self, policy: RoutingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// 풀 설정
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// 초기 라우터 주소 해석기 설정
    pub fn resolver(mut self, resolver: ServerAddressResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// 빌드 (초기 라우터가 없으면 설정 에러)
    pub fn build(self) -> DriverResult<RoutingConfig> {
        if self.initial_routers.is_empty() {
            return Err(DriverError::configuration("At least one router is required"));
        }
        let mut pool = self.pool;
        pool.routing_context = self.routing_context.clone();
        Ok(RoutingConfig {
            initial_routers: self.initial_routers,
            routing_context: self.routing_context,
            routing_table_purge_delay: self.routing_table_purge_delay,
            policy: self.policy,
            pool,
            resolver: self.resolver,
        })
    }
}

// ============================================================================
// RoutedConnectionProvider - 라우팅 연결 프로바이더
// ============================================================================

/// 라우팅 연결 프로바이더
pub struct RoutedConnectionProvider {
    config: RoutingConfig,
    factory: Arc<dyn ConnectionFactory>,
    clock: Arc<dyn Clock>,
    metrics_listener: Arc<dyn MetricsListener>,
    pools: Mutex<HashMap<ServerAddress, Arc<ConnectionPool>>>,
    registry: Arc<RoutingTableRegistry>,
    selector: ServerSelector,
    closed: AtomicBool,
}

/// 주소별 풀에서 라우터 연결을 얻는 연결 소스
struct PoolSource(Weak<RoutedConnectionProvider>);

#[async_trait]
impl ConnectionSource for PoolSource {
    async fn acquire(&self, address: &ServerAddress, params: &AcquireParams) -> DriverResult<Box<dyn BoltConnection>> {
        let provider = self
            .0
            .upgrade()
            .ok_or_else(|| DriverError::closed("Connection provider has been closed"))?;
        let pool = provider.pool_for(address)?;
        let connection = pool.acquire(params).await?;
        Ok(Box::new(connection))
    }
}

impl RoutedConnectionProvider {
    /// ROUTE 기반 재탐색으로 프로바이더 생성
    pub fn new(
        config: RoutingConfig,
        factory: Arc<dyn ConnectionFactory>,
        clock: Arc<dyn Clock>,
        metrics_listener: Arc<dyn MetricsListener>,
    ) -> Arc<Self> {
        let mut rediscovery = RouteRediscovery::new(
            config.initial_routers.clone(),
            config.routing_context.clone(),
            clock.clone(),
        );
        if let Some(resolver) = &config.resolver {
            rediscovery = rediscovery.with_resolver(resolver.clone());
        }
        Self::with_rediscovery(config, factory, Arc::new(rediscovery), clock, metrics_listener)
    }

    /// 재탐색기를 지정해 프로바이더 생성
    pub fn with_rediscovery(
        config: RoutingConfig,
        factory: Arc<dyn ConnectionFactory>,
        rediscovery: Arc<dyn Rediscovery>,
        clock: Arc<dyn Clock>,
        metrics_listener: Arc<dyn MetricsListener>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|provider: &Weak<Self>| {
            let retainer = provider.clone();
            let handler_factory = RoutingTableHandlerFactory::new(
                rediscovery,
                Arc::new(PoolSource(provider.clone())),
                clock.clone(),
                config.routing_table_purge_delay,
                Arc::new(move |addresses: &[ServerAddress]| {
                    if let Some(provider) = retainer.upgrade() {
                        provider.retain(addresses);
                    }
                }),
            );
            let selector = ServerSelector::new(config.policy, Default::default());

            Self {
                config,
                factory,
                clock,
                metrics_listener,
                pools: Mutex::new(HashMap::new()),
                registry: RoutingTableRegistry::new(handler_factory),
                selector,
                closed: AtomicBool::new(false),
            }
        })
    }

    /// 라우팅 설정
    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// 라우팅 테이블 레지스트리
    pub fn registry(&self) -> &Arc<RoutingTableRegistry> {
        &self.registry
    }

    /// 연결 획득
    ///
    /// 라우팅 테이블을 확보하고 접근 모드에 맞는 서버 중 사용 중 연결이 가장 적은
    /// 서버를 고릅니다. 연결할 수 없는 서버는 테이블에서 지우고 다음 서버를 시도합니다.
    pub async fn connect(self: &Arc<Self>, params: &AcquireParams) -> DriverResult<RoutedConnection> {
        self.ensure_open()?;
        let handler = self.registry.ensure_routing_table(&params.database, params).await?;
        let params = params.clone().with_database(handler.database().clone());
        let mode = params.access_mode;

        let mut attempted = HashSet::new();
        loop {
            let table = handler.routing_table();
            let candidates: Vec<ServerAddress> = table
                .servers_for(mode)
                .iter()
                .filter(|address| !attempted.contains(*address))
                .cloned()
                .collect();

            let Some(address) = self.selector.select(mode, &candidates) else {
                return Err(DriverError::session_expired(format!(
                    "Failed to obtain connection towards {} server. Known routing table is: {}",
                    mode_name(mode),
                    table
                )));
            };
            attempted.insert(address.clone());

            match self.pool_for(&address)?.acquire(&params).await {
                Ok(connection) => {
                    let counter = self.selector.counter().clone();
                    counter.increment(&address);
                    let listener: Arc<dyn RoutingFailureListener> = handler.clone();
                    return Ok(RoutedConnection::new(Box::new(connection), mode, listener, Some(counter)));
                }
                Err(e) if e.is_connectivity_error() => {
                    warn!(
                        address = %address,
                        database = %handler.database(),
                        error = %e,
                        "Failed to obtain a connection, trying the next server"
                    );
                    handler.on_connection_failure(&address);
                }
                Err(DriverError::Closed(_)) if !self.is_closed() => {
                    debug!(address = %address, "Connection pool was retired while connecting, trying the next server");
                    self.drop_closed_pool(&address);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 주소별 풀 조회 (없으면 생성)
    fn pool_for(&self, address: &ServerAddress) -> DriverResult<Arc<ConnectionPool>> {
        self.ensure_open()?;
        let mut pools = self.pools.lock();
        let pool = pools.entry(address.clone()).or_insert_with(|| {
            debug!(address = %address, "Creating connection pool");
            ConnectionPool::new(
                address.clone(),
                self.config.pool.clone(),
                self.factory.clone(),
                self.clock.clone(),
                self.metrics_listener.clone(),
            )
        });
        Ok(pool.clone())
    }

    fn drop_closed_pool(&self, address: &ServerAddress) {
        let mut pools = self.pools.lock();
        if pools.get(address).is_some_and(|pool| pool.is_closed()) {
            pools.remove(address);
        }
    }

    /// 주어진 주소만 남기고, 사용 중 연결이 없는 나머지 풀은 닫음
    pub fn retain(&self, addresses: &[ServerAddress]) {
        let retained: HashSet<&ServerAddress> = addresses.iter().collect();
        let removed: Vec<Arc<ConnectionPool>> = {
            let mut pools = self.pools.lock();
            let mut removed = Vec::new();
            pools.retain(|address, pool| {
                let unused = self.selector.counter().get(address) == 0 && pool.in_use() == 0;
                if retained.contains(address) || !unused {
                    return true;
                }
                removed.push(pool.clone());
                false
            });
            removed
        };

        for pool in removed {
            info!(address = %pool.address(), "Closing connection pool towards server that is no longer in the routing table");
            close_pool_detached(pool);
        }
    }

    /// 멀티 데이터베이스 지원 여부
    pub async fn supports_multi_db(&self, token: AuthToken) -> DriverResult<bool> {
        self.detect_feature(token, Feature::MultiDb).await
    }

    /// 세션 단위 인증 지원 여부
    pub async fn supports_session_auth(&self, token: AuthToken) -> DriverResult<bool> {
        self.detect_feature(token, Feature::SessionAuth).await
    }

    async fn detect_feature(&self, token: AuthToken, feature: Feature) -> DriverResult<bool> {
        let mut addresses = self.registry.all_servers();
        if addresses.is_empty() {
            addresses = self.config.initial_routers.clone();
        }

        let mut last_error = None;
        for address in &addresses {
            let pool = self.pool_for(address)?;
            let result = match feature {
                Feature::MultiDb => pool.supports_multi_db(token.clone()).await,
                Feature::SessionAuth => pool.supports_session_auth(token.clone()).await,
            };
            match result {
                Ok(supported) => return Ok(supported),
                Err(e) if e.is_connectivity_error() => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        let message = format!(
            "Failed to perform {} feature detection with the following servers: {:?}",
            feature.name(),
            addresses.iter().map(ToString::to_string).collect::<Vec<_>>()
        );
        Err(match last_error {
            Some(cause) => DriverError::service_unavailable_caused_by(message, cause),
            None => DriverError::service_unavailable(message),
        })
    }

    /// 연결 확인
    ///
    /// 시스템 데이터베이스(멀티 데이터베이스를 지원하지 않으면 기본 데이터베이스)의
    /// 라우팅 테이블을 읽기 모드로 확보합니다.
    pub async fn verify_connectivity(&self, auth: AuthTokenSupplier) -> DriverResult<()> {
        self.ensure_open()?;
        let token = auth().await?;
        let database = if self.supports_multi_db(token).await? {
            DatabaseName::system()
        } else {
            DatabaseName::default_database()
        };
        let params = AcquireParams::new(auth)
            .with_database(database.clone())
            .with_access_mode(AccessMode::Read);

        match self.registry.ensure_routing_table(&database, &params).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_service_unavailable() => Err(DriverError::service_unavailable_caused_by(
                "Unable to connect to database management service, ensure the database is running \
                 and that there is a working network connection to it.",
                e,
            )),
            Err(e) => Err(e),
        }
    }

    /// 데이터베이스의 라우팅 테이블 스냅샷
    pub fn routing_table(&self, database: &DatabaseName) -> Option<RoutingTable> {
        self.registry.get_handler(database).map(|h| h.routing_table())
    }

    /// 프로바이더 종료
    ///
    /// 여러 번 호출해도 안전합니다. 모든 풀을 닫은 뒤 연결 팩토리를 닫습니다.
    pub async fn close(&self) -> DriverResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let pools: Vec<Arc<ConnectionPool>> = self.pools.lock().drain().map(|(_, pool)| pool).collect();
        info!(pools = pools.len(), "Closing routed connection provider");
        for pool in pools {
            pool.close().await?;
        }
        self.factory.close().await
    }

    /// 닫힘 여부
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.is_closed() {
            return Err(DriverError::closed("Connection provider has been closed"));
        }
        Ok(())
    }

    /// 초기 라우터 목록
    pub fn initial_routers(&self) -> &[ServerAddress] {
        &self.config.initial_routers
    }

    /// 프로바이더 메트릭
    pub fn metrics(&self) -> RoutingMetrics {
        let pools: Vec<Arc<ConnectionPool>> = self.pools.lock().values().cloned().collect();
        let mut aggregate = PoolMetrics::default();
        for pool in &pools {
            aggregate.merge(&pool.metrics());
        }

        RoutingMetrics {
            pool_count: pools.len(),
            routing_table_count: self.registry.len(),
            pools: aggregate,
        }
    }
}

impl fmt::Debug for RoutedConnectionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutedConnectionProvider")
            .field("initial_routers", &self.config.initial_routers)
            .field("closed", &self.is_closed())
            .field("policy", &self.selector.policy())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
enum Feature {
    MultiDb,
    SessionAuth,
}

impl Feature {
    fn name(self) -> &'static str {
        match self {
            Feature::MultiDb => "multi-databases",
            Feature::SessionAuth => "session auth",
        }
    }
}

fn mode_name(mode: AccessMode) -> &'static str {
    match mode {
        AccessMode::Read => "READ",
        AccessMode::Write => "WRITE",
    }
}

fn close_pool_detached(pool: Arc<ConnectionPool>) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move {
            if let Err(e) = pool.close().await {
                warn!(address = %pool.address(), error = %e, "Connection pool close has failed");
            }
        });
    }
}

/// 라우팅 프로바이더 메트릭
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingMetrics {
    /// 연결 풀 수
    pub pool_count: usize,
    /// 라우팅 테이블 수
    pub routing_table_count: usize,
    /// 모든 풀의 합산 메트릭
    pub pools: PoolMetrics,
}

// ============================================================================
// URI parsing
// ============================================================================

fn split_routing_uri(uri: &str) -> DriverResult<(&str, Option<&str>)> {
    let (scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| DriverError::configuration(format!("Invalid routing URI: {}", uri)))?;
    if !ROUTING_SCHEMES.contains(&scheme) {
        return Err(DriverError::configuration(format!("Unsupported routing scheme: {}", scheme)));
    }
    Ok(match rest.split_once('?') {
        Some((hosts, query)) => (hosts.trim_end_matches('/'), Some(query)),
        None => (rest.trim_end_matches('/'), None),
    })
}

/// URI가 라우팅용인지 확인
pub fn is_routing_uri(uri: &str) -> bool {
    uri.split_once("://")
        .is_some_and(|(scheme, _)| ROUTING_SCHEMES.contains(&scheme))
}

/// URI에서 다중 라우터 파싱
pub fn parse_routing_uri(uri: &str) -> DriverResult<Vec<ServerAddress>> {
    let (hosts, _) = split_routing_uri(uri)?;
    let routers = hosts
        .split(',')
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(ServerAddress::parse)
        .collect::<DriverResult<Vec<_>>>()?;

    if routers.is_empty() {
        return Err(DriverError::configuration("No routers specified"));
    }
    Ok(routers)
}

/// URI 쿼리에서 라우팅 컨텍스트 파싱
///
/// 첫 번째 라우터 주소가 `address` 키로 추가되므로 쿼리에서 `address`는 쓸 수 없습니다.
pub fn parse_routing_context(uri: &str) -> DriverResult<HashMap<String, String>> {
    let (_, query) = split_routing_uri(uri)?;
    let mut context = HashMap::new();

    for pair in query.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            DriverError::configuration(format!("Invalid parameters: '{}' in URI '{}'", pair, uri))
        })?;
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            return Err(DriverError::configuration(format!(
                "Illegal empty routing context key or value in URI '{}'",
                uri
            )));
        }
        if key == "address" {
            return Err(DriverError::configuration(
                "The key 'address' is reserved for routing context.",
            ));
        }
        if context.insert(key.to_string(), value.to_string()).is_some() {
            return Err(DriverError::configuration(format!(
                "Duplicated query parameters with key '{}' in URI '{}'",
                key, uri
            )));
        }
    }

    let first = parse_routing_uri(uri)?.remove(0);
    context.insert("address".to_string(), first.to_string());
    Ok(context)
}
