//! Connection Pool
//!
//! 서버 주소 하나에 대한 연결 풀링
//!
//! 풀의 모든 상태(엔트리 목록, 대기열, 닫힘 여부)는 하나의 `Mutex` 아래에 있으며,
//! 잠금을 쥔 채로 `.await` 하지 않습니다. 연결 종료, 활성 검사, 재인증 같은 I/O는
//! 항상 잠금을 놓은 뒤 수행합니다.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::clock::{duration_millis, Clock};
use super::connection::{AcquireParams, BoltConnection, ConnectParams, ConnectionFactory, ConnectionState};
use super::error::{DriverError, DriverResult};
use super::metrics::{MetricsListener, PoolCounters, PoolGauges, PoolMetrics};
use super::types::{static_auth, AuthInfo, SecurityPlan, ServerAddress};
use crate::bolt::{AuthToken, BoltVersion, CollectingHandler, Message, ResponseHandler};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// PoolConfig - 풀 설정
// ============================================================================

/// 연결 풀 설정
///
/// | 필드 | 기본값 | 설명 |
/// |------|--------|------|
/// | `max_size` | 100 | 최대 연결 수 (예약된 슬롯 포함) |
/// | `acquisition_timeout` | 60초 | 풀이 가득 찼을 때 대기 시간 (0이면 즉시 실패) |
/// | `max_lifetime` | 1시간 | 연결 최대 수명 (None이면 무제한) |
/// | `idle_before_test` | None | 이 시간 이상 유휴였던 연결은 RESET으로 검사 |
/// | `connect_timeout` | 30초 | 물리 연결 타임아웃 |
/// | `max_pending_acquisitions` | 100 | 대기열 최대 길이 |
/// | `fallback_on_reauth_failure` | true | 재인증 실패 시 다른 연결로 재시도 |
///
/// # 예시
///
/// ```rust
/// use zeta4g_bolt_connection::driver::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::builder()
///     .max_size(50)
///     .acquisition_timeout(Duration::from_secs(5))
///     .idle_before_test(Duration::from_secs(30))
///     .build();
/// assert_eq!(config.max_size, 50);
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// 최대 연결 수
    pub max_size: usize,
    /// 획득 대기 타임아웃
    pub acquisition_timeout: Duration,
    /// 연결 최대 수명
    pub max_lifetime: Option<Duration>,
    /// 활성 검사 전 유휴 시간
    pub idle_before_test: Option<Duration>,
    /// 연결 타임아웃
    pub connect_timeout: Duration,
    /// 대기열 최대 길이
    pub max_pending_acquisitions: usize,
    /// 재인증 실패 시 폴백 여부
    pub fallback_on_reauth_failure: bool,
    /// 사용자 에이전트
    pub user_agent: String,
    /// 라우팅 컨텍스트
    pub routing_context: HashMap<String, String>,
    /// 보안 설정
    pub security_plan: SecurityPlan,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            acquisition_timeout: Duration::from_secs(60),
            max_lifetime: Some(Duration::from_secs(3600)),
            idle_before_test: None,
            connect_timeout: Duration::from_secs(30),
            max_pending_acquisitions: 100,
            fallback_on_reauth_failure: true,
            user_agent: format!("zeta4g-bolt-connection/{}", env!("CARGO_PKG_VERSION")),
            routing_context: HashMap::new(),
            security_plan: SecurityPlan::default(),
        }
    }
}

impl PoolConfig {
    /// 빌더 패턴으로 풀 설정 생성
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }
}

/// 풀 설정 빌더
#[derive(Debug, Clone, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// 최대 연결 수 설정
    pub fn max_size(mut self, size: usize) -> Self {
        self.config.max_size = size;
        self
    }

    /// 획득 타임아웃 설정
    pub fn acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquisition_timeout = timeout;
        self
    }

    /// 연결 최대 수명 설정
    pub fn max_lifetime(mut self, duration: Duration) -> Self {
        self.config.max_lifetime = Some(duration);
        self
    }

    /// 연결 최대 수명 제한 없음
    pub fn unlimited_lifetime(mut self) -> Self {
        self.config.max_lifetime = None;
        self
    }

    /// 활성 검사 전 유휴 시간 설정
    pub fn idle_before_test(mut self, duration: Duration) -> Self {
        self.config.idle_before_test = Some(duration);
        self
    }

    /// 연결 타임아웃 설정
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.config.connect_timeout = duration;
        self
    }

    /// 대기열 최대 길이 설정
    pub fn max_pending_acquisitions(mut self, size: usize) -> Self {
        self.config.max_pending_acquisitions = size;
        self
    }

    /// 재인증 실패 시 폴백 여부 설정
    pub fn fallback_on_reauth_failure(mut self, fallback: bool) -> Self {
        self.config.fallback_on_reauth_failure = fallback;
        self
    }

    /// 사용자 에이전트 설정
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    /// 라우팅 컨텍스트 설정
    pub fn routing_context(mut self, context: HashMap<String, String>) -> Self {
        self.config.routing_context = context;
        self
    }

    /// 보안 설정
    pub fn security_plan(mut self, plan: SecurityPlan) -> Self {
        self.config.security_plan = plan;
        self
    }

    /// 설정 빌드
    pub fn build(self) -> PoolConfig {
        self.config
    }
}

// ============================================================================
// Pool state - 풀 내부 상태
// ============================================================================

/// 풀 엔트리
///
/// `connection`은 엔트리가 유휴일 때만 채워져 있습니다. 예약 직후(연결 생성 중)와
/// 임대 중에는 비어 있고 `available`은 false입니다.
struct ConnectionEntry {
    id: u64,
    connection: Option<Box<dyn BoltConnection>>,
    available: bool,
    created_at: i64,
    last_used_at: i64,
}

enum Handoff {
    /// 반환된 연결을 직접 전달
    Lease(PooledConnection),
    /// 대기자 몫으로 예약된 빈 슬롯 (바로 새 연결을 만듦)
    Reserved { entry_id: u64 },
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Handoff>,
}

#[derive(Default)]
struct PoolState {
    entries: Vec<ConnectionEntry>,
    pending: VecDeque<Waiter>,
    closed: bool,
    min_auth_timestamp: i64,
}

impl PoolState {
    fn remove_entry(&mut self, entry_id: u64) -> Option<ConnectionEntry> {
        let index = self.entries.iter().position(|e| e.id == entry_id)?;
        Some(self.entries.remove(index))
    }

    fn entry_mut(&mut self, entry_id: u64) -> Option<&mut ConnectionEntry> {
        self.entries.iter_mut().find(|e| e.id == entry_id)
    }
}

enum Step {
    Existing {
        lease: PooledConnection,
        last_used_at: i64,
        reauth: bool,
    },
    Reserved {
        entry_id: u64,
        first: bool,
    },
    Queued(QueuedAcquisition),
}

enum Verdict {
    Use { reauth: bool },
    Discard(&'static str),
    VersionTooLow(BoltVersion),
}

// ============================================================================
// ConnectionPool - 연결 풀
// ============================================================================

/// 연결 풀
///
/// 항상 `Arc`로 공유됩니다. 임대된 연결([`PooledConnection`])이 풀을 참조하여
/// 닫히거나 drop될 때 풀로 돌아옵니다.
pub struct ConnectionPool {
    /// 풀 식별자 (메트릭용)
    pool_id: String,
    /// 서버 주소
    address: ServerAddress,
    /// 풀 설정
    config: PoolConfig,
    /// 물리 연결 팩토리
    factory: Arc<dyn ConnectionFactory>,
    /// 시계
    clock: Arc<dyn Clock>,
    /// 메트릭 수신자
    metrics_listener: Arc<dyn MetricsListener>,
    /// 풀 상태
    state: Mutex<PoolState>,
    /// 누적 카운터
    counters: PoolCounters,
    /// 다음 엔트리/대기자 ID
    next_id: AtomicU64,
}

struct GaugeHandle(Weak<ConnectionPool>);

impl PoolGauges for GaugeHandle {
    fn in_use(&self) -> usize {
        self.0.upgrade().map(|pool| pool.in_use()).unwrap_or(0)
    }

    fn idle(&self) -> usize {
        self.0.upgrade().map(|pool| pool.idle()).unwrap_or(0)
    }
}

impl ConnectionPool {
    /// 새 연결 풀 생성
    pub fn new(
        address: ServerAddress,
        config: PoolConfig,
        factory: Arc<dyn ConnectionFactory>,
        clock: Arc<dyn Clock>,
        metrics_listener: Arc<dyn MetricsListener>,
    ) -> Arc<Self> {
        let pool_id = format!(
            "{}:{}-{}",
            address.host,
            address.port,
            NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed)
        );
        let pool = Arc::new(Self {
            pool_id,
            address,
            config,
            factory,
            clock,
            metrics_listener,
            state: Mutex::new(PoolState::default()),
            counters: PoolCounters::default(),
            next_id: AtomicU64::new(1),
        });
        pool.metrics_listener
            .register_pool(&pool.pool_id, Arc::new(GaugeHandle(Arc::downgrade(&pool))));
        pool
    }

    /// 서버 주소
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// 풀 식별자
    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    /// 풀 설정
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// 연결 획득
    ///
    /// 유휴 연결을 재사용하거나, 여유가 있으면 새로 만들고, 풀이 가득 찼으면
    /// `acquisition_timeout` 동안 대기합니다.
    pub async fn acquire(self: &Arc<Self>, params: &AcquireParams) -> DriverResult<PooledConnection> {
        self.ensure_open()?;
        let token = (params.auth)().await?;
        let started = Instant::now();

        let result = self.acquire_with_token(params, &token).await;
        match &result {
            Ok(_) => {
                PoolCounters::incr(&self.counters.acquired);
                self.metrics_listener.after_acquired(&self.pool_id, started.elapsed());
            }
            Err(DriverError::AcquisitionTimeout { .. }) => {
                PoolCounters::incr(&self.counters.timed_out);
                self.metrics_listener.after_timed_out_to_acquire(&self.pool_id);
            }
            Err(_) => {}
        }
        result
    }

    async fn acquire_with_token(
        self: &Arc<Self>,
        params: &AcquireParams,
        token: &AuthToken,
    ) -> DriverResult<PooledConnection> {
        // one deadline for the whole acquisition, however often it waits
        let deadline = Instant::now() + self.config.acquisition_timeout;
        let mut requeue = false;
        let mut connect_failures = 0;
        loop {
            let mut discarded = Vec::new();
            let step = self.next_step(params, token, requeue, &mut discarded);
            for connection in discarded {
                self.closed_one();
                close_quietly(connection).await;
            }

            let (entry_id, first) = match step? {
                Step::Existing {
                    mut lease,
                    last_used_at,
                    reauth,
                } => {
                    if self.needs_liveness_check(last_used_at) {
                        if let Err(e) = send_and_collect(&mut lease, vec![Message::Reset]).await {
                            debug!(address = %self.address, error = %e, "Liveness check failed, purging connection");
                            drop(lease);
                            continue;
                        }
                    }
                    if let Some(lease) = self.finish_existing(lease, reauth, token).await? {
                        debug!(address = %self.address, "Connection acquired from the pool");
                        return Ok(lease);
                    }
                    continue;
                }
                Step::Reserved { entry_id, first } => (entry_id, first),
                Step::Queued(queued) => {
                    requeue = true;
                    match self.wait_for_handoff(queued, deadline).await? {
                        Handoff::Reserved { entry_id } => (entry_id, false),
                        Handoff::Lease(lease) => {
                            if let Some(lease) = self.accept_handoff(lease, params, token).await? {
                                return Ok(lease);
                            }
                            continue;
                        }
                    }
                }
            };

            match self.create_connection(entry_id, first, params, token).await {
                Ok(lease) => return Ok(lease),
                Err(e @ DriverError::MinVersionAcquisition { .. }) => return Err(e),
                Err(e) if e.is_connectivity_error() && connect_failures == 0 => {
                    connect_failures += 1;
                    debug!(address = %self.address, error = %e, "Connection attempt failed, retrying once");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 잠금 아래에서 다음 획득 단계를 결정
    ///
    /// 이미 한 번 대기했던 획득(`requeue`)은 대기열 맨 앞으로 다시 들어갑니다.
    fn next_step(
        self: &Arc<Self>,
        params: &AcquireParams,
        token: &AuthToken,
        requeue: bool,
        discarded: &mut Vec<Box<dyn BoltConnection>>,
    ) -> DriverResult<Step> {
        let now = self.clock.millis();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(DriverError::closed("Connection pool is closed"));
        }

        let first = state.entries.is_empty();
        let min_auth_timestamp = state.min_auth_timestamp;
        let mut index = 0;
        while index < state.entries.len() {
            let entry = &mut state.entries[index];
            let verdict = match (entry.available, entry.connection.as_deref()) {
                (true, Some(connection)) => self.inspect(
                    connection,
                    entry.created_at,
                    now,
                    params.min_version,
                    token,
                    min_auth_timestamp,
                ),
                _ => {
                    index += 1;
                    continue;
                }
            };

            match verdict {
                Verdict::VersionTooLow(version) => {
                    return Err(DriverError::MinVersionAcquisition { version });
                }
                Verdict::Discard(reason) => {
                    debug!(address = %self.address, reason, "Discarding pooled connection");
                    let removed = state.entries.remove(index);
                    discarded.extend(removed.connection);
                }
                Verdict::Use { reauth } => {
                    entry.available = false;
                    let last_used_at = entry.last_used_at;
                    let created_at = entry.created_at;
                    let entry_id = entry.id;
                    let connection = entry
                        .connection
                        .take()
                        .ok_or_else(|| DriverError::internal("Available entry without connection"))?;
                    let lease = PooledConnection::new(self.clone(), entry_id, connection, created_at);
                    return Ok(Step::Existing {
                        lease,
                        last_used_at,
                        reauth,
                    });
                }
            }
        }

        if state.entries.len() < self.config.max_size {
            let entry_id = self.next_id.fetch_add(1, Ordering::Relaxed);
            state.entries.push(ConnectionEntry {
                id: entry_id,
                connection: None,
                available: false,
                created_at: now,
                last_used_at: now,
            });
            return Ok(Step::Reserved { entry_id, first });
        }

        if state.pending.len() >= self.config.max_pending_acquisitions {
            return Err(DriverError::PendingQueueFull);
        }
        if self.config.acquisition_timeout.is_zero() {
            return Err(DriverError::acquisition_timeout(self.config.acquisition_timeout));
        }

        let (tx, rx) = oneshot::channel();
        let waiter_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let waiter = Waiter { id: waiter_id, tx };
        if requeue {
            state.pending.push_front(waiter);
        } else {
            state.pending.push_back(waiter);
        }
        debug!(address = %self.address, pending = state.pending.len(), "Pool is full, queueing acquisition");
        Ok(Step::Queued(QueuedAcquisition {
            pool: self.clone(),
            waiter_id,
            rx: Some(rx),
        }))
    }

    /// 유휴 연결을 재사용할 수 있는지 판정
    fn inspect(
        &self,
        connection: &dyn BoltConnection,
        created_at: i64,
        now: i64,
        min_version: Option<BoltVersion>,
        token: &AuthToken,
        min_auth_timestamp: i64,
    ) -> Verdict {
        if connection.state() != ConnectionState::Open {
            return Verdict::Discard("connection is not open");
        }

        let version = connection.protocol_version();
        if let Some(min_version) = min_version {
            if min_version > version {
                return Verdict::VersionTooLow(version);
            }
        }

        if let Some(max_lifetime) = self.config.max_lifetime {
            if now.saturating_sub(created_at) > duration_millis(max_lifetime) {
                return Verdict::Discard("max lifetime exceeded");
            }
        }

        let reauth = match connection.auth_info() {
            Some(AuthInfo { token: current, ack_millis }) => {
                let expired = min_auth_timestamp > 0 && ack_millis <= min_auth_timestamp;
                expired || current != *token
            }
            None => true,
        };
        if reauth && !version.supports_reauth() {
            return Verdict::Discard("re-authentication is not supported");
        }

        Verdict::Use { reauth }
    }

    fn needs_liveness_check(&self, last_used_at: i64) -> bool {
        match self.config.idle_before_test {
            Some(idle) => last_used_at.saturating_add(duration_millis(idle)) < self.clock.millis(),
            None => false,
        }
    }

    /// 재사용 연결에 재인증을 적용
    ///
    /// 재인증에 실패하면 연결을 제거하고, 폴백이 허용되면 `None`을 돌려줍니다.
    async fn finish_existing(
        &self,
        mut lease: PooledConnection,
        reauth: bool,
        token: &AuthToken,
    ) -> DriverResult<Option<PooledConnection>> {
        if reauth {
            let messages = vec![Message::Logoff, Message::Logon(token.clone())];
            if let Err(e) = send_and_collect(&mut lease, messages).await {
                warn!(address = %self.address, error = %e, "Re-authentication failed, purging connection");
                drop(lease);
                return if self.config.fallback_on_reauth_failure {
                    Ok(None)
                } else {
                    Err(e)
                };
            }
            debug!(address = %self.address, "Connection re-authenticated");
        }
        lease.purge_on_drop = false;
        Ok(Some(lease))
    }

    /// 대기열에서 반환된 연결을 받음
    async fn accept_handoff(
        &self,
        lease: PooledConnection,
        params: &AcquireParams,
        token: &AuthToken,
    ) -> DriverResult<Option<PooledConnection>> {
        let min_auth_timestamp = self.state.lock().min_auth_timestamp;
        let verdict = match lease.connection.as_deref() {
            Some(connection) => self.inspect(
                connection,
                lease.created_at,
                self.clock.millis(),
                params.min_version,
                token,
                min_auth_timestamp,
            ),
            None => Verdict::Discard("connection is missing"),
        };

        match verdict {
            Verdict::VersionTooLow(version) => {
                // lease goes back to the pool on drop
                drop(lease);
                Err(DriverError::MinVersionAcquisition { version })
            }
            Verdict::Discard(reason) => {
                debug!(address = %self.address, reason, "Discarding handed-off connection");
                let mut lease = lease;
                lease.purge_on_drop = true;
                drop(lease);
                Ok(None)
            }
            Verdict::Use { reauth } => {
                let mut lease = lease;
                lease.purge_on_drop = true;
                self.finish_existing(lease, reauth, token).await
            }
        }
    }

    /// 예약된 슬롯에 새 물리 연결 생성
    async fn create_connection(
        self: &Arc<Self>,
        entry_id: u64,
        first: bool,
        params: &AcquireParams,
        token: &AuthToken,
    ) -> DriverResult<PooledConnection> {
        let mut slot = SlotGuard {
            pool: self,
            entry_id,
            armed: true,
        };

        let auth_token = if first {
            token.clone()
        } else {
            (params.auth)().await?
        };

        let started = Instant::now();
        self.metrics_listener.before_creating(&self.pool_id);
        let connect_params = ConnectParams {
            address: self.address.clone(),
            routing_context: self.config.routing_context.clone(),
            user_agent: self.config.user_agent.clone(),
            connect_timeout: self.config.connect_timeout,
            security_plan: self.config.security_plan.clone(),
            database: params.database.clone(),
            auth_token,
            access_mode: params.access_mode,
            bookmarks: params.bookmarks.clone(),
            impersonated_user: params.impersonated_user.clone(),
            min_version: params.min_version,
            notification_config: params.notification_config.clone(),
        };

        let connection = match self.factory.connect(connect_params).await {
            Ok(connection) => connection,
            Err(e) => {
                PoolCounters::incr(&self.counters.failed_to_create);
                self.metrics_listener.after_failed_to_create(&self.pool_id);
                warn!(address = %self.address, error = %e, "Failed to create connection");
                return Err(e);
            }
        };

        let version = connection.protocol_version();
        if let Some(min_version) = params.min_version {
            if min_version > version {
                close_quietly(connection).await;
                return Err(DriverError::MinVersionAcquisition { version });
            }
        }

        let now = self.clock.millis();
        let rejected = {
            let mut state = self.state.lock();
            if state.closed {
                Some(DriverError::closed("Connection pool is closed"))
            } else if let Some(entry) = state.entry_mut(entry_id) {
                entry.created_at = now;
                entry.last_used_at = now;
                None
            } else {
                Some(DriverError::internal("Reserved pool slot disappeared"))
            }
        };
        if let Some(e) = rejected {
            close_quietly(connection).await;
            return Err(e);
        }
        slot.armed = false;

        PoolCounters::incr(&self.counters.created);
        self.metrics_listener.after_created(&self.pool_id, started.elapsed());
        debug!(address = %self.address, version = %version, "Connection created");

        let mut lease = PooledConnection::new(self.clone(), entry_id, connection, now);
        lease.purge_on_drop = false;
        Ok(lease)
    }

    /// 대기열에서 반환된 연결 또는 예약된 슬롯을 기다림
    ///
    /// 기한이 지나면 대기열에서 빠지고, 그 사이 도착한 전달물은 다음 대기자나 풀로 돌아갑니다.
    async fn wait_for_handoff(&self, mut queued: QueuedAcquisition, deadline: Instant) -> DriverResult<Handoff> {
        let outcome = match queued.rx.as_mut() {
            Some(rx) => tokio::time::timeout_at(deadline, rx).await,
            None => return Err(DriverError::internal("Queued acquisition without a receiver")),
        };
        match outcome {
            Ok(received) => {
                queued.rx = None;
                received.map_err(|_| DriverError::closed("Connection pool is closed"))
            }
            Err(_) => {
                drop(queued);
                Err(DriverError::acquisition_timeout(self.config.acquisition_timeout))
            }
        }
    }

    /// 가장 오래 기다린 대기자에게 빈 슬롯을 예약해 넘김
    ///
    /// 잠금 아래에서 호출되므로 새로 들어온 획득이 슬롯을 가로챌 수 없습니다.
    fn wake_waiter(&self, state: &mut PoolState) {
        while state.entries.len() < self.config.max_size {
            let Some(waiter) = state.pending.pop_front() else {
                return;
            };
            let entry_id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let now = self.clock.millis();
            state.entries.push(ConnectionEntry {
                id: entry_id,
                connection: None,
                available: false,
                created_at: now,
                last_used_at: now,
            });
            if waiter.tx.send(Handoff::Reserved { entry_id }).is_ok() {
                debug!(address = %self.address, "Free slot reserved for queued acquisition");
                return;
            }
            state.remove_entry(entry_id);
        }
    }

    /// 예약된 슬롯 해제
    fn release_slot(&self, entry_id: u64) {
        let mut state = self.state.lock();
        state.remove_entry(entry_id);
        self.wake_waiter(&mut state);
    }

    /// 연결 반환
    ///
    /// 대기자가 있으면 가장 오래 기다린 대기자에게 직접 넘기고, 없으면 유휴로 표시합니다.
    fn release(self: &Arc<Self>, entry_id: u64, connection: Box<dyn BoltConnection>, in_use_for: Duration) {
        self.metrics_listener.after_released(&self.pool_id, in_use_for);

        if connection.state() != ConnectionState::Open {
            self.purge(entry_id, Some(connection));
            return;
        }

        let now = self.clock.millis();
        let mut state = self.state.lock();
        if state.closed {
            state.remove_entry(entry_id);
            drop(state);
            self.closed_one();
            close_detached(connection);
            return;
        }

        let created_at = match state.entry_mut(entry_id) {
            Some(entry) => {
                entry.last_used_at = now;
                entry.created_at
            }
            None => {
                drop(state);
                close_detached(connection);
                return;
            }
        };

        let mut lease = PooledConnection::new(self.clone(), entry_id, connection, created_at);
        lease.purge_on_drop = false;
        while let Some(waiter) = state.pending.pop_front() {
            match waiter.tx.send(Handoff::Lease(lease)) {
                Ok(()) => {
                    debug!(address = %self.address, "Connection handed to queued acquisition");
                    return;
                }
                Err(Handoff::Lease(returned)) => lease = returned,
                Err(Handoff::Reserved { .. }) => return,
            }
        }

        if let (Some(connection), Some(entry)) = (lease.take_connection(), state.entry_mut(entry_id)) {
            entry.connection = Some(connection);
            entry.available = true;
        }
        debug!(address = %self.address, "Connection released to the pool");
    }

    /// 엔트리 제거 및 물리 연결 종료
    fn purge(&self, entry_id: u64, connection: Option<Box<dyn BoltConnection>>) {
        {
            let mut state = self.state.lock();
            state.remove_entry(entry_id);
            self.wake_waiter(&mut state);
        }
        self.closed_one();
        if let Some(connection) = connection {
            close_detached(connection);
        }
        debug!(address = %self.address, "Connection purged from the pool");
    }

    fn closed_one(&self) {
        PoolCounters::incr(&self.counters.closed);
        self.metrics_listener.after_closed(&self.pool_id);
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.state.lock().closed {
            return Err(DriverError::closed("Connection pool is closed"));
        }
        Ok(())
    }

    /// 인증 만료 처리
    ///
    /// 지금까지 인증된 모든 연결은 다음 획득 시 재인증되어야 합니다.
    pub fn on_expired(&self) {
        let now = self.clock.millis();
        let mut state = self.state.lock();
        state.min_auth_timestamp = state.min_auth_timestamp.max(now);
    }

    /// 연결 확인
    pub async fn verify_connectivity(self: &Arc<Self>, token: AuthToken) -> DriverResult<()> {
        let mut connection = self.acquire(&AcquireParams::new(static_auth(token))).await?;
        connection.close().await
    }

    /// 멀티 데이터베이스 지원 여부
    pub async fn supports_multi_db(self: &Arc<Self>, token: AuthToken) -> DriverResult<bool> {
        let mut connection = self.acquire(&AcquireParams::new(static_auth(token))).await?;
        let supports = connection.protocol_version().supports_multi_db();
        connection.close().await?;
        Ok(supports)
    }

    /// 세션 단위 인증(재인증) 지원 여부
    pub async fn supports_session_auth(self: &Arc<Self>, token: AuthToken) -> DriverResult<bool> {
        let mut connection = self.acquire(&AcquireParams::new(static_auth(token))).await?;
        let supports = connection.protocol_version().supports_reauth();
        connection.close().await?;
        Ok(supports)
    }

    /// 풀 닫기
    ///
    /// 여러 번 호출해도 안전합니다. 유휴 연결을 닫고 대기자를 실패시킵니다.
    /// 임대 중인 연결은 반환될 때 닫힙니다.
    pub async fn close(&self) -> DriverResult<()> {
        let idle: Vec<Box<dyn BoltConnection>> = {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.pending.clear();
            let mut idle = Vec::new();
            state.entries.retain_mut(|entry| match entry.connection.take() {
                Some(connection) => {
                    idle.push(connection);
                    false
                }
                None => true,
            });
            idle
        };

        debug!(address = %self.address, idle = idle.len(), "Closing connection pool");
        for connection in idle {
            self.closed_one();
            close_quietly(connection).await;
        }
        self.metrics_listener.remove_pool(&self.pool_id);
        Ok(())
    }

    /// 닫힘 여부
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// 풀 크기 (예약된 슬롯 포함)
    pub fn size(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// 사용 중인 연결 수
    pub fn in_use(&self) -> usize {
        self.state.lock().entries.iter().filter(|e| !e.available).count()
    }

    /// 유휴 연결 수
    pub fn idle(&self) -> usize {
        self.state.lock().entries.iter().filter(|e| e.available).count()
    }

    /// 메트릭 조회
    pub fn metrics(&self) -> PoolMetrics {
        let mut metrics = {
            let state = self.state.lock();
            let idle = state.entries.iter().filter(|e| e.available).count();
            PoolMetrics {
                size: state.entries.len(),
                idle,
                in_use: state.entries.len() - idle,
                pending: state.pending.len(),
                ..Default::default()
            }
        };
        self.counters.fill(&mut metrics);
        metrics
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("pool_id", &self.pool_id)
            .field("address", &self.address)
            .field("size", &self.size())
            .field("idle", &self.idle())
            .finish()
    }
}

/// 연결 생성이 취소되거나 실패하면 예약된 슬롯을 해제
struct SlotGuard<'a> {
    pool: &'a ConnectionPool,
    entry_id: u64,
    armed: bool,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.release_slot(self.entry_id);
        }
    }
}

/// 대기열에 들어간 획득
///
/// 기한 초과나 취소로 drop되면 대기열에서 빠지고, 이미 도착한 연결이나 예약 슬롯을 되돌립니다.
struct QueuedAcquisition {
    pool: Arc<ConnectionPool>,
    waiter_id: u64,
    rx: Option<oneshot::Receiver<Handoff>>,
}

impl Drop for QueuedAcquisition {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        rx.close();
        self.pool.state.lock().pending.retain(|w| w.id != self.waiter_id);
        match rx.try_recv() {
            Ok(Handoff::Reserved { entry_id }) => self.pool.release_slot(entry_id),
            // returns to the pool or the next waiter
            Ok(Handoff::Lease(lease)) => drop(lease),
            Err(_) => {}
        }
    }
}

async fn send_and_collect(
    connection: &mut PooledConnection,
    messages: Vec<Message>,
) -> DriverResult<()> {
    let mut handler = CollectingHandler::new();
    connection.write_and_flush(messages, &mut handler).await?;
    handler.into_result().map(|_| ())
}

async fn close_quietly(mut connection: Box<dyn BoltConnection>) {
    if let Err(e) = connection.close().await {
        warn!(address = %connection.server_address(), error = %e, "Connection close has failed");
    }
}

/// 동기 문맥에서 연결 종료 (런타임이 없으면 그냥 drop)
fn close_detached(connection: Box<dyn BoltConnection>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(close_quietly(connection));
        }
        Err(_) => drop(connection),
    }
}

// ============================================================================
// PooledConnection - 임대된 연결
// ============================================================================

/// 풀에서 임대한 연결
///
/// `close()` 또는 drop 시 풀로 반환되고, `force_close()` 시 풀에서 제거됩니다.
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    entry_id: u64,
    connection: Option<Box<dyn BoltConnection>>,
    address: ServerAddress,
    version: BoltVersion,
    server_agent: String,
    created_at: i64,
    acquired_at: Instant,
    purge_on_drop: bool,
}

impl PooledConnection {
    fn new(
        pool: Arc<ConnectionPool>,
        entry_id: u64,
        connection: Box<dyn BoltConnection>,
        created_at: i64,
    ) -> Self {
        Self {
            address: connection.server_address().clone(),
            version: connection.protocol_version(),
            server_agent: connection.server_agent().to_string(),
            pool,
            entry_id,
            connection: Some(connection),
            created_at,
            acquired_at: Instant::now(),
            purge_on_drop: true,
        }
    }

    /// 풀 엔트리 ID
    pub fn entry_id(&self) -> u64 {
        self.entry_id
    }

    /// 소속 풀
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    fn take_connection(&mut self) -> Option<Box<dyn BoltConnection>> {
        self.connection.take()
    }

    fn delegate(&mut self) -> DriverResult<&mut Box<dyn BoltConnection>> {
        self.connection
            .as_mut()
            .ok_or_else(|| DriverError::closed("Connection has been released to the pool"))
    }
}

#[async_trait]
impl BoltConnection for PooledConnection {
    fn server_address(&self) -> &ServerAddress {
        &self.address
    }

    fn protocol_version(&self) -> BoltVersion {
        self.version
    }

    fn state(&self) -> ConnectionState {
        self.connection
            .as_ref()
            .map(|c| c.state())
            .unwrap_or(ConnectionState::Closed)
    }

    fn auth_info(&self) -> Option<AuthInfo> {
        self.connection.as_ref().and_then(|c| c.auth_info())
    }

    fn server_agent(&self) -> &str {
        &self.server_agent
    }

    async fn write(&mut self, messages: Vec<Message>) -> DriverResult<()> {
        self.delegate()?.write(messages).await
    }

    async fn flush(&mut self, handler: &mut dyn ResponseHandler) -> DriverResult<()> {
        self.delegate()?.flush(handler).await
    }

    async fn close(&mut self) -> DriverResult<()> {
        if let Some(connection) = self.connection.take() {
            if self.purge_on_drop {
                self.pool.purge(self.entry_id, Some(connection));
            } else {
                self.pool
                    .release(self.entry_id, connection, self.acquired_at.elapsed());
            }
        }
        Ok(())
    }

    async fn force_close(&mut self, reason: &str) {
        if let Some(connection) = self.connection.take() {
            debug!(address = %self.address, reason, "Force closing pooled connection");
            {
                let mut state = self.pool.state.lock();
                state.remove_entry(self.entry_id);
                self.pool.wake_waiter(&mut state);
            }
            self.pool.closed_one();
            close_quietly(connection).await;
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("entry_id", &self.entry_id)
            .field("address", &self.address)
            .field("version", &self.version)
            .field("released", &self.connection.is_none())
            .finish()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            if self.purge_on_drop {
                self.pool.purge(self.entry_id, Some(connection));
            } else {
                self.pool
                    .release(self.entry_id, connection, self.acquired_at.elapsed());
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::clock::FakeClock;
    use crate::driver::metrics::NoopMetricsListener;
    use crate::driver::testing::{FakeFactory, FakeServer};
    use futures::FutureExt;

    fn address() -> ServerAddress {
        ServerAddress::new("localhost", 7687)
    }

    fn create_pool(config: PoolConfig, factory: Arc<FakeFactory>, clock: Arc<FakeClock>) -> Arc<ConnectionPool> {
        ConnectionPool::new(address(), config, factory, clock, Arc::new(NoopMetricsListener))
    }

    fn params(token: AuthToken) -> AcquireParams {
        AcquireParams::new(static_auth(token))
    }

    fn basic() -> AuthToken {
        AuthToken::basic("zeta4g", "password")
    }

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();
        assert_eq!(config.max_size, 100);
        assert_eq!(config.max_pending_acquisitions, 100);
        assert!(config.idle_before_test.is_none());
        assert!(config.fallback_on_reauth_failure);
    }

    #[test]
    fn test_pool_config_builder() {
        let config = PoolConfig::builder()
            .max_size(50)
            .acquisition_timeout(Duration::ZERO)
            .unlimited_lifetime()
            .idle_before_test(Duration::from_secs(1))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("test/1.0")
            .build();

        assert_eq!(config.max_size, 50);
        assert!(config.acquisition_timeout.is_zero());
        assert!(config.max_lifetime.is_none());
        assert_eq!(config.idle_before_test, Some(Duration::from_secs(1)));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.user_agent, "test/1.0");
    }

    #[tokio::test]
    async fn test_pool_reuse_connection() {
        let clock = Arc::new(FakeClock::new(1_000));
        let factory = FakeFactory::new(FakeServer::new(clock.clone()));
        let pool = create_pool(PoolConfig::default(), factory.clone(), clock);

        let mut conn1 = pool.acquire(&params(basic())).await.unwrap();
        let id1 = conn1.entry_id();
        assert_eq!(pool.in_use(), 1);
        conn1.close().await.unwrap();
        assert_eq!(pool.idle(), 1);

        let conn2 = pool.acquire(&params(basic())).await.unwrap();
        assert_eq!(conn2.entry_id(), id1);
        assert_eq!(pool.size(), 1);
        assert_eq!(factory.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_pool_drop_releases_connection() {
        let clock = Arc::new(FakeClock::new(1_000));
        let factory = FakeFactory::new(FakeServer::new(clock.clone()));
        let pool = create_pool(PoolConfig::default(), factory, clock);

        let conn = pool.acquire(&params(basic())).await.unwrap();
        drop(conn);

        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn test_pool_never_exceeds_max_size() {
        let clock = Arc::new(FakeClock::new(1_000));
        let factory = FakeFactory::new(FakeServer::new(clock.clone()));
        let config = PoolConfig::builder()
            .max_size(3)
            .acquisition_timeout(Duration::from_secs(5))
            .build();
        let pool = create_pool(config, factory.clone(), clock);

        let mut handles = Vec::new();
        for _ in 0..12 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let mut conn = pool.acquire(&params(basic())).await.unwrap();
                assert!(pool.size() <= 3);
                tokio::task::yield_now().await;
                conn.close().await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(factory.connect_count() <= 3);
        assert_eq!(pool.size(), factory.connect_count());
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn test_pool_leases_are_exclusive() {
        let clock = Arc::new(FakeClock::new(1_000));
        let factory = FakeFactory::new(FakeServer::new(clock.clone()));
        let pool = create_pool(PoolConfig::builder().max_size(4).build(), factory, clock);

        let mut leases = Vec::new();
        for _ in 0..4 {
            leases.push(pool.acquire(&params(basic())).await.unwrap());
        }
        let mut ids: Vec<u64> = leases.iter().map(|l| l.entry_id()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 4);
        assert_eq!(pool.idle(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_acquisition_timeout() {
        let clock = Arc::new(FakeClock::new(1_000));
        let factory = FakeFactory::new(FakeServer::new(clock.clone()));
        let config = PoolConfig::builder()
            .max_size(1)
            .acquisition_timeout(Duration::from_millis(100))
            .build();
        let pool = create_pool(config, factory, clock);

        let _held = pool.acquire(&params(basic())).await.unwrap();
        let err = pool.acquire(&params(basic())).await.unwrap_err();

        assert!(matches!(err, DriverError::AcquisitionTimeout { timeout_ms: 100 }));
        assert_eq!(pool.metrics().pending, 0);
        assert_eq!(pool.metrics().total_timed_out, 1);
    }

    #[tokio::test]
    async fn test_pool_zero_timeout_fails_immediately() {
        let clock = Arc::new(FakeClock::new(1_000));
        let factory = FakeFactory::new(FakeServer::new(clock.clone()));
        let config = PoolConfig::builder()
            .max_size(1)
            .acquisition_timeout(Duration::ZERO)
            .build();
        let pool = create_pool(config, factory, clock);

        let _held = pool.acquire(&params(basic())).await.unwrap();
        let err = pool.acquire(&params(basic())).await.unwrap_err();
        assert!(matches!(err, DriverError::AcquisitionTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_pending_queue_full() {
        let clock = Arc::new(FakeClock::new(1_000));
        let factory = FakeFactory::new(FakeServer::new(clock.clone()));
        let config = PoolConfig::builder()
            .max_size(1)
            .max_pending_acquisitions(2)
            .acquisition_timeout(Duration::from_secs(60))
            .build();
        let pool = create_pool(config, factory, clock);

        let _held = pool.acquire(&params(basic())).await.unwrap();

        let mut waiters = Vec::new();
        for _ in 0..2 {
            let pool = pool.clone();
            waiters.push(tokio::spawn(async move { pool.acquire(&params(basic())).await.map(|_| ()) }));
        }
        while pool.metrics().pending < 2 {
            tokio::task::yield_now().await;
        }

        let err = pool.acquire(&params(basic())).await.unwrap_err();
        assert!(matches!(err, DriverError::PendingQueueFull));

        for waiter in waiters {
            waiter.abort();
        }
    }

    #[tokio::test]
    async fn test_pool_release_hands_off_to_oldest_waiter() {
        let clock = Arc::new(FakeClock::new(1_000));
        let factory = FakeFactory::new(FakeServer::new(clock.clone()));
        let config = PoolConfig::builder().max_size(1).build();
        let pool = create_pool(config, factory.clone(), clock);

        let mut held = pool.acquire(&params(basic())).await.unwrap();
        let held_id = held.entry_id();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(&params(basic())).await.map(|c| c.entry_id()) })
        };
        while pool.metrics().pending < 1 {
            tokio::task::yield_now().await;
        }

        held.close().await.unwrap();
        let handed = waiter.await.unwrap().unwrap();

        assert_eq!(handed, held_id);
        assert_eq!(factory.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_freed_slot_is_reserved_for_waiter_within_timeout() {
        let clock = Arc::new(FakeClock::new(1_000));
        let factory = FakeFactory::new(FakeServer::new(clock.clone()));
        let config = PoolConfig::builder()
            .max_size(1)
            .acquisition_timeout(Duration::from_millis(100))
            .build();
        let pool = create_pool(config, factory.clone(), clock);

        let mut held = pool.acquire(&params(basic())).await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                let result = pool.acquire(&params(basic())).await.map(|c| c.entry_id());
                (result, started.elapsed())
            })
        };
        while pool.metrics().pending < 1 {
            tokio::task::yield_now().await;
        }

        tokio::time::sleep(Duration::from_millis(90)).await;
        held.force_close("broken").await;
        // arrives before the waiter is polled again
        let newcomer = pool.acquire(&params(basic())).await;

        let (result, waited) = waiter.await.unwrap();
        assert!(result.is_ok());
        assert!(waited <= Duration::from_millis(100), "waited {:?}", waited);
        assert!(newcomer.is_ok());
        assert_eq!(factory.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_pool_waiters_are_served_in_order_after_force_close() {
        let clock = Arc::new(FakeClock::new(1_000));
        let factory = FakeFactory::new(FakeServer::new(clock.clone()));
        let pool = create_pool(PoolConfig::builder().max_size(1).build(), factory.clone(), clock);
        let served = Arc::new(Mutex::new(Vec::new()));

        let mut held = pool.acquire(&params(basic())).await.unwrap();
        let mut waiters = Vec::new();
        for name in ["first", "second"] {
            let task_pool = pool.clone();
            let served = served.clone();
            waiters.push(tokio::spawn(async move {
                let conn = task_pool.acquire(&params(basic())).await.unwrap();
                served.lock().push(name);
                drop(conn);
            }));
            while pool.metrics().pending < waiters.len() {
                tokio::task::yield_now().await;
            }
        }

        held.force_close("broken").await;
        for waiter in waiters {
            waiter.await.unwrap();
        }

        assert_eq!(*served.lock(), vec!["first", "second"]);
        assert_eq!(factory.connect_count(), 2);
        assert_eq!(pool.metrics().pending, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_cancelled_waiter_leaves_queue() {
        let clock = Arc::new(FakeClock::new(1_000));
        let factory = FakeFactory::new(FakeServer::new(clock.clone()));
        let config = PoolConfig::builder()
            .max_size(1)
            .acquisition_timeout(Duration::from_millis(100))
            .build();
        let pool = create_pool(config, factory, clock);

        let mut held = pool.acquire(&params(basic())).await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(&params(basic())).await.map(|_| ()) })
        };
        while pool.metrics().pending < 1 {
            tokio::task::yield_now().await;
        }
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());

        held.force_close("broken").await;

        assert_eq!(pool.size(), 0);
        assert_eq!(pool.metrics().pending, 0);
        assert!(pool.acquire(&params(basic())).await.is_ok());
    }

    #[tokio::test]
    async fn test_pool_min_version_fails_on_lower_entry() {
        let clock = Arc::new(FakeClock::new(1_000));
        let factory = FakeFactory::new(FakeServer::new(clock.clone()));
        factory.set_version(BoltVersion::V4_4);
        let pool = create_pool(PoolConfig::default(), factory, clock);

        drop(pool.acquire(&params(basic())).await.unwrap());

        let err = pool
            .acquire(&params(basic()).with_min_version(BoltVersion::V5_1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DriverError::MinVersionAcquisition { version } if version == BoltVersion::V4_4
        ));
    }

    #[tokio::test]
    async fn test_pool_min_version_never_returns_lower_connection() {
        let clock = Arc::new(FakeClock::new(1_000));
        let factory = FakeFactory::new(FakeServer::new(clock.clone()));
        factory.set_version(BoltVersion::V5_0);
        let pool = create_pool(PoolConfig::default(), factory, clock);

        let err = pool
            .acquire(&params(basic()).with_min_version(BoltVersion::V5_4))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::MinVersionAcquisition { .. }));
        assert_eq!(pool.size(), 0);
    }

    #[tokio::test]
    async fn test_pool_discards_closed_and_expired_connections() {
        let clock = Arc::new(FakeClock::new(1_000));
        let server = FakeServer::new(clock.clone());
        let factory = FakeFactory::new(server.clone());
        let config = PoolConfig::builder().max_lifetime(Duration::from_secs(10)).build();
        let pool = create_pool(config, factory.clone(), clock.clone());

        drop(pool.acquire(&params(basic())).await.unwrap());
        clock.advance(Duration::from_secs(11));

        let conn = pool.acquire(&params(basic())).await.unwrap();
        assert_eq!(factory.connect_count(), 2);
        assert_eq!(pool.size(), 1);
        drop(conn);
        assert!(pool.metrics().total_closed >= 1);
    }

    #[tokio::test]
    async fn test_pool_liveness_check_failure_purges_and_retries() {
        let clock = Arc::new(FakeClock::new(1_000));
        let server = FakeServer::new(clock.clone());
        let factory = FakeFactory::new(server.clone());
        let config = PoolConfig::builder()
            .idle_before_test(Duration::from_secs(1))
            .build();
        let pool = create_pool(config, factory.clone(), clock.clone());

        drop(pool.acquire(&params(basic())).await.unwrap());
        clock.advance(Duration::from_secs(5));
        server.set_fail_reset(true);

        let conn = pool.acquire(&params(basic())).await.unwrap();
        assert_eq!(factory.connect_count(), 2);
        assert_eq!(pool.size(), 1);
        assert!(server.sent_messages().contains(&Message::Reset));
        drop(conn);
    }

    #[tokio::test]
    async fn test_pool_liveness_check_skipped_when_recently_used() {
        let clock = Arc::new(FakeClock::new(1_000));
        let server = FakeServer::new(clock.clone());
        let factory = FakeFactory::new(server.clone());
        let config = PoolConfig::builder()
            .idle_before_test(Duration::from_secs(60))
            .build();
        let pool = create_pool(config, factory, clock);

        drop(pool.acquire(&params(basic())).await.unwrap());
        drop(pool.acquire(&params(basic())).await.unwrap());

        assert!(!server.sent_messages().contains(&Message::Reset));
    }

    #[tokio::test]
    async fn test_pool_reauth_on_token_change() {
        let clock = Arc::new(FakeClock::new(1_000));
        let server = FakeServer::new(clock.clone());
        let factory = FakeFactory::new(server.clone());
        let pool = create_pool(PoolConfig::default(), factory.clone(), clock);

        drop(pool.acquire(&params(basic())).await.unwrap());

        let other = AuthToken::basic("other", "secret");
        let conn = pool.acquire(&params(other.clone())).await.unwrap();

        assert_eq!(factory.connect_count(), 1);
        assert_eq!(conn.auth_info().map(|a| a.token), Some(other.clone()));
        let sent = server.sent_messages();
        assert!(sent.contains(&Message::Logoff));
        assert!(sent.contains(&Message::Logon(other)));
    }

    #[tokio::test]
    async fn test_pool_reauth_unsupported_discards_connection() {
        let clock = Arc::new(FakeClock::new(1_000));
        let server = FakeServer::new(clock.clone());
        let factory = FakeFactory::new(server.clone());
        factory.set_version(BoltVersion::V5_0);
        let pool = create_pool(PoolConfig::default(), factory.clone(), clock);

        drop(pool.acquire(&params(basic())).await.unwrap());
        let conn = pool.acquire(&params(AuthToken::bearer("token"))).await.unwrap();

        assert_eq!(factory.connect_count(), 2);
        assert_eq!(pool.size(), 1);
        assert!(!server.sent_messages().contains(&Message::Logoff));
        drop(conn);
    }

    #[tokio::test]
    async fn test_pool_reauth_failure_falls_back_to_new_connection() {
        let clock = Arc::new(FakeClock::new(1_000));
        let server = FakeServer::new(clock.clone());
        let factory = FakeFactory::new(server.clone());
        let pool = create_pool(PoolConfig::default(), factory.clone(), clock);

        drop(pool.acquire(&params(basic())).await.unwrap());
        server.set_fail_logon(true);

        let conn = pool.acquire(&params(AuthToken::bearer("token"))).await.unwrap();
        assert_eq!(factory.connect_count(), 2);
        assert_eq!(pool.size(), 1);
        drop(conn);
    }

    #[tokio::test]
    async fn test_pool_reauth_failure_without_fallback_fails() {
        let clock = Arc::new(FakeClock::new(1_000));
        let server = FakeServer::new(clock.clone());
        let factory = FakeFactory::new(server.clone());
        let config = PoolConfig::builder().fallback_on_reauth_failure(false).build();
        let pool = create_pool(config, factory, clock);

        drop(pool.acquire(&params(basic())).await.unwrap());
        server.set_fail_logon(true);

        let err = pool.acquire(&params(AuthToken::bearer("token"))).await.unwrap_err();
        assert!(matches!(err, DriverError::Authentication(_)));
        assert_eq!(pool.size(), 0);
    }

    #[tokio::test]
    async fn test_pool_on_expired_forces_reauth() {
        let clock = Arc::new(FakeClock::new(1_000));
        let server = FakeServer::new(clock.clone());
        let factory = FakeFactory::new(server.clone());
        let pool = create_pool(PoolConfig::default(), factory.clone(), clock.clone());

        drop(pool.acquire(&params(basic())).await.unwrap());
        clock.advance(Duration::from_secs(1));
        pool.on_expired();

        drop(pool.acquire(&params(basic())).await.unwrap());
        assert!(server.sent_messages().contains(&Message::Logon(basic())));
        assert_eq!(factory.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_pool_connect_failure_is_retried_once() {
        let clock = Arc::new(FakeClock::new(1_000));
        let factory = FakeFactory::new(FakeServer::new(clock.clone()));
        let pool = create_pool(PoolConfig::default(), factory.clone(), clock);

        factory.fail_next_connects(1);
        let conn = pool.acquire(&params(basic())).await.unwrap();
        assert_eq!(factory.connect_count(), 2);
        drop(conn);

        factory.fail_next_connects(2);
        let mut held = Vec::new();
        held.push(pool.acquire(&params(basic())).await.unwrap());
        let err = pool.acquire(&params(basic())).await.unwrap_err();
        assert!(err.is_connectivity_error());
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.metrics().total_failed_to_create, 3);
    }

    #[tokio::test]
    async fn test_pool_first_connection_reuses_resolved_token() {
        let clock = Arc::new(FakeClock::new(1_000));
        let factory = FakeFactory::new(FakeServer::new(clock.clone()));
        let pool = create_pool(PoolConfig::default(), factory.clone(), clock);

        let calls = Arc::new(AtomicU64::new(0));
        let supplier_calls = calls.clone();
        let params = AcquireParams::new(Arc::new(move || {
            supplier_calls.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(AuthToken::basic("zeta4g", "password"))).boxed()
        }));

        let _first = pool.acquire(&params).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let _second = pool.acquire(&params).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_pool_close_is_idempotent() {
        let clock = Arc::new(FakeClock::new(1_000));
        let server = FakeServer::new(clock.clone());
        let factory = FakeFactory::new(server.clone());
        let pool = create_pool(PoolConfig::default(), factory, clock);

        drop(pool.acquire(&params(basic())).await.unwrap());
        let leased = pool.acquire(&params(basic())).await.unwrap();
        let idle_extra = pool.acquire(&params(basic())).await.unwrap();
        drop(idle_extra);

        pool.close().await.unwrap();
        pool.close().await.unwrap();

        assert!(pool.is_closed());
        assert_eq!(server.closed_count(), 1);
        assert!(matches!(
            pool.acquire(&params(basic())).await,
            Err(DriverError::Closed(_))
        ));

        drop(leased);
        assert_eq!(pool.size(), 0);
    }

    #[tokio::test]
    async fn test_pool_close_fails_waiters() {
        let clock = Arc::new(FakeClock::new(1_000));
        let factory = FakeFactory::new(FakeServer::new(clock.clone()));
        let pool = create_pool(PoolConfig::builder().max_size(1).build(), factory, clock);

        let _held = pool.acquire(&params(basic())).await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(&params(basic())).await.map(|_| ()) })
        };
        while pool.metrics().pending < 1 {
            tokio::task::yield_now().await;
        }

        pool.close().await.unwrap();
        assert!(matches!(waiter.await.unwrap(), Err(DriverError::Closed(_))));
    }

    #[tokio::test]
    async fn test_pool_force_close_purges_entry() {
        let clock = Arc::new(FakeClock::new(1_000));
        let server = FakeServer::new(clock.clone());
        let factory = FakeFactory::new(server.clone());
        let pool = create_pool(PoolConfig::default(), factory, clock);

        let mut conn = pool.acquire(&params(basic())).await.unwrap();
        conn.force_close("test").await;

        assert_eq!(pool.size(), 0);
        assert_eq!(server.closed_count(), 1);
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.write(vec![Message::Reset]).await.is_err());
    }

    #[tokio::test]
    async fn test_pool_broken_connection_is_purged_on_release() {
        let clock = Arc::new(FakeClock::new(1_000));
        let server = FakeServer::new(clock.clone());
        let factory = FakeFactory::new(server.clone());
        let pool = create_pool(PoolConfig::default(), factory, clock);

        let mut conn = pool.acquire(&params(basic())).await.unwrap();
        server.set_fail_flush(true);
        let mut handler = CollectingHandler::new();
        assert!(conn.write_and_flush(vec![Message::run("RETURN 1")], &mut handler).await.is_err());
        conn.close().await.unwrap();

        assert_eq!(pool.size(), 0);
    }

    #[tokio::test]
    async fn test_pool_capability_checks() {
        let clock = Arc::new(FakeClock::new(1_000));
        let factory = FakeFactory::new(FakeServer::new(clock.clone()));
        factory.set_version(BoltVersion::V5_0);
        let pool = create_pool(PoolConfig::default(), factory, clock);

        pool.verify_connectivity(basic()).await.unwrap();
        assert!(pool.supports_multi_db(basic()).await.unwrap());
        assert!(!pool.supports_session_auth(basic()).await.unwrap());
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn test_pool_metrics() {
        let clock = Arc::new(FakeClock::new(1_000));
        let factory = FakeFactory::new(FakeServer::new(clock.clone()));
        let pool = create_pool(PoolConfig::default(), factory, clock);

        let conn = pool.acquire(&params(basic())).await.unwrap();
        let metrics = pool.metrics();
        assert_eq!(metrics.size, 1);
        assert_eq!(metrics.in_use, 1);
        assert_eq!(metrics.total_created, 1);
        assert_eq!(metrics.total_acquired, 1);

        drop(conn);
        let metrics = pool.metrics();
        assert_eq!(metrics.in_use, 0);
        assert_eq!(metrics.idle, 1);
    }
}
