//! 테스트용 가짜 협력자
//!
//! 스크립트 가능한 서버, 연결, 팩토리, 연결 소스, 재발견기를 제공합니다.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::clock::{Clock, FakeClock};
use super::connection::{AcquireParams, BoltConnection, ConnectParams, ConnectionFactory, ConnectionState};
use super::error::{DriverError, DriverResult};
use super::routing::{ClusterComposition, ClusterCompositionLookupResult, ConnectionSource, Rediscovery, RoutingTable};
use super::types::{AuthInfo, ServerAddress};
use crate::bolt::{BoltVersion, Message, Response, ResponseHandler, RouteSummary, Summary, Value};

// ============================================================================
// FakeServer - 스크립트 가능한 서버
// ============================================================================

/// 모든 가짜 연결이 공유하는 서버 동작
#[derive(Debug)]
pub(crate) struct FakeServer {
    clock: Arc<FakeClock>,
    fail_reset: AtomicBool,
    fail_logon: AtomicBool,
    fail_flush: AtomicBool,
    failures: Mutex<HashMap<ServerAddress, DriverError>>,
    routes: Mutex<HashMap<ServerAddress, DriverResult<HashMap<String, Value>>>>,
    sent: Mutex<Vec<Message>>,
    closed: AtomicUsize,
}

impl FakeServer {
    pub(crate) fn new(clock: Arc<FakeClock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            fail_reset: AtomicBool::new(false),
            fail_logon: AtomicBool::new(false),
            fail_flush: AtomicBool::new(false),
            failures: Mutex::new(HashMap::new()),
            routes: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            closed: AtomicUsize::new(0),
        })
    }

    pub(crate) fn set_fail_reset(&self, fail: bool) {
        self.fail_reset.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_logon(&self, fail: bool) {
        self.fail_logon.store(fail, Ordering::SeqCst);
    }

    /// flush 자체가 실패하고 연결이 오류 상태가 됨
    pub(crate) fn set_fail_flush(&self, fail: bool) {
        self.fail_flush.store(fail, Ordering::SeqCst);
    }

    /// 해당 주소의 모든 요청이 주어진 에러로 실패
    pub(crate) fn set_failure(&self, address: ServerAddress, error: DriverError) {
        self.failures.lock().insert(address, error);
    }

    pub(crate) fn clear_failure(&self, address: &ServerAddress) {
        self.failures.lock().remove(address);
    }

    pub(crate) fn set_route(&self, address: ServerAddress, metadata: HashMap<String, Value>) {
        self.routes.lock().insert(address, Ok(metadata));
    }

    pub(crate) fn set_route_error(&self, address: ServerAddress, error: DriverError) {
        self.routes.lock().insert(address, Err(error));
    }

    pub(crate) fn sent_messages(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    pub(crate) fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn reply(&self, connection: &mut FakeConnection, message: &Message) -> Response {
        if let Some(error) = self.failures.lock().get(&connection.address) {
            return Response::Error(error.clone());
        }
        match message {
            Message::Reset if self.fail_reset.load(Ordering::SeqCst) => {
                Response::Error(DriverError::connection("RESET failed"))
            }
            Message::Reset => Response::Summary(Summary::Reset),
            Message::Logoff => {
                connection.auth = None;
                Response::Summary(Summary::Logoff)
            }
            Message::Logon(_) if self.fail_logon.load(Ordering::SeqCst) => {
                Response::Error(DriverError::authentication("The client is unauthorized"))
            }
            Message::Logon(token) => {
                connection.auth = Some(AuthInfo::new(token.clone(), self.clock.millis()));
                Response::Summary(Summary::Logon)
            }
            Message::Route { .. } => match self.routes.lock().get(&connection.address) {
                Some(Ok(metadata)) => Response::Summary(Summary::Route(RouteSummary::new(metadata.clone()))),
                Some(Err(error)) => Response::Error(error.clone()),
                None => Response::Error(DriverError::service_unavailable(format!(
                    "{} is not a router",
                    connection.address
                ))),
            },
            Message::Begin(_) => Response::Summary(Summary::Begin),
            Message::Run { .. } => Response::Summary(Summary::Run {
                keys: vec!["n".to_string()],
                qid: -1,
            }),
            Message::Pull { .. } => Response::Summary(Summary::Pull {
                has_more: false,
                bookmark: None,
            }),
            Message::Discard { .. } => Response::Summary(Summary::Discard { has_more: false }),
            Message::Commit => Response::Summary(Summary::Commit {
                bookmark: Some("bookmark:1".to_string()),
            }),
            Message::Rollback => Response::Summary(Summary::Rollback),
            Message::Telemetry(_) => Response::Summary(Summary::Telemetry),
        }
    }
}

// ============================================================================
// FakeConnection - 가짜 연결
// ============================================================================

pub(crate) struct FakeConnection {
    server: Arc<FakeServer>,
    address: ServerAddress,
    version: BoltVersion,
    auth: Option<AuthInfo>,
    state: ConnectionState,
    pending: Vec<Message>,
}

impl FakeConnection {
    pub(crate) fn new(
        server: Arc<FakeServer>,
        address: ServerAddress,
        version: BoltVersion,
        auth: Option<AuthInfo>,
    ) -> Self {
        Self {
            server,
            address,
            version,
            auth,
            state: ConnectionState::Open,
            pending: Vec::new(),
        }
    }

    fn mark_closed(&mut self) {
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Closed;
            self.server.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl BoltConnection for FakeConnection {
    fn server_address(&self) -> &ServerAddress {
        &self.address
    }

    fn protocol_version(&self) -> BoltVersion {
        self.version
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn auth_info(&self) -> Option<AuthInfo> {
        self.auth.clone()
    }

    fn server_agent(&self) -> &str {
        "Zeta4G/5.0.0"
    }

    async fn write(&mut self, messages: Vec<Message>) -> DriverResult<()> {
        if self.state != ConnectionState::Open {
            return Err(DriverError::connection("Connection is not open"));
        }
        self.server.sent.lock().extend(messages.iter().cloned());
        self.pending.extend(messages);
        Ok(())
    }

    async fn flush(&mut self, handler: &mut dyn ResponseHandler) -> DriverResult<()> {
        if self.state != ConnectionState::Open {
            return Err(DriverError::connection("Connection is not open"));
        }
        if self.server.fail_flush.load(Ordering::SeqCst) {
            self.pending.clear();
            self.state = ConnectionState::Error;
            return Err(DriverError::connection("Connection reset by peer"));
        }

        let server = self.server.clone();
        let mut failed = false;
        for message in std::mem::take(&mut self.pending) {
            if failed {
                handler.on_response(Response::Ignored);
                continue;
            }
            let response = server.reply(self, &message);
            failed = matches!(response, Response::Error(_));
            handler.on_response(response);
        }
        handler.on_response(Response::Complete);
        Ok(())
    }

    async fn close(&mut self) -> DriverResult<()> {
        self.mark_closed();
        Ok(())
    }

    async fn force_close(&mut self, _reason: &str) {
        self.mark_closed();
    }
}

// ============================================================================
// FakeFactory - 가짜 연결 팩토리
// ============================================================================

#[derive(Debug)]
pub(crate) struct FakeFactory {
    server: Arc<FakeServer>,
    version: Mutex<BoltVersion>,
    connects: AtomicUsize,
    fail_next: AtomicUsize,
    unreachable: Mutex<HashSet<ServerAddress>>,
    connected: Mutex<Vec<ServerAddress>>,
    closed: AtomicBool,
}

impl FakeFactory {
    pub(crate) fn new(server: Arc<FakeServer>) -> Arc<Self> {
        Arc::new(Self {
            server,
            version: Mutex::new(BoltVersion::V5_4),
            connects: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
            unreachable: Mutex::new(HashSet::new()),
            connected: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn set_version(&self, version: BoltVersion) {
        *self.version.lock() = version;
    }

    /// 실패한 시도를 포함한 연결 시도 횟수
    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_next_connects(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub(crate) fn set_unreachable(&self, address: ServerAddress) {
        self.unreachable.lock().insert(address);
    }

    /// 성공한 연결의 주소 (순서대로)
    pub(crate) fn connected(&self) -> Vec<ServerAddress> {
        self.connected.lock().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory for FakeFactory {
    async fn connect(&self, params: ConnectParams) -> DriverResult<Box<dyn BoltConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing || self.unreachable.lock().contains(&params.address) {
            return Err(DriverError::service_unavailable(format!(
                "Unable to connect to {}",
                params.address
            )));
        }

        self.connected.lock().push(params.address.clone());
        let auth = AuthInfo::new(params.auth_token, self.server.clock.millis());
        Ok(Box::new(FakeConnection::new(
            self.server.clone(),
            params.address,
            *self.version.lock(),
            Some(auth),
        )))
    }

    async fn close(&self) -> DriverResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// FakeSource - 라우터 연결 소스
// ============================================================================

#[derive(Debug)]
pub(crate) struct FakeSource {
    server: Arc<FakeServer>,
    version: Mutex<BoltVersion>,
    unreachable: Mutex<HashSet<ServerAddress>>,
    acquired: Mutex<Vec<ServerAddress>>,
}

impl FakeSource {
    pub(crate) fn new(server: Arc<FakeServer>) -> Arc<Self> {
        Arc::new(Self {
            server,
            version: Mutex::new(BoltVersion::V5_4),
            unreachable: Mutex::new(HashSet::new()),
            acquired: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn set_version(&self, version: BoltVersion) {
        *self.version.lock() = version;
    }

    pub(crate) fn set_unreachable(&self, address: ServerAddress) {
        self.unreachable.lock().insert(address);
    }

    /// 성공적으로 획득한 주소 (순서대로)
    pub(crate) fn acquired(&self) -> Vec<ServerAddress> {
        self.acquired.lock().clone()
    }
}

#[async_trait]
impl ConnectionSource for FakeSource {
    async fn acquire(&self, address: &ServerAddress, params: &AcquireParams) -> DriverResult<Box<dyn BoltConnection>> {
        if self.unreachable.lock().contains(address) {
            return Err(DriverError::service_unavailable(format!("Unable to connect to {}", address)));
        }
        let token = (params.auth)().await?;
        self.acquired.lock().push(address.clone());
        Ok(Box::new(FakeConnection::new(
            self.server.clone(),
            address.clone(),
            *self.version.lock(),
            Some(AuthInfo::new(token, self.server.clock.millis())),
        )))
    }
}

// ============================================================================
// FakeRediscovery - 스크립트 가능한 재발견기
// ============================================================================

#[derive(Debug)]
pub(crate) struct FakeRediscovery {
    default_result: ClusterCompositionLookupResult,
    scripted: Mutex<VecDeque<DriverResult<ClusterCompositionLookupResult>>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl FakeRediscovery {
    pub(crate) fn new(default_result: ClusterCompositionLookupResult) -> Self {
        Self {
            default_result,
            scripted: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// 조회마다 지연 (tokio 시간 기준)
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 다음 조회 결과를 지정 (소진되면 기본 결과)
    pub(crate) fn push_result(&self, result: DriverResult<ClusterCompositionLookupResult>) {
        self.scripted.lock().push_back(result);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Rediscovery for FakeRediscovery {
    async fn lookup_cluster_composition(
        &self,
        _table: &RoutingTable,
        _source: Arc<dyn ConnectionSource>,
        _params: &AcquireParams,
    ) -> DriverResult<ClusterCompositionLookupResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.scripted.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(self.default_result.clone()))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn hosts(hosts: &[&str]) -> Vec<ServerAddress> {
    hosts.iter().map(|h| ServerAddress::new(*h, 7687)).collect()
}

/// 기본 포트의 호스트 이름으로 조회 결과 생성
pub(crate) fn lookup_result(
    expires_at: i64,
    readers: &[&str],
    writers: &[&str],
    routers: &[&str],
) -> ClusterCompositionLookupResult {
    ClusterCompositionLookupResult::new(ClusterComposition::new(
        expires_at,
        hosts(readers),
        hosts(writers),
        hosts(routers),
        None,
    ))
}

/// ROUTE 응답 메타데이터 생성 (`ttl`은 초 단위)
pub(crate) fn route_metadata(
    ttl: i64,
    readers: &[&str],
    writers: &[&str],
    routers: &[&str],
    database: Option<&str>,
) -> HashMap<String, Value> {
    let server = |role: &str, names: &[&str]| {
        let addresses = names
            .iter()
            .map(|h| Value::String(format!("{}:7687", h)))
            .collect();
        Value::Map(HashMap::from([
            ("role".to_string(), Value::String(role.to_string())),
            ("addresses".to_string(), Value::List(addresses)),
        ]))
    };

    let mut rt = HashMap::from([
        ("ttl".to_string(), Value::Integer(ttl)),
        (
            "servers".to_string(),
            Value::List(vec![
                server("ROUTE", routers),
                server("WRITE", writers),
                server("READ", readers),
            ]),
        ),
    ]);
    if let Some(database) = database {
        rt.insert("db".to_string(), Value::String(database.to_string()));
    }
    HashMap::from([("rt".to_string(), Value::Map(rt))])
}
