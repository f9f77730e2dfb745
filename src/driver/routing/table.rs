//! 라우팅 테이블
//!
//! 클러스터의 서버 역할별 목록과 만료 시각을 관리합니다.
//! 테이블 자체는 동시성을 갖지 않으며 항상 소유 핸들러의 잠금 아래에서 변경됩니다.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::super::clock::{duration_millis, Clock};
use super::super::error::{DriverError, DriverResult};
use super::super::types::{dedup_addresses, DatabaseName, ServerAddress};
use crate::bolt::{AccessMode, Value};

/// TTL(초)을 millis로 바꿨을 때 넘치지 않는 최대값
const MAX_TTL_SECONDS: i64 = i64::MAX / 1000;

// ============================================================================
// ServerRole - 서버 역할
// ============================================================================

/// 서버 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerRole {
    /// 라우팅 테이블 제공자
    Route,
    /// 쓰기 트랜잭션 처리 (리더)
    Write,
    /// 읽기 트랜잭션 처리 (팔로워)
    Read,
}

impl ServerRole {
    /// 문자열에서 역할 파싱
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ROUTE" => Some(Self::Route),
            "WRITE" => Some(Self::Write),
            "READ" => Some(Self::Read),
            _ => None,
        }
    }

    /// 역할을 문자열로 변환
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Route => "ROUTE",
            Self::Write => "WRITE",
            Self::Read => "READ",
        }
    }
}

// ============================================================================
// ClusterComposition - 클러스터 구성
// ============================================================================

/// 라우터에서 받은 클러스터 구성
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterComposition {
    /// 만료 시각 (epoch millis, `i64::MAX`면 만료되지 않음)
    pub expires_at: i64,
    /// 리더 목록
    pub readers: Vec<ServerAddress>,
    /// 라이터 목록
    pub writers: Vec<ServerAddress>,
    /// 라우터 목록
    pub routers: Vec<ServerAddress>,
    /// 서버가 알려준 데이터베이스 이름
    pub database: Option<String>,
}

impl ClusterComposition {
    /// 새 클러스터 구성 생성 (중복 주소는 제거)
    pub fn new(
        expires_at: i64,
        readers: Vec<ServerAddress>,
        writers: Vec<ServerAddress>,
        routers: Vec<ServerAddress>,
        database: Option<String>,
    ) -> Self {
        Self {
            expires_at,
            readers: dedup_addresses(readers),
            writers: dedup_addresses(writers),
            routers: dedup_addresses(routers),
            database,
        }
    }

    /// ROUTE 응답 메타데이터 파싱
    ///
    /// `rt` 맵(또는 그 내용)에서 `ttl`, `servers[{role, addresses}]`, `db`를 읽습니다.
    pub fn parse(metadata: &HashMap<String, Value>, now: i64) -> DriverResult<Self> {
        let rt = match metadata.get("rt") {
            Some(rt) => rt
                .as_map()
                .ok_or_else(|| DriverError::protocol("Routing table 'rt' is not a map"))?,
            None => metadata,
        };

        let ttl = rt
            .get("ttl")
            .and_then(Value::as_int)
            .ok_or_else(|| DriverError::protocol("Routing table has no 'ttl'"))?;
        let servers = rt
            .get("servers")
            .and_then(Value::as_list)
            .ok_or_else(|| DriverError::protocol("Routing table has no 'servers' list"))?;

        let mut readers = Vec::new();
        let mut writers = Vec::new();
        let mut routers = Vec::new();

        for server in servers {
            let server = server
                .as_map()
                .ok_or_else(|| DriverError::protocol("Routing table server entry is not a map"))?;
            let role = server.get("role").and_then(Value::as_str).unwrap_or("");
            let addresses = server
                .get("addresses")
                .and_then(Value::as_list)
                .unwrap_or_default()
                .iter()
                .filter_map(Value::as_str)
                .map(ServerAddress::parse)
                .collect::<DriverResult<Vec<_>>>()?;

            match ServerRole::parse(role) {
                Some(ServerRole::Read) => readers.extend(addresses),
                Some(ServerRole::Write) => writers.extend(addresses),
                Some(ServerRole::Route) => routers.extend(addresses),
                None => {}
            }
        }

        let database = rt.get("db").and_then(Value::as_str).map(str::to_string);

        Ok(Self::new(
            expiration_millis(now, ttl),
            readers,
            writers,
            routers,
            database,
        ))
    }

    /// 라이터가 있는지 확인
    pub fn has_writers(&self) -> bool {
        !self.writers.is_empty()
    }

    /// 라우터와 리더가 모두 있는지 확인
    pub fn has_routers_and_readers(&self) -> bool {
        !self.routers.is_empty() && !self.readers.is_empty()
    }
}

impl fmt::Display for ClusterComposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ClusterComposition{{readers={}, writers={}, routers={}, expiresAt={}, database={}}}",
            join(&self.readers),
            join(&self.writers),
            join(&self.routers),
            self.expires_at,
            self.database.as_deref().unwrap_or("<unknown>")
        )
    }
}

/// TTL(초)로부터 만료 시각 계산
///
/// 음수 TTL이나 계산 중 넘침은 "만료되지 않음"(`i64::MAX`)으로 처리합니다.
pub(crate) fn expiration_millis(now: i64, ttl_seconds: i64) -> i64 {
    if !(0..MAX_TTL_SECONDS).contains(&ttl_seconds) {
        return i64::MAX;
    }
    match now.checked_add(ttl_seconds * 1000) {
        Some(expires_at) if expires_at >= 0 => expires_at,
        _ => i64::MAX,
    }
}

fn join(addresses: &[ServerAddress]) -> String {
    let joined: Vec<String> = addresses.iter().map(ToString::to_string).collect();
    format!("[{}]", joined.join(", "))
}

// ============================================================================
// RoutingTable - 라우팅 테이블
// ============================================================================

/// 라우팅 테이블
#[derive(Debug, Clone)]
pub struct RoutingTable {
    /// 데이터베이스 이름
    database: DatabaseName,
    /// 리더 목록 (읽기 트랜잭션용)
    readers: Vec<ServerAddress>,
    /// 라이터 목록 (쓰기 트랜잭션용)
    writers: Vec<ServerAddress>,
    /// 라우터 목록 (라우팅 테이블 조회용)
    routers: Vec<ServerAddress>,
    /// 만료 시각 (epoch millis)
    expires_at: i64,
    /// 다음 조회에서 초기 라우터를 먼저 사용할지 여부
    prefer_initial_router: bool,
    /// `update` 횟수
    generation: u64,
    clock: Arc<dyn Clock>,
}

impl RoutingTable {
    /// 새 라우팅 테이블 생성
    ///
    /// 새 테이블은 이미 만료된 상태이므로 첫 사용 시 갱신됩니다.
    pub fn new(database: DatabaseName, initial_routers: Vec<ServerAddress>, clock: Arc<dyn Clock>) -> Self {
        let expires_at = clock.millis().saturating_sub(1);
        Self {
            database,
            readers: Vec::new(),
            writers: Vec::new(),
            routers: dedup_addresses(initial_routers),
            expires_at,
            prefer_initial_router: true,
            generation: 0,
            clock,
        }
    }

    /// 데이터베이스 이름
    pub fn database(&self) -> &DatabaseName {
        &self.database
    }

    /// 리더 목록
    pub fn readers(&self) -> &[ServerAddress] {
        &self.readers
    }

    /// 라이터 목록
    pub fn writers(&self) -> &[ServerAddress] {
        &self.writers
    }

    /// 라우터 목록
    pub fn routers(&self) -> &[ServerAddress] {
        &self.routers
    }

    /// 접근 모드에 맞는 서버 목록
    pub fn servers_for(&self, mode: AccessMode) -> &[ServerAddress] {
        match mode {
            AccessMode::Read => &self.readers,
            AccessMode::Write => &self.writers,
        }
    }

    /// 만료 시각
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    /// 초기 라우터 우선 여부
    pub fn prefer_initial_router(&self) -> bool {
        self.prefer_initial_router
    }

    /// 갱신 세대 (`update`마다 증가)
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 접근 모드 기준으로 갱신이 필요한지 확인
    pub fn is_stale_for(&self, mode: AccessMode) -> bool {
        self.expires_at <= self.clock.millis()
            || self.routers.is_empty()
            || match mode {
                AccessMode::Read => self.readers.is_empty(),
                AccessMode::Write => self.writers.is_empty(),
            }
    }

    /// 만료 후 `extra` 이상 지났는지 확인
    pub fn has_been_stale_for(&self, extra: Duration) -> bool {
        self.expires_at.saturating_add(duration_millis(extra)) < self.clock.millis()
    }

    /// 클러스터 구성으로 테이블 교체
    pub fn update(&mut self, composition: &ClusterComposition) {
        self.expires_at = composition.expires_at;
        self.readers = composition.readers.clone();
        self.writers = composition.writers.clone();
        self.routers = composition.routers.clone();
        self.prefer_initial_router = !composition.has_writers();
        self.generation += 1;
    }

    /// 모든 역할에서 서버 제거
    pub fn forget(&mut self, address: &ServerAddress) {
        self.routers.retain(|a| a != address);
        self.readers.retain(|a| a != address);
        self.writers.retain(|a| a != address);
    }

    /// 라이터 목록에서만 서버 제거
    pub fn forget_writer(&mut self, address: &ServerAddress) {
        self.writers.retain(|a| a != address);
    }

    /// 테이블에 있는 모든 서버 (중복 제거, 순서 유지)
    pub fn servers(&self) -> Vec<ServerAddress> {
        dedup_addresses(
            self.readers
                .iter()
                .chain(&self.writers)
                .chain(&self.routers)
                .cloned(),
        )
    }
}

impl fmt::Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Ttl {}, currentTime {}, routers {}, writers {}, readers {}, database '{}'",
            self.expires_at,
            self.clock.millis(),
            join(&self.routers),
            join(&self.writers),
            join(&self.readers),
            self.database.description()
        )
    }
}
