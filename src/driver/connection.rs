//! Connection Handle
//!
//! 물리 연결과 연결 팩토리는 외부 협력자이며 트레이트로만 정의합니다.
//! 풀과 라우팅 계층은 이 트레이트를 통해서만 연결을 다룹니다.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use super::error::DriverResult;
use super::types::{AuthInfo, AuthTokenSupplier, DatabaseName, NotificationConfig, SecurityPlan, ServerAddress};
use crate::bolt::{AccessMode, AuthToken, BoltVersion, Message, ResponseHandler};

// ============================================================================
// ConnectionState - 연결 상태
// ============================================================================

/// 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// 사용 가능
    Open,
    /// 복구할 수 없는 오류 발생
    Error,
    /// 닫힘
    Closed,
}

// ============================================================================
// BoltConnection - 연결 핸들
// ============================================================================

/// Bolt 연결 핸들
///
/// `write`는 요청을 버퍼에 쌓기만 하고, `flush`가 쌓인 요청을 전송한 뒤 모든 응답을
/// 순서대로 `handler`에 전달합니다. 마지막 응답 뒤에는 [`crate::bolt::Response::Complete`]가
/// 전달됩니다.
#[async_trait]
pub trait BoltConnection: Send {
    /// 서버 주소
    fn server_address(&self) -> &ServerAddress;

    /// 협상된 프로토콜 버전
    fn protocol_version(&self) -> BoltVersion;

    /// 연결 상태
    fn state(&self) -> ConnectionState;

    /// 현재 인증 정보 (인증 전이면 None)
    fn auth_info(&self) -> Option<AuthInfo>;

    /// 서버 에이전트 문자열
    fn server_agent(&self) -> &str;

    /// 요청 버퍼링
    async fn write(&mut self, messages: Vec<Message>) -> DriverResult<()>;

    /// 버퍼링된 요청 전송 및 응답 처리
    async fn flush(&mut self, handler: &mut dyn ResponseHandler) -> DriverResult<()>;

    /// 요청 버퍼링 후 즉시 전송
    async fn write_and_flush(
        &mut self,
        messages: Vec<Message>,
        handler: &mut dyn ResponseHandler,
    ) -> DriverResult<()> {
        self.write(messages).await?;
        self.flush(handler).await
    }

    /// 정상 종료 (풀에서 빌린 연결이면 풀로 반환)
    async fn close(&mut self) -> DriverResult<()>;

    /// 강제 종료 (풀에서 빌린 연결이면 풀에서 제거)
    async fn force_close(&mut self, reason: &str);
}

// ============================================================================
// ConnectionFactory - 연결 팩토리
// ============================================================================

/// 물리 연결 생성 인자
#[derive(Debug, Clone)]
pub struct ConnectParams {
    /// 서버 주소
    pub address: ServerAddress,
    /// 라우팅 컨텍스트 (라우팅 URI의 쿼리 파라미터)
    pub routing_context: HashMap<String, String>,
    /// 사용자 에이전트
    pub user_agent: String,
    /// 연결 타임아웃
    pub connect_timeout: Duration,
    /// 보안 설정
    pub security_plan: SecurityPlan,
    /// 대상 데이터베이스
    pub database: DatabaseName,
    /// 인증 토큰
    pub auth_token: AuthToken,
    /// 접근 모드
    pub access_mode: AccessMode,
    /// 북마크
    pub bookmarks: Vec<String>,
    /// 대리 사용자
    pub impersonated_user: Option<String>,
    /// 최소 프로토콜 버전
    pub min_version: Option<BoltVersion>,
    /// 알림 설정
    pub notification_config: NotificationConfig,
}

/// 물리 연결 팩토리
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// 연결 생성 (핸드셰이크와 인증 포함)
    async fn connect(&self, params: ConnectParams) -> DriverResult<Box<dyn BoltConnection>>;

    /// 팩토리 자원 정리
    async fn close(&self) -> DriverResult<()> {
        Ok(())
    }
}

// ============================================================================
// AcquireParams - 연결 획득 인자
// ============================================================================

/// 연결 획득 인자
#[derive(Clone)]
pub struct AcquireParams {
    /// 대상 데이터베이스
    pub database: DatabaseName,
    /// 인증 토큰 공급자
    pub auth: AuthTokenSupplier,
    /// 접근 모드
    pub access_mode: AccessMode,
    /// 북마크
    pub bookmarks: Vec<String>,
    /// 대리 사용자
    pub impersonated_user: Option<String>,
    /// 최소 프로토콜 버전
    pub min_version: Option<BoltVersion>,
    /// 알림 설정
    pub notification_config: NotificationConfig,
    /// 홈 데이터베이스 힌트 (기본 데이터베이스 요청 시 캐시된 이름)
    pub home_database_hint: Option<String>,
}

impl AcquireParams {
    /// 기본 데이터베이스, 쓰기 모드로 생성
    pub fn new(auth: AuthTokenSupplier) -> Self {
        Self {
            database: DatabaseName::default_database(),
            auth,
            access_mode: AccessMode::Write,
            bookmarks: Vec::new(),
            impersonated_user: None,
            min_version: None,
            notification_config: NotificationConfig::default(),
            home_database_hint: None,
        }
    }

    /// 데이터베이스 설정
    pub fn with_database(mut self, database: DatabaseName) -> Self {
        self.database = database;
        self
    }

    /// 접근 모드 설정
    pub fn with_access_mode(mut self, mode: AccessMode) -> Self {
        self.access_mode = mode;
        self
    }

    /// 북마크 설정
    pub fn with_bookmarks(mut self, bookmarks: Vec<String>) -> Self {
        self.bookmarks = bookmarks;
        self
    }

    /// 대리 사용자 설정
    pub fn with_impersonated_user(mut self, user: impl Into<String>) -> Self {
        self.impersonated_user = Some(user.into());
        self
    }

    /// 최소 프로토콜 버전 설정
    pub fn with_min_version(mut self, version: BoltVersion) -> Self {
        self.min_version = Some(version);
        self
    }

    /// 홈 데이터베이스 힌트 설정
    pub fn with_home_database_hint(mut self, name: impl Into<String>) -> Self {
        self.home_database_hint = Some(name.into());
        self
    }
}

impl fmt::Debug for AcquireParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquireParams")
            .field("database", &self.database)
            .field("access_mode", &self.access_mode)
            .field("bookmarks", &self.bookmarks)
            .field("impersonated_user", &self.impersonated_user)
            .field("min_version", &self.min_version)
            .field("home_database_hint", &self.home_database_hint)
            .finish_non_exhaustive()
    }
}
