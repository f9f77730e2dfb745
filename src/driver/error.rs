//! Driver Error Types
//!
//! 연결 계층 에러 정의

use std::sync::Arc;

use thiserror::Error;

use crate::bolt::BoltVersion;

// ============================================================================
// Well-known server error codes
// ============================================================================

/// 리더가 아닌 서버에 쓰기를 시도함
pub const NOT_A_LEADER: &str = "Neo.ClientError.Cluster.NotALeader";

/// 읽기 전용 데이터베이스에 쓰기를 시도함
pub const FORBIDDEN_ON_READ_ONLY_DATABASE: &str =
    "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase";

/// 데이터베이스를 일시적으로 사용할 수 없음
pub const DATABASE_UNAVAILABLE: &str = "Neo.TransientError.General.DatabaseUnavailable";

/// 데이터베이스가 존재하지 않음
pub const DATABASE_NOT_FOUND: &str = "Neo.ClientError.Database.DatabaseNotFound";

/// 잘못된 북마크
pub const INVALID_BOOKMARK: &str = "Neo.ClientError.Transaction.InvalidBookmark";

/// 인가 정보 만료
pub const AUTHORIZATION_EXPIRED: &str = "Neo.ClientError.Security.AuthorizationExpired";

/// 에러 원인 (복제 가능한 공유 에러)
pub type ErrorSource = Arc<dyn std::error::Error + Send + Sync + 'static>;

// ============================================================================
// DriverError - 드라이버 에러
// ============================================================================

/// 드라이버 에러
///
/// 하나의 라우팅 테이블 갱신 실패를 대기 중인 모든 호출자에게 그대로 전달해야 하므로
/// `Clone`을 구현합니다. 원인 에러는 `Arc`로 보관합니다.
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    /// 연결 에러
    #[error("Connection error: {0}")]
    Connection(String),

    /// 인증 에러
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// 프로토콜 에러
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 대기열 포화
    #[error("Connection pool pending acquisition queue is full.")]
    PendingQueueFull,

    /// 연결 획득 타임아웃
    #[error("Unable to acquire connection from the pool within configured maximum time of {timeout_ms}ms")]
    AcquisitionTimeout {
        /// 설정된 최대 대기 시간 (ms)
        timeout_ms: u128,
    },

    /// 최소 프로토콜 버전을 만족하지 못함
    #[error("Connection has lower protocol version {version} than required")]
    MinVersionAcquisition {
        /// 연결이 협상한 버전
        version: BoltVersion,
    },

    /// 서비스 불가
    #[error("Service unavailable: {message}")]
    ServiceUnavailable {
        /// 에러 메시지
        message: String,
        /// 원인 에러
        #[source]
        source: Option<ErrorSource>,
    },

    /// 세션 만료 (요청한 역할의 서버가 없음)
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// 서버가 보고한 실패
    #[error("Server error: {code} - {message}")]
    Failure {
        /// 서버 에러 코드 (`Neo.*`)
        code: String,
        /// 서버 에러 메시지
        message: String,
    },

    /// 풀 또는 프로바이더가 닫힘
    #[error("Closed: {0}")]
    Closed(String),

    /// 설정 에러
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 내부 에러
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DriverError {
    /// 연결 에러 생성
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// 인증 에러 생성
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// 프로토콜 에러 생성
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// 타임아웃 에러 생성
    pub fn acquisition_timeout(timeout: std::time::Duration) -> Self {
        Self::AcquisitionTimeout {
            timeout_ms: timeout.as_millis(),
        }
    }

    /// 서비스 불가 에러 생성
    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: msg.into(),
            source: None,
        }
    }

    /// 원인을 보존한 서비스 불가 에러 생성
    pub fn service_unavailable_caused_by(msg: impl Into<String>, cause: DriverError) -> Self {
        Self::ServiceUnavailable {
            message: msg.into(),
            source: Some(Arc::new(cause)),
        }
    }

    /// 세션 만료 에러 생성
    pub fn session_expired(msg: impl Into<String>) -> Self {
        Self::SessionExpired(msg.into())
    }

    /// 서버 실패 생성
    ///
    /// 보안 관련 코드는 인증 에러로 변환됩니다. 단, `AuthorizationExpired`는 코드를
    /// 유지하여 재시도 판단에 사용할 수 있도록 합니다.
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let message = message.into();
        if code.starts_with("Neo.ClientError.Security.") && code != AUTHORIZATION_EXPIRED {
            Self::Authentication(message)
        } else {
            Self::Failure { code, message }
        }
    }

    /// 닫힘 에러 생성
    pub fn closed(msg: impl Into<String>) -> Self {
        Self::Closed(msg.into())
    }

    /// 설정 에러 생성
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// 내부 에러 생성
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// 서버 에러 코드
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Failure { code, .. } => Some(code),
            _ => None,
        }
    }

    /// 서비스 불가 계열 여부
    pub fn is_service_unavailable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable { .. })
    }

    /// 연결 자체의 실패 여부 (다른 서버로 넘어가야 하는 에러)
    pub fn is_connectivity_error(&self) -> bool {
        matches!(self, Self::ServiceUnavailable { .. } | Self::Connection(_))
    }

    /// 재시도 가능 여부
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_)
            | Self::ServiceUnavailable { .. }
            | Self::SessionExpired(_)
            | Self::AcquisitionTimeout { .. } => true,
            Self::Failure { code, .. } => is_retryable_code(code),
            _ => false,
        }
    }

    /// 라우팅 정보 조회 중 발생하면 다른 라우터를 시도하지 않고 즉시 중단해야 하는 에러
    pub fn is_fatal_during_discovery(&self) -> bool {
        match self {
            Self::Authentication(_) | Self::Configuration(_) | Self::Closed(_) => true,
            Self::Failure { code, .. } => {
                code == DATABASE_NOT_FOUND
                    || code == INVALID_BOOKMARK
                    || code.starts_with("Neo.ClientError.Security.")
            }
            _ => false,
        }
    }
}

/// 재시도 가능한 에러 코드 확인
fn is_retryable_code(code: &str) -> bool {
    code.starts_with("Neo.TransientError")
        || code == NOT_A_LEADER
        || code == FORBIDDEN_ON_READ_ONLY_DATABASE
        || code == AUTHORIZATION_EXPIRED
}

// ============================================================================
// Result Type
// ============================================================================

/// 드라이버 결과 타입
pub type DriverResult<T> = Result<T, DriverError>;

// ============================================================================
// Tests
// ============================================================================
