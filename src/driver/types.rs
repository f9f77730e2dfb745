//! Connection Layer Types
//!
//! 서버 주소, 데이터베이스 이름, 인증 정보 등 연결 계층의 공용 타입

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use futures::FutureExt;

use super::error::{DriverError, DriverResult};
use crate::bolt::AuthToken;

/// 기본 Bolt 포트
pub const DEFAULT_PORT: u16 = 7687;

/// 시스템 데이터베이스 이름
pub const SYSTEM_DATABASE_NAME: &str = "system";

// ============================================================================
// ServerAddress - 서버 주소
// ============================================================================

/// 서버 주소
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerAddress {
    /// 호스트
    pub host: String,
    /// 포트
    pub port: u16,
}

impl ServerAddress {
    /// 새 서버 주소 생성
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host[:port]` 형식 파싱
    ///
    /// IPv6 주소는 `[::1]:7687` 처럼 대괄호로 감쌉니다. 포트가 없으면 7687을 사용합니다.
    pub fn parse(address: &str) -> DriverResult<Self> {
        let address = address.trim();
        if address.is_empty() {
            return Err(DriverError::configuration("Empty server address"));
        }

        if let Some(rest) = address.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| DriverError::configuration(format!("Invalid server address: {}", address)))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(port)?,
                None if tail.is_empty() => DEFAULT_PORT,
                None => {
                    return Err(DriverError::configuration(format!(
                        "Invalid server address: {}",
                        address
                    )))
                }
            };
            return Ok(Self::new(host, port));
        }

        let parts: Vec<&str> = address.split(':').collect();
        match parts.as_slice() {
            [host] => Ok(Self::new(*host, DEFAULT_PORT)),
            [host, port] if !host.is_empty() => Ok(Self::new(*host, parse_port(port)?)),
            _ => Err(DriverError::configuration(format!(
                "Invalid server address: {}",
                address
            ))),
        }
    }

    /// 소켓 주소로 변환
    pub fn to_socket_addr(&self) -> String {
        self.to_string()
    }
}

fn parse_port(port: &str) -> DriverResult<u16> {
    port.parse()
        .map_err(|_| DriverError::configuration(format!("Invalid port: {}", port)))
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

/// 삽입 순서를 보존하면서 중복을 제거한 주소 목록
pub(crate) fn dedup_addresses<I>(addresses: I) -> Vec<ServerAddress>
where
    I: IntoIterator<Item = ServerAddress>,
{
    let mut seen = HashSet::new();
    addresses
        .into_iter()
        .filter(|address| seen.insert(address.clone()))
        .collect()
}

// ============================================================================
// DatabaseName - 데이터베이스 이름
// ============================================================================

/// 데이터베이스 이름
///
/// `None`은 서버가 결정하는 기본(홈) 데이터베이스를 뜻합니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DatabaseName(Option<String>);

impl DatabaseName {
    /// 기본 데이터베이스
    pub fn default_database() -> Self {
        Self(None)
    }

    /// 이름이 지정된 데이터베이스
    pub fn named(name: impl Into<String>) -> Self {
        Self(Some(name.into()))
    }

    /// 시스템 데이터베이스
    pub fn system() -> Self {
        Self::named(SYSTEM_DATABASE_NAME)
    }

    /// 데이터베이스 이름 (기본 데이터베이스면 None)
    pub fn name(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// 기본 데이터베이스 여부
    pub fn is_default(&self) -> bool {
        self.0.is_none()
    }

    /// 로그용 설명
    pub fn description(&self) -> &str {
        self.0.as_deref().unwrap_or("<default database>")
    }
}

impl fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl From<&str> for DatabaseName {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

impl From<Option<String>> for DatabaseName {
    fn from(name: Option<String>) -> Self {
        Self(name)
    }
}

// ============================================================================
// Authentication - 인증
// ============================================================================

/// 연결에 적용된 인증 정보
#[derive(Debug, Clone, PartialEq)]
pub struct AuthInfo {
    /// 인증 토큰
    pub token: AuthToken,
    /// 서버가 인증을 확인한 시각 (epoch millis)
    pub ack_millis: i64,
}

impl AuthInfo {
    /// 새 인증 정보 생성
    pub fn new(token: AuthToken, ack_millis: i64) -> Self {
        Self { token, ack_millis }
    }
}

/// 인증 토큰 공급자
///
/// 토큰은 만료될 수 있으므로 연결을 획득할 때마다 다시 조회합니다.
pub type AuthTokenSupplier =
    Arc<dyn Fn() -> BoxFuture<'static, DriverResult<AuthToken>> + Send + Sync>;

/// 항상 같은 토큰을 돌려주는 공급자
pub fn static_auth(token: AuthToken) -> AuthTokenSupplier {
    Arc::new(move || future::ready(Ok(token.clone())).boxed())
}

// ============================================================================
// SecurityPlan - TLS 설정
// ============================================================================

/// TLS 신뢰 전략
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TrustStrategy {
    /// 시스템 인증서 사용
    #[default]
    TrustSystemCas,
    /// 모든 인증서 신뢰 (개발용)
    TrustAllCertificates,
    /// 특정 인증서만 신뢰
    TrustCustomCas {
        /// DER 인코딩된 인증서 목록
        certificates: Vec<Vec<u8>>,
    },
}

/// 연결 보안 설정
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityPlan {
    /// TLS 암호화 여부
    pub encrypted: bool,
    /// 인증서 신뢰 전략
    pub trust_strategy: TrustStrategy,
    /// 호스트 이름 검증 여부
    pub verify_hostname: bool,
}

impl SecurityPlan {
    /// 암호화하지 않는 설정
    pub fn insecure() -> Self {
        Self::default()
    }

    /// 시스템 인증서로 암호화하는 설정
    pub fn system_cas() -> Self {
        Self {
            encrypted: true,
            trust_strategy: TrustStrategy::TrustSystemCas,
            verify_hostname: true,
        }
    }

    /// URI 스킴(`+s`, `+ssc`)에서 보안 설정 유도
    pub fn from_scheme(scheme: &str) -> Self {
        if scheme.ends_with("+ssc") {
            Self {
                encrypted: true,
                trust_strategy: TrustStrategy::TrustAllCertificates,
                verify_hostname: false,
            }
        } else if scheme.ends_with("+s") {
            Self::system_cas()
        } else {
            Self::insecure()
        }
    }
}

// ============================================================================
// NotificationConfig - 알림 설정
// ============================================================================

/// 서버 알림 필터 (Bolt 5.2+)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationConfig {
    /// 최소 심각도 (예: "WARNING"), None이면 서버 기본값
    pub minimum_severity: Option<String>,
    /// 비활성화할 분류
    pub disabled_classifications: Vec<String>,
}

// ============================================================================
// Tests
// ============================================================================
