//! 라우팅 연결
//!
//! 풀에서 빌린 연결을 감싸 서버가 보고한 오류를 분류하고 라우팅 테이블에 반영합니다.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::super::connection::{BoltConnection, ConnectionState};
use super::super::error::{
    DriverError, DriverResult, DATABASE_UNAVAILABLE, FORBIDDEN_ON_READ_ONLY_DATABASE, NOT_A_LEADER,
};
use super::super::types::{AuthInfo, ServerAddress};
use super::handler::RoutingFailureListener;
use super::policy::ConnectionCounter;
use crate::bolt::{AccessMode, AuthToken, BoltVersion, Message, Response, ResponseHandler, TransactionParams, Value};

// ============================================================================
// RoutedConnection - 라우팅 연결
// ============================================================================

/// 라우팅 연결
///
/// 요청 메서드는 같은 래퍼를 돌려주므로 연쇄 호출할 수 있습니다. 요청은 버퍼에만
/// 쌓이고 [`RoutedConnection::flush`]가 전송합니다.
pub struct RoutedConnection {
    delegate: Box<dyn BoltConnection>,
    address: ServerAddress,
    access_mode: AccessMode,
    listener: Arc<dyn RoutingFailureListener>,
    counter: Option<Arc<ConnectionCounter>>,
}

impl RoutedConnection {
    /// 연결 감싸기
    ///
    /// `counter`가 있으면 닫힐 때 이 주소의 사용 중 연결 수를 한 번 줄입니다.
    pub fn new(
        delegate: Box<dyn BoltConnection>,
        access_mode: AccessMode,
        listener: Arc<dyn RoutingFailureListener>,
        counter: Option<Arc<ConnectionCounter>>,
    ) -> Self {
        Self {
            address: delegate.server_address().clone(),
            delegate,
            access_mode,
            listener,
            counter,
        }
    }

    /// 연결을 획득한 접근 모드
    pub fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    async fn push(&mut self, message: Message) -> DriverResult<&mut Self> {
        self.delegate.write(vec![message]).await?;
        Ok(self)
    }

    /// ROUTE
    pub async fn route(
        &mut self,
        routing_context: HashMap<String, String>,
        database: Option<String>,
        impersonated_user: Option<String>,
        bookmarks: Vec<String>,
    ) -> DriverResult<&mut Self> {
        self.push(Message::route(routing_context, database, impersonated_user, bookmarks))
            .await
    }

    /// BEGIN
    pub async fn begin_transaction(&mut self, params: TransactionParams) -> DriverResult<&mut Self> {
        self.push(Message::Begin(params)).await
    }

    /// 명시적 트랜잭션 안의 RUN
    pub async fn run(
        &mut self,
        query: impl Into<String>,
        parameters: HashMap<String, Value>,
    ) -> DriverResult<&mut Self> {
        self.push(Message::Run {
            query: query.into(),
            parameters,
            transaction: None,
        })
        .await
    }

    /// 자동 커밋 트랜잭션 RUN
    pub async fn run_in_auto_commit(
        &mut self,
        query: impl Into<String>,
        parameters: HashMap<String, Value>,
        transaction: TransactionParams,
    ) -> DriverResult<&mut Self> {
        self.push(Message::Run {
            query: query.into(),
            parameters,
            transaction: Some(transaction),
        })
        .await
    }

    /// PULL
    pub async fn pull(&mut self, qid: i64, n: i64) -> DriverResult<&mut Self> {
        self.push(Message::Pull { qid, n }).await
    }

    /// DISCARD
    pub async fn discard(&mut self, qid: i64, n: i64) -> DriverResult<&mut Self> {
        self.push(Message::Discard { qid, n }).await
    }

    /// COMMIT
    pub async fn commit(&mut self) -> DriverResult<&mut Self> {
        self.push(Message::Commit).await
    }

    /// ROLLBACK
    pub async fn rollback(&mut self) -> DriverResult<&mut Self> {
        self.push(Message::Rollback).await
    }

    /// RESET
    pub async fn reset(&mut self) -> DriverResult<&mut Self> {
        self.push(Message::Reset).await
    }

    /// LOGOFF
    pub async fn logoff(&mut self) -> DriverResult<&mut Self> {
        self.push(Message::Logoff).await
    }

    /// LOGON
    pub async fn logon(&mut self, token: AuthToken) -> DriverResult<&mut Self> {
        self.push(Message::Logon(token)).await
    }

    /// TELEMETRY
    pub async fn telemetry(&mut self, api: i64) -> DriverResult<&mut Self> {
        self.push(Message::Telemetry(api)).await
    }

    /// 버퍼링된 요청 전송
    ///
    /// 응답 오류는 분류되어 `handler`에 전달됩니다. 한 번의 flush에서 라우팅 테이블
    /// 갱신 요청은 첫 오류에 대해서만 보냅니다.
    pub async fn flush(&mut self, handler: &mut dyn ResponseHandler) -> DriverResult<()> {
        let mut classifier = FailureClassifier::new(
            handler,
            &self.address,
            self.access_mode,
            self.listener.as_ref(),
        );
        match self.delegate.flush(&mut classifier).await {
            Ok(()) => Ok(()),
            Err(e) => Err(classifier.classify(e)),
        }
    }

    fn release_in_use(&mut self) {
        if let Some(counter) = self.counter.take() {
            counter.decrement(&self.address);
        }
    }
}

#[async_trait]
impl BoltConnection for RoutedConnection {
    fn server_address(&self) -> &ServerAddress {
        &self.address
    }

    fn protocol_version(&self) -> BoltVersion {
        self.delegate.protocol_version()
    }

    fn state(&self) -> ConnectionState {
        self.delegate.state()
    }

    fn auth_info(&self) -> Option<AuthInfo> {
        self.delegate.auth_info()
    }

    fn server_agent(&self) -> &str {
        self.delegate.server_agent()
    }

    async fn write(&mut self, messages: Vec<Message>) -> DriverResult<()> {
        self.delegate.write(messages).await
    }

    async fn flush(&mut self, handler: &mut dyn ResponseHandler) -> DriverResult<()> {
        RoutedConnection::flush(self, handler).await
    }

    async fn close(&mut self) -> DriverResult<()> {
        self.release_in_use();
        self.delegate.close().await
    }

    async fn force_close(&mut self, reason: &str) {
        self.release_in_use();
        self.delegate.force_close(reason).await
    }
}

impl Drop for RoutedConnection {
    fn drop(&mut self) {
        self.release_in_use();
    }
}

impl fmt::Debug for RoutedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutedConnection")
            .field("address", &self.address)
            .field("access_mode", &self.access_mode)
            .field("state", &self.delegate.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// FailureClassifier - 오류 분류
// ============================================================================

/// 응답 오류를 분류해 라우팅 테이블에 알리고 원래 핸들러로 전달
struct FailureClassifier<'a> {
    inner: &'a mut dyn ResponseHandler,
    address: &'a ServerAddress,
    access_mode: AccessMode,
    listener: &'a dyn RoutingFailureListener,
    notify: bool,
}

impl<'a> FailureClassifier<'a> {
    fn new(
        inner: &'a mut dyn ResponseHandler,
        address: &'a ServerAddress,
        access_mode: AccessMode,
        listener: &'a dyn RoutingFailureListener,
    ) -> Self {
        Self {
            inner,
            address,
            access_mode,
            listener,
            notify: true,
        }
    }

    fn classify(&mut self, error: DriverError) -> DriverError {
        let notify = std::mem::replace(&mut self.notify, false);

        if error.is_connectivity_error() {
            if notify {
                debug!(address = %self.address, error = %error, "Server is no longer available");
                self.listener.on_connection_failure(self.address);
            }
            return DriverError::service_unavailable_caused_by(
                format!("Server at {} is no longer available", self.address),
                error,
            );
        }

        match error.code() {
            Some(DATABASE_UNAVAILABLE) if notify => self.listener.on_connection_failure(self.address),
            Some(NOT_A_LEADER | FORBIDDEN_ON_READ_ONLY_DATABASE)
                if notify && self.access_mode == AccessMode::Write =>
            {
                self.listener.on_write_failure(self.address)
            }
            _ => {}
        }
        error
    }
}

impl ResponseHandler for FailureClassifier<'_> {
    fn on_response(&mut self, response: Response) {
        let response = match response {
            Response::Error(error) => Response::Error(self.classify(error)),
            other => other,
        };
        self.inner.on_response(response);
    }
}
