//! 라우팅 정책
//!
//! 서버 선택 전략을 정의합니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;

use super::super::types::ServerAddress;
use crate::bolt::AccessMode;

/// 라우팅 정책
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RoutingPolicy {
    /// 최소 연결 (기본값, 시작 위치는 라운드 로빈)
    #[default]
    LeastConnected,
    /// 라운드 로빈
    RoundRobin,
    /// 랜덤
    Random,
}

/// 서버별 사용 중 연결 카운터
#[derive(Debug, Default)]
pub struct ConnectionCounter {
    counts: RwLock<HashMap<ServerAddress, usize>>,
}

impl ConnectionCounter {
    /// 새 카운터 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 연결 획득 시 카운트 증가
    pub fn increment(&self, server: &ServerAddress) {
        let mut counts = self.counts.write();
        *counts.entry(server.clone()).or_insert(0) += 1;
    }

    /// 연결 해제 시 카운트 감소
    pub fn decrement(&self, server: &ServerAddress) {
        let mut counts = self.counts.write();
        if let Some(count) = counts.get_mut(server) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(server);
            }
        }
    }

    /// 특정 서버의 연결 수 조회
    pub fn get(&self, server: &ServerAddress) -> usize {
        self.counts.read().get(server).copied().unwrap_or(0)
    }

    /// 현재 연결 수 스냅샷
    pub fn snapshot(&self) -> HashMap<ServerAddress, usize> {
        self.counts.read().clone()
    }
}

/// 서버 선택기
///
/// 리더와 라이터는 각자의 라운드 로빈 인덱스를 사용합니다.
#[derive(Debug)]
pub struct ServerSelector {
    policy: RoutingPolicy,
    readers_index: AtomicUsize,
    writers_index: AtomicUsize,
    counter: Arc<ConnectionCounter>,
}

impl ServerSelector {
    /// 새 선택기 생성
    pub fn new(policy: RoutingPolicy, counter: Arc<ConnectionCounter>) -> Self {
        Self {
            policy,
            readers_index: AtomicUsize::new(0),
            writers_index: AtomicUsize::new(0),
            counter,
        }
    }

    /// 접근 모드에 맞는 서버 선택
    pub fn select(&self, mode: AccessMode, servers: &[ServerAddress]) -> Option<ServerAddress> {
        match mode {
            AccessMode::Read => self.select_reader(servers),
            AccessMode::Write => self.select_writer(servers),
        }
    }

    /// 리더 선택
    pub fn select_reader(&self, servers: &[ServerAddress]) -> Option<ServerAddress> {
        self.select_with(servers, &self.readers_index)
    }

    /// 라이터 선택
    pub fn select_writer(&self, servers: &[ServerAddress]) -> Option<ServerAddress> {
        self.select_with(servers, &self.writers_index)
    }

    fn select_with(&self, servers: &[ServerAddress], index: &AtomicUsize) -> Option<ServerAddress> {
        if servers.is_empty() {
            return None;
        }

        let selected = match self.policy {
            RoutingPolicy::RoundRobin => &servers[index.fetch_add(1, Ordering::Relaxed) % servers.len()],
            RoutingPolicy::Random => &servers[rand::thread_rng().gen_range(0..servers.len())],
            RoutingPolicy::LeastConnected => {
                let start = index.fetch_add(1, Ordering::Relaxed) % servers.len();
                let counts = self.counter.snapshot();
                let count = |i: usize| counts.get(&servers[i]).copied().unwrap_or(0);

                // first strictly smaller count wins, scanning from the rotating start
                let mut chosen = start;
                let mut least = count(start);
                for offset in 1..servers.len() {
                    let i = (start + offset) % servers.len();
                    if count(i) < least {
                        chosen = i;
                        least = count(i);
                    }
                }
                &servers[chosen]
            }
        };
        Some(selected.clone())
    }

    /// 연결 카운터
    pub fn counter(&self) -> &Arc<ConnectionCounter> {
        &self.counter
    }

    /// 현재 정책 조회
    pub fn policy(&self) -> RoutingPolicy {
        self.policy
    }
}
