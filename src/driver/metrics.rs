//! Pool Metrics
//!
//! 풀 크기 게이지와 생명주기 카운터

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// MetricsListener - 메트릭 수신자
// ============================================================================

/// 풀 크기 게이지 (등록된 풀에서 현재 값을 읽음)
pub trait PoolGauges: Send + Sync {
    /// 사용 중인 연결 수
    fn in_use(&self) -> usize;
    /// 유휴 연결 수
    fn idle(&self) -> usize;
}

/// 풀 메트릭 수신자
///
/// 모든 메서드는 기본 구현이 비어 있으므로 필요한 이벤트만 구현하면 됩니다.
#[allow(unused_variables)]
pub trait MetricsListener: Send + Sync {
    /// 풀 등록
    fn register_pool(&self, pool_id: &str, gauges: Arc<dyn PoolGauges>) {}

    /// 풀 등록 해제
    fn remove_pool(&self, pool_id: &str) {}

    /// 연결 생성 시작
    fn before_creating(&self, pool_id: &str) {}

    /// 연결 생성 완료
    fn after_created(&self, pool_id: &str, elapsed: Duration) {}

    /// 연결 생성 실패
    fn after_failed_to_create(&self, pool_id: &str) {}

    /// 연결 닫힘
    fn after_closed(&self, pool_id: &str) {}

    /// 획득 타임아웃
    fn after_timed_out_to_acquire(&self, pool_id: &str) {}

    /// 연결 획득 완료
    fn after_acquired(&self, pool_id: &str, elapsed: Duration) {}

    /// 연결 반환
    fn after_released(&self, pool_id: &str, in_use_for: Duration) {}
}

/// 아무것도 하지 않는 수신자
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsListener;

impl MetricsListener for NoopMetricsListener {}

// ============================================================================
// PoolMetrics - 풀 메트릭
// ============================================================================

/// 풀 메트릭 스냅샷
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// 현재 크기 (예약된 슬롯 포함)
    pub size: usize,
    /// 유휴 연결 수
    pub idle: usize,
    /// 사용 중인 연결 수
    pub in_use: usize,
    /// 대기 중인 획득 요청 수
    pub pending: usize,
    /// 총 획득 횟수
    pub total_acquired: u64,
    /// 총 생성 횟수
    pub total_created: u64,
    /// 총 생성 실패 횟수
    pub total_failed_to_create: u64,
    /// 총 닫힌 연결 수
    pub total_closed: u64,
    /// 총 타임아웃 횟수
    pub total_timed_out: u64,
}

impl PoolMetrics {
    /// 다른 풀의 메트릭 합산
    pub fn merge(&mut self, other: &PoolMetrics) {
        self.size += other.size;
        self.idle += other.idle;
        self.in_use += other.in_use;
        self.pending += other.pending;
        self.total_acquired += other.total_acquired;
        self.total_created += other.total_created;
        self.total_failed_to_create += other.total_failed_to_create;
        self.total_closed += other.total_closed;
        self.total_timed_out += other.total_timed_out;
    }
}

/// 풀 내부 카운터
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub(crate) acquired: AtomicU64,
    pub(crate) created: AtomicU64,
    pub(crate) failed_to_create: AtomicU64,
    pub(crate) closed: AtomicU64,
    pub(crate) timed_out: AtomicU64,
}

impl PoolCounters {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fill(&self, metrics: &mut PoolMetrics) {
        metrics.total_acquired = self.acquired.load(Ordering::Relaxed);
        metrics.total_created = self.created.load(Ordering::Relaxed);
        metrics.total_failed_to_create = self.failed_to_create.load(Ordering::Relaxed);
        metrics.total_closed = self.closed.load(Ordering::Relaxed);
        metrics.total_timed_out = self.timed_out.load(Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_metrics_merge() {
        let mut total = PoolMetrics::default();
        let a = PoolMetrics {
            size: 2,
            idle: 1,
            in_use: 1,
            total_created: 2,
            ..Default::default()
        };
        let b = PoolMetrics {
            size: 3,
            in_use: 3,
            total_timed_out: 1,
            ..Default::default()
        };
        total.merge(&a);
        total.merge(&b);

        assert_eq!(total.size, 5);
        assert_eq!(total.in_use, 4);
        assert_eq!(total.idle, 1);
        assert_eq!(total.total_created, 2);
        assert_eq!(total.total_timed_out, 1);
    }

    #[test]
    fn test_counters_fill() {
        let counters = PoolCounters::default();
        PoolCounters::incr(&counters.created);
        PoolCounters::incr(&counters.created);
        PoolCounters::incr(&counters.closed);

        let mut metrics = PoolMetrics::default();
        counters.fill(&mut metrics);
        assert_eq!(metrics.total_created, 2);
        assert_eq!(metrics.total_closed, 1);
        assert_eq!(metrics.total_acquired, 0);
    }
}
