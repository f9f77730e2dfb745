//! Clock
//!
//! 풀 엔트리와 라우팅 테이블의 모든 시각은 주입된 시계에서 얻습니다.
//! 시각은 epoch millis(`i64`)이며 `i64::MAX`는 "만료되지 않음"을 뜻합니다.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// 시계
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// 현재 시각 (epoch millis)
    fn millis(&self) -> i64;
}

/// 시스템 시계
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// 수동으로 움직이는 시계
#[derive(Debug, Default)]
pub struct FakeClock {
    now: AtomicI64,
}

impl FakeClock {
    /// 주어진 시각에서 시작
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    /// 시간 진행
    pub fn advance(&self, by: Duration) {
        let by = duration_millis(by);
        let mut current = self.now.load(Ordering::SeqCst);
        while let Err(actual) =
            self.now
                .compare_exchange_weak(current, current.saturating_add(by), Ordering::SeqCst, Ordering::SeqCst)
        {
            current = actual;
        }
    }

    /// 시각 설정
    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// `Duration`을 millis로 변환 (넘치면 `i64::MAX`)
pub(crate) fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
