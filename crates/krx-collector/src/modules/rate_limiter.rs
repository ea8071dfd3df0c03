//! 외부 요청 한도 준수를 위한 Rate Limiter.
//!
//! `acquire()`는 다음 요청을 보내도 될 때까지 호출자를 대기시키기만 하고 거절하지 않습니다.
//!
//! - `max_burst`가 없으면 모든 허가 사이에 최소 `min_interval` 간격을 둡니다.
//! - `max_burst = Some(n)`이면 용량 n의 Token Bucket을 `min_interval`마다 한 개씩 채웁니다.
//!
//! 대기열은 `tokio::sync::Mutex`의 공정 큐(FIFO)를 그대로 사용하므로
//! 여러 워커가 동시에 호출해도 요청 순서대로 허가됩니다.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct LimiterState {
    /// 마지막 허가 시각
    last_grant: Option<Instant>,
    /// 현재 토큰 수 (버스트 모드)
    tokens: f64,
    /// 마지막 리필 시각 (버스트 모드)
    last_refill: Instant,
    /// 누적 허가 수
    grants: u64,
}

/// 요청 간격 제한기.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    max_burst: Option<u32>,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// 새 Rate Limiter 생성.
    ///
    /// `max_burst`가 `Some(0)`이면 버스트 없음(`None`)과 같습니다.
    pub fn new(min_interval: Duration, max_burst: Option<u32>) -> Self {
        let max_burst = max_burst.filter(|b| *b > 0);
        Self {
            min_interval,
            max_burst,
            state: Mutex::new(LimiterState {
                last_grant: None,
                tokens: max_burst.map(f64::from).unwrap_or(0.0),
                last_refill: Instant::now(),
                grants: 0,
            }),
        }
    }

    /// 버스트 없이 고정 간격만 적용.
    pub fn strict(min_interval: Duration) -> Self {
        Self::new(min_interval, None)
    }

    /// 누적 허가 수.
    pub async fn grants(&self) -> u64 {
        self.state.lock().await.grants
    }

    /// 다음 요청이 허용될 때까지 대기합니다.
    pub async fn acquire(&self) {
        // 대기 중에도 락을 유지해 뒤따르는 호출자가 순서를 추월하지 못하게 함
        let mut state = self.state.lock().await;

        if !self.min_interval.is_zero() {
            let now = Instant::now();
            let ready_at = match self.max_burst {
                None => state.last_grant.map(|last| last + self.min_interval),
                Some(burst) => {
                    self.refill(&mut state, now, burst);
                    if state.tokens >= 1.0 {
                        None
                    } else {
                        let missing = 1.0 - state.tokens;
                        Some(now + self.min_interval.mul_f64(missing))
                    }
                }
            };

            if let Some(ready_at) = ready_at {
                if ready_at > now {
                    tokio::time::sleep_until(ready_at).await;
                }
            }

            if let Some(burst) = self.max_burst {
                self.refill(&mut state, Instant::now(), burst);
                state.tokens = (state.tokens - 1.0).max(0.0);
            }
        }

        state.last_grant = Some(Instant::now());
        state.grants += 1;
    }

    fn refill(&self, state: &mut LimiterState, now: Instant, burst: u32) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let gained = elapsed.as_secs_f64() / self.min_interval.as_secs_f64();
        state.tokens = (state.tokens + gained).min(f64::from(burst));
        state.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_strict_spacing() {
        let limiter = RateLimiter::strict(Duration::from_millis(100));
        let start = Instant::now();

        let mut grants = Vec::new();
        for _ in 0..5 {
            limiter.acquire().await;
            grants.push(Instant::now());
        }

        assert_eq!(grants[0], start);
        for pair in grants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
        assert_eq!(limiter.grants().await, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_paced() {
        let limiter = RateLimiter::new(Duration::from_millis(100), Some(3));
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(Instant::now(), start);

        limiter.acquire().await;
        assert!(Instant::now() - start >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_never_waits() {
        let limiter = RateLimiter::strict(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire().await;
        }
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_are_serialized() {
        let limiter = Arc::new(RateLimiter::strict(Duration::from_millis(50)));
        let grants = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = limiter.clone();
            let grants = grants.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..3 {
                    limiter.acquire().await;
                    grants.lock().unwrap().push(Instant::now());
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut grants = grants.lock().unwrap().clone();
        grants.sort();
        assert_eq!(grants.len(), 12);
        for pair in grants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(50));
        }
    }
}
