//! 재시도 대기 정책.

use std::str::FromStr;
use std::time::Duration;

/// 실패한 시도 후 다음 시도까지의 대기 방식.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryBackoff {
    /// 매번 같은 간격
    Fixed(Duration),
    /// 2배씩 증가, 상한 적용
    Exponential { initial: Duration, max: Duration },
}

impl Default for RetryBackoff {
    /// 외부 요청 한도(3.6초 간격)에 맞춘 고정 대기.
    fn default() -> Self {
        Self::Fixed(Duration::from_millis(3600))
    }
}

impl RetryBackoff {
    /// `attempt`번째(1부터) 시도가 실패한 뒤의 대기 시간.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Exponential { initial, max } => {
                let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
                initial.saturating_mul(multiplier).min(max)
            }
        }
    }
}

/// 대기 방식 종류 (설정값).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

impl FromStr for BackoffKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "exponential" | "exp" => Ok(Self::Exponential),
            _ => Err(format!("Unknown retry backoff: {}", s)),
        }
    }
}

impl BackoffKind {
    /// 기본 대기 시간과 상한으로 정책 생성.
    pub fn build(self, base: Duration, max: Duration) -> RetryBackoff {
        match self {
            Self::Fixed => RetryBackoff::Fixed(base),
            Self::Exponential => RetryBackoff::Exponential {
                initial: base,
                max: max.max(base),
            },
        }
    }
}
