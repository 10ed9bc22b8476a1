//! 瞬时错误的有限重试

use super::Transport;
use crate::config::EngineConfig;
use crate::error::{DeployError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 基础延迟，第 n 次重试等待 base * 2^(n-1)
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for RetryPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// 执行操作，仅对瞬时错误重试；每次重试前尝试重建会话
///
/// 认证、权限等错误直接返回。重试耗尽后返回 `RetriesExhausted`。
pub async fn retry_transient<T, F, Fut>(
    policy: RetryPolicy,
    transport: &dyn Transport,
    what: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => e,
            Err(e) => return Err(e),
        };

        if attempt >= max_attempts {
            error!("{} 最终失败 (共尝试 {} 次): {}", what, attempt, err);
            return Err(DeployError::RetriesExhausted {
                attempts: attempt,
                last_error: err.to_string(),
            });
        }

        let delay = policy.delay_for(attempt);
        warn!(
            "{} 失败，{}ms 后重试 ({}/{}): {}",
            what,
            delay.as_millis(),
            attempt,
            max_attempts,
            err
        );
        tokio::time::sleep(delay).await;

        if let Err(e) = transport.reconnect().await {
            if e.is_fatal() {
                return Err(e);
            }
            warn!("重建会话失败，继续重试: {}", e);
        }

        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalTransport;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LocalTransport::new(dir.path()).unwrap();
        let calls = &AtomicU32::new(0);

        let result = retry_transient(fast_policy(3), &transport, "upload c.txt", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(DeployError::TransientTransfer("connection reset".into()))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LocalTransport::new(dir.path()).unwrap();
        let calls = &AtomicU32::new(0);

        let result: Result<()> = retry_transient(fast_policy(3), &transport, "upload", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DeployError::TransientTransfer("timeout".into()))
        })
        .await;

        assert!(matches!(
            result,
            Err(DeployError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permission_error_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LocalTransport::new(dir.path()).unwrap();
        let calls = &AtomicU32::new(0);

        let result: Result<()> = retry_transient(fast_policy(3), &transport, "upload", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DeployError::Permission("550".into()))
        })
        .await;

        assert!(matches!(result, Err(DeployError::Permission(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_delays() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }
}
