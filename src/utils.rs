//! Small helpers shared by the panel client, services and fleet orchestrator

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Format bytes into human-readable string (KB, MB, GB)
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}KB", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Convert a byte cap to the whole-GB figure panels expect. Rounds up so a
/// non-zero cap never becomes "unlimited".
pub fn bytes_to_gb(bytes: u64) -> u64 {
    bytes.div_ceil(BYTES_PER_GB)
}

pub fn gb_to_bytes(gb: u64) -> u64 {
    gb.saturating_mul(BYTES_PER_GB)
}

/// Linear backoff: `attempt * base`
pub fn linear_backoff(attempt: u32, base: Duration) -> Duration {
    base.saturating_mul(attempt)
}

pub fn get_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Repeatedly run `check` every `interval` until it yields a value or
/// `timeout` elapses.
///
/// `Ok(Some(v))` when the condition was met, `Ok(None)` when the deadline
/// passed, `Err` as soon as `check` reports a hard failure. One final check
/// always runs at the deadline.
pub async fn poll_until<T, E, F, Fut>(
    interval: Duration,
    timeout: Duration,
    mut check: F,
) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = check().await? {
            return Ok(Some(value));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        sleep(interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.00KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00GB");
    }

    #[test]
    fn test_bytes_to_gb_rounds_up() {
        assert_eq!(bytes_to_gb(0), 0);
        assert_eq!(bytes_to_gb(1), 1);
        assert_eq!(bytes_to_gb(gb_to_bytes(50)), 50);
        assert_eq!(bytes_to_gb(gb_to_bytes(50) + 1), 51);
    }

    #[test]
    fn test_linear_backoff() {
        let base = Duration::from_millis(1000);
        assert_eq!(linear_backoff(1, base), Duration::from_millis(1000));
        assert_eq!(linear_backoff(3, base), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_ready() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: Result<Option<u32>, ()> =
            poll_until(Duration::from_secs(5), Duration::from_secs(60), || {
                let c = Arc::clone(&c);
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(if n == 3 { Some(n) } else { None })
                }
            })
            .await;
        assert_eq!(result, Ok(Some(3)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_deadline() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: Result<Option<()>, ()> =
            poll_until(Duration::from_secs(10), Duration::from_secs(30), || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                }
            })
            .await;
        assert_eq!(result, Ok(None));
        // t=0, 10, 20, 30
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_error_aborts() {
        let result: Result<Option<()>, &str> =
            poll_until(Duration::from_secs(1), Duration::from_secs(30), || async {
                Err("boom")
            })
            .await;
        assert_eq!(result, Err("boom"));
    }
}
