//! 超时采样器测试

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use atp_converge::{ExecutorError, RemoteError, Sample, TimeoutSampler, Verdict};

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

async fn never_satisfied(timeout: u64, poll: u64) -> (ExecutorError, Duration) {
    let started = Instant::now();
    let sampler = TimeoutSampler::new(secs(timeout), secs(poll), || async {
        Ok::<_, RemoteError>("poweringup".to_string())
    })
    .unwrap()
    .describe("vm-1 -> up");

    let err = sampler
        .until(|_: Sample<String>| Verdict::<()>::Retry)
        .await
        .unwrap_err();
    (err, started.elapsed())
}

#[tokio::test(start_paused = true)]
async fn test_timeout_bound_divisible() {
    let (err, elapsed) = never_satisfied(30, 5).await;

    assert!(elapsed >= secs(30) && elapsed <= secs(35), "elapsed {:?}", elapsed);
    match err {
        ExecutorError::TimeoutExceeded {
            what,
            attempts,
            last_observed,
            last_error,
            ..
        } => {
            assert_eq!(what, "vm-1 -> up");
            assert_eq!(attempts, 7);
            assert!(last_observed.unwrap().contains("poweringup"));
            assert!(last_error.is_none());
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_timeout_bound_not_divisible() {
    for (timeout, poll) in [(10, 3), (7, 2), (1, 5), (12, 12)] {
        let (err, elapsed) = never_satisfied(timeout, poll).await;
        assert!(err.is_timeout());
        assert!(
            elapsed >= secs(timeout) && elapsed <= secs(timeout + poll),
            "T={} p={} elapsed {:?}",
            timeout,
            poll,
            elapsed
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_probe_errors_do_not_abort() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let sampler = TimeoutSampler::new(secs(30), secs(5), move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if n < 3 {
                Err(RemoteError::NotFound("vm-1".to_string()))
            } else {
                Ok("up".to_string())
            }
        }
    })
    .unwrap();

    let started = Instant::now();
    let status = sampler
        .until(|s| match s.result {
            Ok(status) => Verdict::Converged(status),
            Err(_) => Verdict::Retry,
        })
        .await
        .unwrap();

    assert_eq!(status, "up");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(started.elapsed(), secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_last_error_only_from_final_attempt() {
    // 前两次失败，之后一直成功但不满足条件
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let sampler = TimeoutSampler::new(secs(10), secs(2), move || {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < 2 {
                Err(RemoteError::Transport("connection reset".to_string()))
            } else {
                Ok("locked")
            }
        }
    })
    .unwrap();
    match sampler.until(|_| Verdict::<()>::Retry).await.unwrap_err() {
        ExecutorError::TimeoutExceeded {
            last_observed,
            last_error,
            ..
        } => {
            assert!(last_observed.unwrap().contains("locked"));
            assert!(last_error.is_none());
        }
        other => panic!("unexpected: {:?}", other),
    }

    // 最后一次失败
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let sampler = TimeoutSampler::new(secs(10), secs(2), move || {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 0 {
                Ok("locked")
            } else {
                Err(RemoteError::Transport("connection reset".to_string()))
            }
        }
    })
    .unwrap();
    match sampler.until(|_| Verdict::<()>::Retry).await.unwrap_err() {
        ExecutorError::TimeoutExceeded {
            last_observed,
            last_error,
            ..
        } => {
            assert!(last_observed.unwrap().contains("locked"));
            assert!(last_error.unwrap().contains("connection reset"));
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_hung_probe_is_bounded() {
    let mut sampler = TimeoutSampler::new(secs(10), secs(2), || {
        std::future::pending::<Result<String, RemoteError>>()
    })
    .unwrap();

    let started = Instant::now();
    let sample = sampler.next_sample().await.unwrap();
    assert!(matches!(sample.result, Err(RemoteError::ProbeTimeout(_))));
    assert_eq!(started.elapsed(), secs(12));

    assert!(sampler.next_sample().await.is_none());
    match sampler.exhausted_error() {
        ExecutorError::TimeoutExceeded { last_error, .. } => {
            assert!(last_error.is_some());
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_wait() {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(secs(7)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = TimeoutSampler::new(secs(60), secs(5), || async { Ok::<_, RemoteError>(0) })
        .unwrap()
        .with_cancel(token)
        .until(|_| Verdict::<()>::Retry)
        .await
        .unwrap_err();

    assert!(matches!(err, ExecutorError::Cancelled(_)));
    assert_eq!(started.elapsed(), secs(7));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_hung_probe() {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(secs(3)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = TimeoutSampler::new(secs(60), secs(5), || {
        std::future::pending::<Result<(), RemoteError>>()
    })
    .unwrap()
    .with_cancel(token)
    .until(|_| Verdict::<()>::Retry)
    .await
    .unwrap_err();

    assert!(matches!(err, ExecutorError::Cancelled(_)));
    assert_eq!(started.elapsed(), secs(3));
}
