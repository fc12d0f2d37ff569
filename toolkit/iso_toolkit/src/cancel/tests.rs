use super::*;
use std::time::Duration;

#[test]
fn test_cancel_is_shared_and_idempotent() {
    let token = CancelToken::new();
    let clone = token.clone();
    assert!(token.check().is_ok());

    clone.cancel();
    clone.cancel();
    assert!(token.is_canceled());
    assert_eq!(token.check().unwrap_err(), TaskFault::Canceled);
}

#[tokio::test]
async fn test_cancelled_wakes_waiter() {
    let token = CancelToken::new();
    let remote = token.clone();
    let _ = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        remote.cancel();
    });
    token.cancelled().await;
    assert!(token.is_canceled());
}

#[tokio::test]
async fn test_cancelled_returns_immediately_when_already_cancelled() {
    let token = CancelToken::new();
    token.cancel();
    token.cancelled().await;
}
