use super::*;
use crate::{CancelToken, ToolkitError};
use iso_host::EnvironmentSetup;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn scratch(name: &str) -> Environment {
    Environment::create(EnvironmentSetup::default().with_application_name(name)).unwrap()
}

#[test]
fn test_func_arities() {
    let env = scratch("func-arities");
    assert_eq!(RemoteFunc::invoke(&env, || 42).unwrap(), 42);
    assert_eq!(RemoteFunc::invoke1(&env, 10, |x: i32| x + 1).unwrap(), 11);
    assert_eq!(RemoteFunc::invoke2(&env, 2, 3, |a: i32, b: i32| a * b).unwrap(), 6);
    assert_eq!(
        RemoteFunc::invoke3(&env, "a", "b", "c", |a: &str, b: &str, c: &str| {
            format!("{a}{b}{c}")
        })
        .unwrap(),
        "abc"
    );
    assert_eq!(
        RemoteFunc::invoke4(&env, 1u8, 2u16, 3u32, 4u64, |a, b, c, d| {
            u64::from(a) + u64::from(b) + u64::from(c) + d
        })
        .unwrap(),
        10
    );
    env.unload().unwrap();
}

#[test]
fn test_func_runs_inside_target() {
    let env = scratch("func-target");
    let name = RemoteFunc::invoke(&env, || Environment::current().name().to_string()).unwrap();
    assert_eq!(name, "func-target");
    env.unload().unwrap();
}

#[test]
fn test_action_side_effects_cross_back() {
    let env = scratch("action");
    // A counter living in the home environment, reached through a handle.
    let counter = Environment::home()
        .construct(|| AtomicUsize::new(0))
        .unwrap();

    let handle = counter.clone();
    RemoteAction::invoke(&env, move || {
        handle.invoke(|c| c.fetch_add(1, Ordering::SeqCst)).unwrap();
    })
    .unwrap();
    let handle = counter.clone();
    RemoteAction::invoke4(&env, 1usize, 2usize, 3usize, 4usize, move |a, b, c, d| {
        handle
            .invoke(move |count| count.fetch_add(a + b + c + d, Ordering::SeqCst))
            .unwrap();
    })
    .unwrap();

    assert_eq!(counter.invoke(|c| c.load(Ordering::SeqCst)).unwrap(), 11);
    counter.release().unwrap();
    env.unload().unwrap();
}

#[test]
fn test_unloaded_environment_is_rejected_up_front() {
    let env = scratch("gone");
    env.unload().unwrap();
    let ran = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&ran);

    let err = RemoteAction::invoke(&env, move || {
        flag.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap_err();
    assert!(err.is_disposed());
    assert!(RemoteFunc::invoke(&env, || 1).unwrap_err().is_disposed());
    assert!(RemoteFuncAsync::invoke(&env, || async { Ok::<_, TaskFault>(1) })
        .unwrap_err()
        .is_disposed());
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn test_panic_surfaces_as_remote_fault() {
    let env = scratch("panicky");
    let err = RemoteFunc::invoke(&env, || -> u32 { panic!("kaboom") }).unwrap_err();
    match err {
        ToolkitError::RemoteFault { faults } => assert_eq!(faults[0].message, "kaboom"),
        other => panic!("unexpected: {other:?}"),
    }
    // The environment keeps working.
    assert_eq!(RemoteFunc::invoke(&env, || 1).unwrap(), 1);
    env.unload().unwrap();
}

#[test]
fn test_async_result() {
    let env = scratch("async-result");
    let task = RemoteFuncAsync::invoke(&env, || async {
        tokio::task::yield_now().await;
        Ok::<_, TaskFault>(42)
    })
    .unwrap();
    assert_eq!(task.wait().unwrap(), 42);

    let task = RemoteFuncAsync::invoke5(&env, 1, 2, 3, 4, 5, |a, b, c, d, e| async move {
        Ok::<i32, TaskFault>(a + b + c + d + e)
    })
    .unwrap();
    assert_eq!(task.wait().unwrap(), 15);
    env.unload().unwrap();
}

#[test]
fn test_async_runs_on_target_executor() {
    let env = scratch("async-target");
    let task = RemoteFuncAsync::invoke(&env, || async {
        // Rc is !Send; allowed because the future stays on one thread.
        let local = std::rc::Rc::new(Environment::current().name().to_string());
        tokio::task::yield_now().await;
        Ok::<_, TaskFault>((*local).clone())
    })
    .unwrap();
    assert_eq!(task.wait().unwrap(), "async-target");
    env.unload().unwrap();
}

#[test]
fn test_async_fault_surfaces_remote_fault() {
    let env = scratch("async-fault");
    let task = RemoteFuncAsync::invoke1(&env, "config.toml".to_string(), |file| async move {
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, file);
        Err::<(), _>(TaskFault::from(missing))
    })
    .unwrap();
    match task.wait() {
        Err(ToolkitError::RemoteFault { faults }) => {
            assert_eq!(faults.len(), 1);
            assert_eq!(faults[0].message, "config.toml");
        }
        other => panic!("unexpected: {other:?}"),
    }
    env.unload().unwrap();
}

async fn explode() -> Result<u8, TaskFault> {
    panic!("async kaboom")
}

#[test]
fn test_async_panic_surfaces_remote_fault() {
    let env = scratch("async-panic");
    let task = RemoteFuncAsync::invoke(&env, explode).unwrap();
    match task.wait() {
        Err(ToolkitError::RemoteFault { faults }) => {
            assert_eq!(faults[0].type_name, "panic");
            assert_eq!(faults[0].message, "async kaboom");
        }
        other => panic!("unexpected: {other:?}"),
    }
    env.unload().unwrap();
}

#[test]
fn test_async_cancellation() {
    let env = scratch("async-cancel");
    let token = CancelToken::new();
    let task = RemoteFuncAsync::invoke1(&env, token.clone(), |token: CancelToken| async move {
        token.cancelled().await;
        token.check()?;
        Ok::<(), TaskFault>(())
    })
    .unwrap();

    token.cancel();
    assert!(matches!(task.wait(), Err(ToolkitError::Canceled)));
    // Cancelling after completion is harmless.
    token.cancel();
    env.unload().unwrap();
}

#[test]
fn test_unload_with_pending_task_resolves_disposed() {
    let env = scratch("async-abandoned");
    let task = RemoteFuncAsync::invoke(&env, || async {
        std::future::pending::<()>().await;
        Ok::<_, TaskFault>(())
    })
    .unwrap();
    env.unload().unwrap();
    assert!(task.wait().unwrap_err().is_disposed());
}

#[tokio::test]
async fn test_async_task_is_awaitable_from_async_code() {
    let env = scratch("async-await");
    let task = RemoteFuncAsync::invoke2(&env, 20, 22, |a: i32, b: i32| async move {
        Ok::<_, TaskFault>(a + b)
    })
    .unwrap();
    assert_eq!(task.await.unwrap(), 42);
    env.unload().unwrap();
}
