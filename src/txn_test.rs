use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[test]
fn test_sequential_all_succeed() {
    let log = Mutex::new(Vec::new());
    let steps = vec![
        Step::new(
            || {
                log.lock().unwrap().push("a");
                Ok(())
            },
            || Ok(()),
        ),
        Step::new(
            || {
                log.lock().unwrap().push("b");
                Ok(())
            },
            || Ok(()),
        ),
    ];
    run_sequential(steps).unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
}

#[test]
fn test_sequential_rolls_back_completed_steps_in_reverse() {
    let rollback_log = Mutex::new(Vec::new());
    let steps = vec![
        Step::new(|| Ok(()), || {
            rollback_log.lock().unwrap().push(1);
            Ok(())
        }),
        Step::new(|| Ok(()), || {
            rollback_log.lock().unwrap().push(2);
            Ok(())
        }),
        Step::new(
            || Err(Error::NoSpace("boom".into())),
            || {
                rollback_log.lock().unwrap().push(3);
                Ok(())
            },
        ),
    ];
    let err = run_sequential(steps).unwrap_err();
    assert!(matches!(err, Error::NoSpace(_)));
    assert_eq!(*rollback_log.lock().unwrap(), vec![2, 1]);
}

#[test]
fn test_sequential_rollback_failure_attaches_to_original() {
    let steps = vec![
        Step::new(|| Ok(()), || Err(Error::IoError(std::io::Error::new(std::io::ErrorKind::Other, "disk")))),
        Step::new(|| Err(Error::NoSpace("boom".into())), || Ok(())),
    ];
    let err = run_sequential(steps).unwrap_err();
    match err {
        Error::RollbackError(original, rollback) => {
            assert!(matches!(*original, Error::NoSpace(_)));
            assert!(matches!(*rollback, Error::IoError(_)));
        }
        other => panic!("expected RollbackError, got {:?}", other),
    }
}

#[test]
fn test_parallel_all_succeed() {
    let counter = AtomicUsize::new(0);
    let steps = vec![
        Step::new(
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            || Ok(()),
        ),
        Step::new(
            || {
                counter.fetch_add(10, Ordering::SeqCst);
                Ok(())
            },
            || Ok(()),
        ),
    ];
    run_parallel(steps).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 11);
}

#[test]
fn test_parallel_rolls_back_only_successful_steps() {
    let rollback_log = Mutex::new(Vec::new());
    let steps = vec![
        Step::new(|| Ok(()), || {
            rollback_log.lock().unwrap().push("ok-rolled-back");
            Ok(())
        }),
        Step::new(|| Err(Error::NoSpace("boom".into())), || {
            rollback_log.lock().unwrap().push("should-not-run");
            Ok(())
        }),
    ];
    let err = run_parallel(steps).unwrap_err();
    assert!(matches!(err, Error::NoSpace(_)));
    assert_eq!(*rollback_log.lock().unwrap(), vec!["ok-rolled-back"]);
}
