//! Fork-join scheduling for the loader stages.
//!
//! [`TaskScope::run`] opens a `std::thread::scope`; every task spawned inside
//! it runs on its own scoped thread and may borrow the parsed document and the
//! resolved buffers. A [`TaskHandle`] is a shareable future: any number of
//! dependent tasks can block on [`TaskHandle::get`] for the same result. The
//! scope joins every task before `run` returns, so one load has exactly one
//! barrier.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{LoadError, LoadResult};

type TaskResult<T> = Result<Arc<T>, Arc<LoadError>>;

struct TaskSlot<T> {
    name: &'static str,
    result: Mutex<Option<TaskResult<T>>>,
    ready: Condvar,
}

impl<T> TaskSlot<T> {
    fn fulfill(&self, result: LoadResult<T>) {
        let mut guard = self.result.lock();
        *guard = Some(result.map(Arc::new).map_err(Arc::new));
        self.ready.notify_all();
    }

    fn wait(&self) -> TaskResult<T> {
        let mut guard = self.result.lock();
        loop {
            if let Some(result) = guard.as_ref() {
                return result.clone();
            }
            self.ready.wait(&mut guard);
        }
    }
}

/// Result of a spawned task, shareable between dependents.
pub(crate) struct TaskHandle<T> {
    slot: Arc<TaskSlot<T>>,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> TaskHandle<T> {
    /// Block until the task finishes.
    ///
    /// Every caller receives the same `Arc`; a failure is shared the same way
    /// and converts into [`LoadError`] with `?`.
    pub fn get(&self) -> TaskResult<T> {
        let result = self.slot.wait();
        if result.is_err() {
            log::trace!("Task '{}' finished with an error", self.slot.name);
        }
        result
    }
}

/// Spawning context handed to the closure passed to [`TaskScope::run`].
pub(crate) struct TaskScope<'scope, 'env: 'scope> {
    scope: &'scope std::thread::Scope<'scope, 'env>,
}

impl<'scope, 'env> TaskScope<'scope, 'env> {
    /// Run `f` with a scope for spawning tasks; returns after every task has
    /// finished.
    pub fn run<R>(f: impl for<'s> FnOnce(&TaskScope<'s, 'env>) -> R) -> R {
        std::thread::scope(|scope| f(&TaskScope { scope }))
    }

    /// Spawn a task on its own scoped thread.
    ///
    /// A panic inside `f` is caught and reported as
    /// [`LoadError::TaskPanicked`] so that dependents waiting on the handle
    /// are released.
    pub fn spawn<T, F>(&self, name: &'static str, f: F) -> TaskHandle<T>
    where
        T: Send + Sync + 'scope,
        F: FnOnce() -> LoadResult<T> + Send + 'scope,
    {
        let slot = Arc::new(TaskSlot {
            name,
            result: Mutex::new(None),
            ready: Condvar::new(),
        });
        let producer = Arc::clone(&slot);

        self.scope.spawn(move || {
            log::trace!("Task '{name}' started");
            let result = panic::catch_unwind(AssertUnwindSafe(f))
                .unwrap_or(Err(LoadError::TaskPanicked(name)));
            producer.fulfill(result);
        });

        TaskHandle { slot }
    }
}

/// Take ownership of a task result once no other handle refers to it.
pub(crate) fn into_owned<T: Clone>(value: Arc<T>) -> T {
    Arc::try_unwrap(value).unwrap_or_else(|shared| (*shared).clone())
}

/// Run `work(i)` for every `i < count` on at most `workers` scoped threads.
///
/// Results come back in index order.
pub(crate) fn parallel_map<T, F>(count: usize, workers: usize, work: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    use std::sync::atomic::{AtomicUsize, Ordering};

    let workers = workers.clamp(1, count.max(1));
    if workers == 1 {
        return (0..count).map(&work).collect();
    }

    let next = AtomicUsize::new(0);
    let slots: Vec<Mutex<Option<T>>> = (0..count).map(|_| Mutex::new(None)).collect();

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                loop {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    if i >= count {
                        break;
                    }
                    *slots[i].lock() = Some(work(i));
                }
            });
        }
    });

    slots
        .into_iter()
        .filter_map(|slot| slot.into_inner())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependent_tasks() {
        let base = vec![1, 2, 3];
        let total = TaskScope::run(|scope| {
            let doubled = scope.spawn("double", || {
                Ok(base.iter().map(|v| v * 2).collect::<Vec<i32>>())
            });
            let sum = {
                let doubled = doubled.clone();
                scope.spawn("sum", move || Ok(doubled.get()?.iter().sum::<i32>()))
            };
            let check = {
                let doubled = doubled.clone();
                scope.spawn("len", move || Ok(doubled.get()?.len()))
            };
            assert_eq!(*check.get().unwrap(), 3);
            sum.get()
        })
        .unwrap();
        assert_eq!(*total, 12);
    }

    #[test]
    fn test_failure_propagates_to_dependents() {
        let result = TaskScope::run(|scope| {
            let failing = scope.spawn("fail", || -> LoadResult<u32> {
                Err(LoadError::Buffer("missing".into()))
            });
            let dependent = scope.spawn("dependent", move || Ok(*failing.get()? + 1));
            dependent.get()
        });
        let err = LoadError::from(result.unwrap_err());
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_panic_releases_waiters() {
        let result = TaskScope::run(|scope| {
            let panicking = scope.spawn("boom", || -> LoadResult<u32> { panic!("boom") });
            panicking.get()
        });
        assert!(matches!(
            LoadError::from(result.unwrap_err()),
            LoadError::TaskPanicked("boom")
        ));
    }

    #[test]
    fn test_parallel_map_keeps_order() {
        let out = parallel_map(17, 4, |i| i * i);
        assert_eq!(out, (0..17).map(|i| i * i).collect::<Vec<_>>());
        assert!(parallel_map(0, 4, |i| i).is_empty());
    }
}
