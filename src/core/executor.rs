//! Job executors for verification runs.
//!
//! An [`Executor`] takes a batch of blocking jobs and yields their results as
//! they complete. Jobs run on tokio's blocking thread pool; a job that panics
//! surfaces as a `JoinError` for that job alone. Cancellation is cooperative:
//! the token is checked before each dispatch, and jobs already running are
//! allowed to finish.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::task::JoinError;

use crate::error::ArchiveError;

/// A unit of blocking work
pub type Job<T> = Box<dyn FnOnce() -> T + Send + 'static>;

/// Below this many jobs `auto` runs sequentially
pub const AUTO_POOL_THRESHOLD: usize = 10;

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs jobs and streams back results in completion order
pub trait Executor {
    fn run<T: Send + 'static>(
        &self,
        jobs: Vec<Job<T>>,
        cancel: CancelToken,
    ) -> BoxStream<'static, Result<T, JoinError>>;
}

/// One job at a time, in submission order
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl Executor for Sequential {
    fn run<T: Send + 'static>(
        &self,
        jobs: Vec<Job<T>>,
        cancel: CancelToken,
    ) -> BoxStream<'static, Result<T, JoinError>> {
        stream::iter(jobs)
            .take_while(move |_| future::ready(!cancel.is_cancelled()))
            .then(|job| tokio::task::spawn_blocking(job))
            .boxed()
    }
}

/// Up to `max_workers` jobs in flight at once
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    max_workers: usize,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }
}

impl Executor for WorkerPool {
    fn run<T: Send + 'static>(
        &self,
        jobs: Vec<Job<T>>,
        cancel: CancelToken,
    ) -> BoxStream<'static, Result<T, JoinError>> {
        stream::iter(jobs)
            .take_while(move |_| future::ready(!cancel.is_cancelled()))
            .map(|job| tokio::task::spawn_blocking(job))
            .buffer_unordered(self.max_workers)
            .boxed()
    }
}

/// Executor chosen at runtime from configuration
#[derive(Debug, Clone, Copy)]
pub enum AnyExecutor {
    Sequential(Sequential),
    Pool(WorkerPool),
}

impl AnyExecutor {
    pub fn is_sequential(&self) -> bool {
        matches!(self, AnyExecutor::Sequential(_))
    }
}

impl Executor for AnyExecutor {
    fn run<T: Send + 'static>(
        &self,
        jobs: Vec<Job<T>>,
        cancel: CancelToken,
    ) -> BoxStream<'static, Result<T, JoinError>> {
        match self {
            AnyExecutor::Sequential(e) => e.run(jobs, cancel),
            AnyExecutor::Pool(e) => e.run(jobs, cancel),
        }
    }
}

/// Executor selection as written in settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    /// Sequential for one worker or small batches, pool otherwise
    #[default]
    Auto,
    Sequential,
    Pool,
}

impl ExecutorKind {
    pub fn select(self, max_workers: usize, job_count: usize) -> AnyExecutor {
        match self {
            ExecutorKind::Sequential => AnyExecutor::Sequential(Sequential),
            ExecutorKind::Pool => AnyExecutor::Pool(WorkerPool::new(max_workers)),
            ExecutorKind::Auto if max_workers <= 1 || job_count < AUTO_POOL_THRESHOLD => {
                AnyExecutor::Sequential(Sequential)
            }
            ExecutorKind::Auto => AnyExecutor::Pool(WorkerPool::new(max_workers)),
        }
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorKind::Auto => write!(f, "auto"),
            ExecutorKind::Sequential => write!(f, "sequential"),
            ExecutorKind::Pool => write!(f, "pool"),
        }
    }
}

impl FromStr for ExecutorKind {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(ExecutorKind::Auto),
            "sequential" | "seq" => Ok(ExecutorKind::Sequential),
            "pool" | "thread" | "threads" => Ok(ExecutorKind::Pool),
            _ => Err(ArchiveError::InvalidArgument(format!("Unknown executor: {}", s))),
        }
    }
}

/// Worker count when none is configured
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_jobs(n: usize, counter: &Arc<AtomicUsize>) -> Vec<Job<usize>> {
        (0..n)
            .map(|i| {
                let counter = counter.clone();
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    i
                }) as Job<usize>
            })
            .collect()
    }

    #[tokio::test]
    async fn test_sequential_preserves_order() {
        let counter = Arc::new(AtomicUsize::new(0));
        let results: Vec<usize> = Sequential
            .run(counting_jobs(5, &counter), CancelToken::new())
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(results, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_pool_runs_everything() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut results: Vec<usize> = WorkerPool::new(3)
            .run(counting_jobs(20, &counter), CancelToken::new())
            .map(|r| r.unwrap())
            .collect()
            .await;
        results.sort();
        assert_eq!(results, (0..20).collect::<Vec<_>>());
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn test_cancel_stops_new_dispatches() {
        let token = CancelToken::new();
        let jobs: Vec<Job<usize>> = (0..10usize)
            .map(|i| {
                let token = token.clone();
                Box::new(move || {
                    if i == 2 {
                        token.cancel();
                    }
                    i
                }) as Job<usize>
            })
            .collect();

        let results: Vec<_> = Sequential.run(jobs, token.clone()).collect().await;
        assert_eq!(results.len(), 3);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let token = CancelToken::new();
        token.cancel();
        let counter = Arc::new(AtomicUsize::new(0));
        let results: Vec<_> = WorkerPool::new(4)
            .run(counting_jobs(10, &counter), token)
            .collect()
            .await;
        assert!(results.is_empty());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_job_is_isolated() {
        let jobs = vec![
            Box::new(|| 1u8) as Job<u8>,
            Box::new(|| -> u8 { panic!("boom") }) as Job<u8>,
            Box::new(|| 3u8) as Job<u8>,
        ];
        let results: Vec<_> = WorkerPool::new(2).run(jobs, CancelToken::new()).collect().await;

        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 2);
    }

    #[test]
    fn test_auto_selection() {
        assert!(ExecutorKind::Auto.select(8, 5).is_sequential());
        assert!(ExecutorKind::Auto.select(1, 500).is_sequential());
        assert!(!ExecutorKind::Auto.select(8, 500).is_sequential());
        assert!(!ExecutorKind::Pool.select(1, 1).is_sequential());
        assert_eq!("threads".parse::<ExecutorKind>().unwrap(), ExecutorKind::Pool);
    }
}
