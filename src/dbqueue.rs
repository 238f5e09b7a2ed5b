use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::{Mutex, Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::QueueError;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(60);

/// A queued unit of work: runs the caller's operation against the pool and
/// reports success/failure back for the worker's counters. The typed result
/// travels through a oneshot captured inside the closure, so the queue
/// itself stays monomorphic.
type TaskFn = Box<dyn FnOnce(SqlitePool) -> Pin<Box<dyn Future<Output = bool> + Send>> + Send>;

struct QueuedTask {
    id: uuid::Uuid,
    run: TaskFn,
}

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub read_pool_size: usize,
    pub write_pool_size: usize,
    pub read_workers: usize,
    pub write_workers: usize,
    pub max_queue_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            read_pool_size: 12,
            write_pool_size: 4,
            read_workers: 10,
            write_workers: 3,
            max_queue_size: 2000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub read_operations: u64,
    pub write_operations: u64,
    pub read_errors: u64,
    pub write_errors: u64,
    pub total_processed: u64,
    pub read_queue_size: i64,
    pub write_queue_size: i64,
    pub read_connections_available: usize,
    pub write_connections_available: usize,
    pub total_workers: usize,
    pub running: bool,
}

struct Lane {
    sender: mpsc::Sender<QueuedTask>,
    depth: AtomicI64,
    semaphore: Arc<Semaphore>,
    operations: AtomicU64,
    errors: AtomicU64,
}

/// Universal database queue: all DB access funnels through two bounded
/// FIFO queues (read/write) drained by fixed worker pools, each capped by
/// a connection semaphore. Timeouts are observed caller-side; a worker
/// always finishes its operation and releases its permit, dropping the
/// late result if the caller has gone away.
pub struct DatabaseQueue {
    pool: SqlitePool,
    read: Lane,
    write: Lane,
    running: AtomicBool,
    cancel: CancellationToken,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl DatabaseQueue {
    pub fn new(pool: SqlitePool, config: QueueConfig) -> Arc<Self> {
        let (read_tx, read_rx) = mpsc::channel(config.max_queue_size);
        let (write_tx, write_rx) = mpsc::channel(config.max_queue_size);

        let queue = Arc::new(Self {
            pool,
            read: Lane {
                sender: read_tx,
                depth: AtomicI64::new(0),
                semaphore: Arc::new(Semaphore::new(config.read_pool_size)),
                operations: AtomicU64::new(0),
                errors: AtomicU64::new(0),
            },
            write: Lane {
                sender: write_tx,
                depth: AtomicI64::new(0),
                semaphore: Arc::new(Semaphore::new(config.write_pool_size)),
                operations: AtomicU64::new(0),
                errors: AtomicU64::new(0),
            },
            running: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            workers: std::sync::Mutex::new(Vec::new()),
            worker_count: config.read_workers + config.write_workers,
        });

        let read_rx = Arc::new(Mutex::new(read_rx));
        let write_rx = Arc::new(Mutex::new(write_rx));

        let mut handles = Vec::with_capacity(queue.worker_count);
        for i in 0..config.read_workers {
            handles.push(tokio::spawn(worker_loop(
                queue.clone(),
                read_rx.clone(),
                false,
                format!("read_worker_{i}"),
            )));
        }
        for i in 0..config.write_workers {
            handles.push(tokio::spawn(worker_loop(
                queue.clone(),
                write_rx.clone(),
                true,
                format!("write_worker_{i}"),
            )));
        }

        queue.workers.lock().expect("workers lock").extend(handles);

        queue
    }

    /// Submit a read operation. The default timeout is 30s.
    pub async fn execute_read<T, F, Fut>(&self, op: F, timeout: Option<Duration>) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(SqlitePool) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.submit(&self.read, op, timeout.unwrap_or(DEFAULT_READ_TIMEOUT)).await
    }

    /// Submit a write operation. The default timeout is 60s. Writes are not
    /// serialized across workers; operations needing atomicity open a
    /// transaction on their session inside the closure.
    pub async fn execute_write<T, F, Fut>(&self, op: F, timeout: Option<Duration>) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(SqlitePool) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.submit(&self.write, op, timeout.unwrap_or(DEFAULT_WRITE_TIMEOUT)).await
    }

    async fn submit<T, F, Fut>(&self, lane: &Lane, op: F, timeout: Duration) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(SqlitePool) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        if !self.running.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }

        let (tx, rx) = oneshot::channel::<anyhow::Result<T>>();
        let run: TaskFn = Box::new(move |pool| {
            Box::pin(async move {
                let result = op(pool).await;
                let ok = result.is_ok();
                // A timed-out caller has dropped the receiver; the late
                // result is dropped and the task counts as an error.
                let delivered = tx.send(result).is_ok();
                ok && delivered
            })
        });

        lane.depth.fetch_add(1, Ordering::Relaxed);
        let task = QueuedTask {
            id: uuid::Uuid::new_v4(),
            run,
        };
        if lane.sender.send(task).await.is_err() {
            lane.depth.fetch_sub(1, Ordering::Relaxed);
            return Err(QueueError::Closed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(QueueError::Operation(e.to_string())),
            Ok(Err(_)) => Err(QueueError::Closed),
            Err(_) => Err(QueueError::Timeout {
                timeout_secs: timeout.as_secs(),
            }),
        }
    }

    pub fn stats(&self) -> QueueStats {
        let read_ops = self.read.operations.load(Ordering::Relaxed);
        let write_ops = self.write.operations.load(Ordering::Relaxed);
        let read_errors = self.read.errors.load(Ordering::Relaxed);
        let write_errors = self.write.errors.load(Ordering::Relaxed);
        QueueStats {
            read_operations: read_ops,
            write_operations: write_ops,
            read_errors,
            write_errors,
            total_processed: read_ops + write_ops + read_errors + write_errors,
            read_queue_size: self.read.depth.load(Ordering::Relaxed).max(0),
            write_queue_size: self.write.depth.load(Ordering::Relaxed).max(0),
            read_connections_available: self.read.semaphore.available_permits(),
            write_connections_available: self.write.semaphore.available_permits(),
            total_workers: self.worker_count,
            running: self.running.load(Ordering::Acquire),
        }
    }

    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        let handles: Vec<_> = self.workers.lock().expect("workers lock").drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        debug!("database queue stopped");
    }
}

async fn worker_loop(
    queue: Arc<DatabaseQueue>,
    rx: Arc<Mutex<mpsc::Receiver<QueuedTask>>>,
    is_write: bool,
    name: String,
) {
    debug!(worker = %name, "database worker started");
    loop {
        let task = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = queue.cancel.cancelled() => break,
                task = rx.recv() => task,
            }
        };
        let Some(task) = task else { break };

        let lane = if is_write { &queue.write } else { &queue.read };
        lane.depth.fetch_sub(1, Ordering::Relaxed);

        let permit = match lane.semaphore.acquire().await {
            Ok(p) => p,
            Err(_) => break,
        };

        let started = Instant::now();
        let task_id = task.id;
        let ok = (task.run)(queue.pool.clone()).await;
        drop(permit);

        if ok {
            lane.operations.fetch_add(1, Ordering::Relaxed);
            debug!(worker = %name, task = %task_id, elapsed_ms = started.elapsed().as_millis() as u64, "task completed");
        } else {
            lane.errors.fetch_add(1, Ordering::Relaxed);
            error!(worker = %name, task = %task_id, elapsed_ms = started.elapsed().as_millis() as u64, "task failed");
        }
    }
    debug!(worker = %name, "database worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn read_operation_returns_value() {
        let pool = db::test_pool().await;
        let queue = DatabaseQueue::new(pool, QueueConfig::default());

        let n: i64 = queue
            .execute_read(
                |pool| async move {
                    let row: (i64,) = sqlx::query_as("SELECT 41 + 1").fetch_one(&pool).await?;
                    Ok(row.0)
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(n, 42);

        let stats = queue.stats();
        assert_eq!(stats.read_operations, 1);
        assert_eq!(stats.read_errors, 0);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn operation_error_reaches_caller_and_counter() {
        let pool = db::test_pool().await;
        let queue = DatabaseQueue::new(pool, QueueConfig::default());

        let result: Result<(), _> = queue
            .execute_write(
                |_pool| async move { Err(anyhow::anyhow!("constraint violated")) },
                None,
            )
            .await;
        assert!(matches!(result, Err(QueueError::Operation(_))));

        // Worker counter updates race the caller-side result; give it a tick
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.stats().write_errors, 1);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn timeout_observed_by_caller_without_leaking_permits() {
        let pool = db::test_pool().await;
        let queue = DatabaseQueue::new(pool, QueueConfig::default());
        let baseline = queue.stats().read_connections_available;

        let result: Result<i64, _> = queue
            .execute_read(
                |_pool| async move {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok(7)
                },
                Some(Duration::from_millis(50)),
            )
            .await;
        assert!(matches!(result, Err(QueueError::Timeout { .. })));

        // The worker runs the operation to completion, drops the late
        // result, returns its permit, and counts the task as an error.
        tokio::time::sleep(Duration::from_millis(700)).await;
        let stats = queue.stats();
        assert_eq!(stats.read_connections_available, baseline);
        assert_eq!(stats.read_errors, 1);
        assert_eq!(stats.read_operations, 0);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn closed_queue_rejects_submissions() {
        let pool = db::test_pool().await;
        let queue = DatabaseQueue::new(pool, QueueConfig::default());
        queue.shutdown().await;

        let result: Result<(), _> = queue.execute_read(|_pool| async move { Ok(()) }, None).await;
        assert!(matches!(result, Err(QueueError::Closed)));
    }
}
