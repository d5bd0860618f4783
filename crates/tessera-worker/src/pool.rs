//! Bounded worker pool with a FIFO overflow queue.
//!
//! Each worker is a dedicated OS thread that runs the pool's handler on
//! one task at a time. Tasks and results cross the thread boundary by
//! value over `flume` channels; workers share nothing but the handler
//! and the pool's termination flag.
//!
//! All bookkeeping (which worker is busy, what is queued) is owned by
//! the [`WorkerPool`] and only mutated from the thread that drives it:
//! [`WorkerPool::run`] assigns or queues, and [`WorkerPool::wait_one`]
//! handles exactly one worker event per call. When a worker finishes,
//! `wait_one`
//!
//! 1. marks the worker idle,
//! 2. hands it the oldest queued task, if any,
//! 3. invokes the finished task's `on_done` callback.
//!
//! so the callback never observes a pool whose freed worker is still
//! sitting idle with work waiting.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};

use crate::error::{PoolError, TaskError};

type Handler<T, O> = dyn Fn(T, &AbortSignal) -> Result<O, TaskError> + Send + Sync;
type OnDone<O> = Box<dyn FnOnce(Result<O, TaskError>) + Send>;

/// Termination flag a running task can poll between units of work.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    /// Returns `true` once the owning pool has been terminated.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Thread-safe handle that can terminate a pool's workers and wake the
/// thread blocked in [`WorkerPool::wait_one`].
///
/// Obtained from [`WorkerPool::abort_handle`]. The pool itself stays
/// owned by its driving thread; after an abort that thread is expected
/// to call [`WorkerPool::destroy`].
#[derive(Clone)]
pub struct AbortHandle {
    signal: AbortSignal,
    wake: Arc<dyn Fn() + Send + Sync>,
}

impl AbortHandle {
    /// Raise the termination flag and wake the waiter.
    ///
    /// Running tasks stop at their next [`AbortSignal`] check and their
    /// results are discarded.
    pub fn abort(&self) {
        self.signal.raise();
        (self.wake)();
    }

    /// Returns `true` once [`abort`](Self::abort) has been called.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }
}

impl fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortHandle")
            .field("aborted", &self.is_aborted())
            .finish_non_exhaustive()
    }
}

/// Outcome of one [`WorkerPool::wait_one`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// A task finished and its `on_done` callback has run.
    Completed,
    /// An [`AbortHandle`] woke the waiter.
    Woken,
    /// Nothing is running or queued; there is nothing to wait for.
    Idle,
}

enum Event<O> {
    Done {
        worker: usize,
        result: Result<O, TaskError>,
    },
    Wake,
}

struct Pending<T, O> {
    task: T,
    on_done: OnDone<O>,
}

struct Worker<T, O> {
    tasks: Sender<T>,
    /// `Some` while busy: the callback of the task it is running.
    current: Option<OnDone<O>>,
}

/// Workers and channels of an initialised pool.
struct Live<T, O> {
    workers: Vec<Worker<T, O>>,
    events_tx: Sender<Event<O>>,
    events_rx: Receiver<Event<O>>,
    signal: AbortSignal,
}

impl<T, O> Live<T, O> {
    fn busy_count(&self) -> usize {
        self.workers.iter().filter(|w| w.current.is_some()).count()
    }

    fn assign(&mut self, id: usize, pending: Pending<T, O>) {
        let worker = &mut self.workers[id];
        if worker.tasks.send(pending.task).is_err() {
            log::error!("worker {id} is no longer running");
            // Report through the event channel so completion handling
            // stays on the single wait_one path.
            let _ = self.events_tx.send(Event::Done {
                worker: id,
                result: Err(TaskError::WorkerLost { worker: id }),
            });
        }
        worker.current = Some(pending.on_done);
    }
}

/// A fixed-size set of worker threads plus a FIFO queue for tasks
/// submitted while every worker is busy.
pub struct WorkerPool<T, O> {
    size: NonZeroUsize,
    handler: Arc<Handler<T, O>>,
    queue: VecDeque<Pending<T, O>>,
    live: Option<Live<T, O>>,
}

impl<T: Send + 'static, O: Send + 'static> WorkerPool<T, O> {
    /// Create a pool of `size` workers that will all run `handler`.
    ///
    /// No threads are started until [`init`](Self::init).
    pub fn new<F>(size: NonZeroUsize, handler: F) -> Self
    where
        F: Fn(T, &AbortSignal) -> Result<O, TaskError> + Send + Sync + 'static,
    {
        Self {
            size,
            handler: Arc::new(handler),
            queue: VecDeque::new(),
            live: None,
        }
    }

    /// Start `size` idle workers. Does nothing if the pool is ready.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Spawn`] if a worker thread cannot be started;
    /// any workers already started are terminated.
    pub fn init(&mut self) -> Result<(), PoolError> {
        if self.live.is_some() {
            return Ok(());
        }

        let (events_tx, events_rx) = flume::unbounded();
        let signal = AbortSignal::default();
        let mut workers = Vec::with_capacity(self.size.get());

        for id in 0..self.size.get() {
            // One slot: a worker is only ever handed a task while idle.
            let (tasks_tx, tasks_rx) = flume::bounded(1);
            let handler = Arc::clone(&self.handler);
            let events = events_tx.clone();
            let worker_signal = signal.clone();

            let spawned = thread::Builder::new()
                .name(format!("tessera-worker-{id}"))
                .spawn(move || worker_loop(id, &tasks_rx, &events, &*handler, &worker_signal));

            if let Err(source) = spawned {
                log::error!("failed to spawn worker {id}: {source}");
                signal.raise();
                return Err(PoolError::Spawn { worker: id, source });
            }
            workers.push(Worker {
                tasks: tasks_tx,
                current: None,
            });
        }

        log::info!("worker pool ready with {} workers", self.size);
        self.live = Some(Live {
            workers,
            events_tx,
            events_rx,
            signal,
        });
        Ok(())
    }

    /// Submit `task`. It starts on an idle worker right away, or waits in
    /// the FIFO queue until one frees up. `on_done` receives the result
    /// from inside a later [`wait_one`](Self::wait_one) call.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NotReady`] before `init` or after `destroy`.
    /// The task is dropped and `on_done` never fires.
    pub fn run<F>(&mut self, task: T, on_done: F) -> Result<(), PoolError>
    where
        F: FnOnce(Result<O, TaskError>) + Send + 'static,
    {
        let Some(live) = self.live.as_mut() else {
            log::error!("run called on a worker pool that is not ready");
            return Err(PoolError::NotReady);
        };

        let pending = Pending {
            task,
            on_done: Box::new(on_done),
        };
        match live.workers.iter().position(|w| w.current.is_none()) {
            Some(id) => live.assign(id, pending),
            None => self.queue.push_back(pending),
        }
        Ok(())
    }

    /// Block until the next worker event and handle it.
    ///
    /// Returns immediately with [`Wait::Idle`] when no task is running
    /// or queued. `timeout` bounds the wait; `None` waits indefinitely.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NotReady`] on a pool that is not ready and
    /// [`PoolError::TimedOut`] when `timeout` elapses without an event.
    pub fn wait_one(&mut self, timeout: Option<Duration>) -> Result<Wait, PoolError> {
        let Some(live) = self.live.as_mut() else {
            return Err(PoolError::NotReady);
        };
        if self.queue.is_empty() && live.busy_count() == 0 {
            return Ok(Wait::Idle);
        }

        let event = match timeout {
            Some(limit) => live.events_rx.recv_timeout(limit).map_err(|e| match e {
                RecvTimeoutError::Timeout => PoolError::TimedOut(limit),
                RecvTimeoutError::Disconnected => PoolError::NotReady,
            })?,
            None => live.events_rx.recv().map_err(|_| PoolError::NotReady)?,
        };

        match event {
            Event::Wake => Ok(Wait::Woken),
            Event::Done { worker, result } => {
                let on_done = live.workers.get_mut(worker).and_then(|w| w.current.take());
                if let Some(next) = self.queue.pop_front() {
                    live.assign(worker, next);
                }
                match on_done {
                    Some(on_done) => on_done(result),
                    None => log::warn!("worker {worker} reported a result while idle"),
                }
                Ok(Wait::Completed)
            }
        }
    }

    /// A handle that can abort this pool from another thread.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NotReady`] before `init` or after `destroy`.
    pub fn abort_handle(&self) -> Result<AbortHandle, PoolError> {
        let live = self.live.as_ref().ok_or(PoolError::NotReady)?;
        let events = live.events_tx.clone();
        Ok(AbortHandle {
            signal: live.signal.clone(),
            wake: Arc::new(move || {
                let _ = events.send(Event::Wake);
            }),
        })
    }
}

impl<T, O> WorkerPool<T, O> {
    /// Discard queued tasks, terminate every worker and mark the pool not
    /// ready. Callbacks of queued and running tasks never fire.
    ///
    /// Safe to call any number of times, with or without work outstanding.
    pub fn destroy(&mut self) {
        let discarded = self.queue.len();
        self.queue.clear();

        if let Some(live) = self.live.take() {
            live.signal.raise();
            let busy = live.busy_count();
            // Dropping the task senders ends each worker's receive loop;
            // threads are not joined.
            drop(live);
            log::info!(
                "worker pool destroyed ({busy} running and {discarded} queued tasks abandoned)"
            );
        }
    }

    /// Configured number of workers.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size.get()
    }

    /// Whether `init` has run and `destroy` has not.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.live.is_some()
    }

    /// Workers currently running a task (0 when not ready).
    #[must_use]
    pub fn busy_count(&self) -> usize {
        self.live.as_ref().map_or(0, Live::busy_count)
    }

    /// Workers waiting for a task (0 when not ready).
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.live
            .as_ref()
            .map_or(0, |live| live.workers.len() - live.busy_count())
    }

    /// Tasks waiting for a free worker.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

impl<T, O> Drop for WorkerPool<T, O> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<T, O> fmt::Debug for WorkerPool<T, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("ready", &self.is_ready())
            .field("busy", &self.busy_count())
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}

fn worker_loop<T, O>(
    id: usize,
    tasks: &Receiver<T>,
    events: &Sender<Event<O>>,
    handler: &Handler<T, O>,
    signal: &AbortSignal,
) {
    log::debug!("worker {id} started");
    while let Ok(task) = tasks.recv() {
        if signal.is_aborted() {
            break;
        }
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler(task, signal)))
            .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(payload.as_ref()))));
        if signal.is_aborted() {
            log::debug!("worker {id} discarding result of terminated task");
            break;
        }
        if events.send(Event::Done { worker: id, result }).is_err() {
            break;
        }
    }
    log::debug!("worker {id} stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}
