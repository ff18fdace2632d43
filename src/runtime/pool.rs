//! Worker threads, each owning a forked VM, fed from one bounded FIFO queue
//! of promises.
//!
//! Jobs start in submission order; nothing orders their completion across
//! workers. A submitted job runs to completion: there is no cancellation.

use std::{
    collections::VecDeque,
    sync::Arc,
    thread::JoinHandle,
    time::Duration,
};

use parking_lot::{Condvar, Mutex};
use rayon::prelude::*;

use crate::runtime::{
    error::RuntimeError,
    generator::{Generator, GeneratorStep},
    value::Value,
    vm::Vm,
};

/// What `submit` does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitPolicy {
    /// Wait for a worker to take a job.
    Block,
    /// Fail with [`PoolError::QueueFull`].
    Reject,
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("submission queue is full ({capacity} jobs pending)")]
    QueueFull { capacity: usize },
    #[error("thread pool is shut down")]
    ShutDown,
    #[error("cannot spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug)]
enum Job {
    /// Drive a generator until it returns, recording each yielded value.
    Generator(Arc<Generator>),
    Call { callee: Value, args: Vec<Value> },
}

#[derive(Debug, Clone)]
pub enum PromiseState {
    Pending,
    Running,
    Fulfilled(Value),
    Rejected(RuntimeError),
}

#[derive(Debug)]
struct Settlement {
    state: PromiseState,
    yielded: Vec<Value>,
}

/// Handle to a job's eventual result.
#[derive(Debug)]
pub struct Promise {
    job: Job,
    settlement: Mutex<Settlement>,
    settled: Condvar,
}

impl Promise {
    fn new(job: Job) -> Arc<Promise> {
        Arc::new(Promise {
            job,
            settlement: Mutex::new(Settlement {
                state: PromiseState::Pending,
                yielded: Vec::new(),
            }),
            settled: Condvar::new(),
        })
    }

    pub fn state(&self) -> PromiseState {
        self.settlement.lock().state.clone()
    }

    pub fn is_settled(&self) -> bool {
        matches!(
            self.settlement.lock().state,
            PromiseState::Fulfilled(_) | PromiseState::Rejected(_)
        )
    }

    /// Values yielded so far by a generator job.
    pub fn yielded(&self) -> Vec<Value> {
        self.settlement.lock().yielded.clone()
    }

    /// Blocks until the job settles.
    pub fn wait(&self) -> Result<Value, RuntimeError> {
        let mut settlement = self.settlement.lock();
        loop {
            if let Some(result) = settled_result(&settlement.state) {
                return result;
            }
            self.settled.wait(&mut settlement);
        }
    }

    /// Like [`Promise::wait`], giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Value, RuntimeError>> {
        let mut settlement = self.settlement.lock();
        if let Some(result) = settled_result(&settlement.state) {
            return Some(result);
        }
        self.settled.wait_for(&mut settlement, timeout);
        settled_result(&settlement.state)
    }

    fn run(&self, vm: &mut Vm) {
        self.settlement.lock().state = PromiseState::Running;
        let result = match &self.job {
            Job::Call { callee, args } => vm.call_value(callee, args),
            Job::Generator(generator) => self.drive(vm, generator),
        };
        let mut settlement = self.settlement.lock();
        settlement.state = match result {
            Ok(value) => PromiseState::Fulfilled(value),
            Err(err) => PromiseState::Rejected(err),
        };
        drop(settlement);
        self.settled.notify_all();
    }

    fn drive(&self, vm: &mut Vm, generator: &Arc<Generator>) -> Result<Value, RuntimeError> {
        loop {
            match vm.generator_step(generator)? {
                GeneratorStep::Yielded(value) => self.settlement.lock().yielded.push(value),
                GeneratorStep::Returned(value) => return Ok(value),
                GeneratorStep::Exhausted => return Ok(Value::Nil),
            }
        }
    }
}

fn settled_result(state: &PromiseState) -> Option<Result<Value, RuntimeError>> {
    match state {
        PromiseState::Fulfilled(value) => Some(Ok(value.clone())),
        PromiseState::Rejected(err) => Some(Err(err.clone())),
        PromiseState::Pending | PromiseState::Running => None,
    }
}

#[derive(Debug, Default)]
struct Queue {
    jobs: VecDeque<Arc<Promise>>,
    shut_down: bool,
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<Queue>,
    /// Signalled when a job is queued or the pool shuts down.
    available: Condvar,
    /// Signalled when a worker takes a job off a full queue.
    space: Condvar,
    capacity: usize,
    policy: SubmitPolicy,
}

#[derive(Debug)]
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Starts `workers` threads, each running a fork of `template`.
    pub fn new(
        template: &Vm,
        workers: usize,
        capacity: usize,
        policy: SubmitPolicy,
    ) -> Result<ThreadPool, PoolError> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            available: Condvar::new(),
            space: Condvar::new(),
            capacity: capacity.max(1),
            policy,
        });
        let mut pool = ThreadPool {
            shared,
            workers: Vec::with_capacity(workers),
        };
        for index in 0..workers.max(1) {
            let vm = template.fork();
            let shared = Arc::clone(&pool.shared);
            let handle = std::thread::Builder::new()
                .name(format!("kiln-worker-{index}"))
                .spawn(move || worker_loop(index, vm, shared))
                .map_err(PoolError::Spawn)?;
            pool.workers.push(handle);
        }
        tracing::debug!(
            workers = pool.workers.len(),
            capacity = pool.shared.capacity,
            ?policy,
            "thread pool started"
        );
        Ok(pool)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().jobs.len()
    }

    /// Queues a generator to be driven to completion by a worker.
    pub fn submit(&self, generator: Arc<Generator>) -> Result<Arc<Promise>, PoolError> {
        self.enqueue(Promise::new(Job::Generator(generator)))
    }

    /// Queues a call of `callee` with `args`.
    pub fn submit_call(&self, callee: Value, args: Vec<Value>) -> Result<Arc<Promise>, PoolError> {
        self.enqueue(Promise::new(Job::Call { callee, args }))
    }

    fn enqueue(&self, promise: Arc<Promise>) -> Result<Arc<Promise>, PoolError> {
        let shared = &self.shared;
        let mut queue = shared.queue.lock();
        loop {
            if queue.shut_down {
                return Err(PoolError::ShutDown);
            }
            if queue.jobs.len() < shared.capacity {
                break;
            }
            match shared.policy {
                SubmitPolicy::Reject => {
                    return Err(PoolError::QueueFull {
                        capacity: shared.capacity,
                    });
                }
                SubmitPolicy::Block => shared.space.wait(&mut queue),
            }
        }
        queue.jobs.push_back(Arc::clone(&promise));
        drop(queue);
        shared.available.notify_one();
        Ok(promise)
    }

    /// Stops accepting jobs, lets the workers drain the queue, and joins
    /// them.
    pub fn shutdown(&mut self) {
        {
            let mut queue = self.shared.queue.lock();
            if queue.shut_down && self.workers.is_empty() {
                return;
            }
            queue.shut_down = true;
        }
        self.shared.available.notify_all();
        self.shared.space.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("worker thread panicked");
            }
        }
        tracing::debug!("thread pool shut down");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(index: usize, mut vm: Vm, shared: Arc<Shared>) {
    tracing::debug!(worker = index, vm = vm.id(), "worker started");
    loop {
        let promise = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(promise) = queue.jobs.pop_front() {
                    break promise;
                }
                if queue.shut_down {
                    tracing::debug!(worker = index, "worker exiting");
                    return;
                }
                shared.available.wait(&mut queue);
            }
        };
        shared.space.notify_one();
        promise.run(&mut vm);
    }
}

/// Runs independent calls in parallel, each rayon worker on its own fork of
/// `template`. Results keep the order of `calls`.
pub fn par_call(template: &Vm, calls: &[(Value, Vec<Value>)]) -> Vec<Result<Value, RuntimeError>> {
    calls
        .par_iter()
        .map_init(
            || template.fork(),
            |vm, (callee, args)| vm.call_value(callee, args),
        )
        .collect()
}
