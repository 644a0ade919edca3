//! The processing-chain runtime: an ordered sequence of producer/filter/
//! consumer steps connected by bounded blocking queues, run one OS thread
//! per step.
//!
//! `sync_type<UD>*` in the original design (a pointer to per-step userdata
//! plus a mutex/condvar the step may use for its own waits, reachable both
//! from inside the step and from `communicate()` outside it) is replaced
//! here by sharing an `Arc<Mutex<UD>>` directly between the closure that
//! builds a step and any external caller that wants to talk to it — no
//! generic `communicate` method is needed on `Chain` itself; callers just
//! lock the same `Arc` the step closure captured.

use crate::block::Block;
use crate::queue::BoundedQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub type BlockQueue = Arc<BoundedQueue<Block>>;

/// Per-step cancellation/identity handle passed to every step closure.
#[derive(Clone)]
pub struct StepControl {
    cancelled: Arc<AtomicBool>,
    pub step_id: usize,
}

impl StepControl {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

type ProducerFn = Box<dyn FnOnce(BlockQueue, StepControl) + Send>;
type FilterFn = Box<dyn FnOnce(BlockQueue, BlockQueue, StepControl) + Send>;
type ConsumerFn = Box<dyn FnOnce(BlockQueue, StepControl) + Send>;

enum StepBody {
    Producer(ProducerFn),
    Filter(FilterFn),
    Consumer(ConsumerFn),
}

struct Step {
    body: StepBody,
    cancel_fn: Option<Box<dyn Fn() + Send + Sync>>,
}

/// A one-shot, ordered sequence of steps. Once `stop`/`delayed_disable`
/// has run, the chain cannot be restarted — build a new one.
#[derive(Default)]
pub struct Chain {
    steps: Vec<Step>,
    queues: Vec<BlockQueue>,
    finalizers: Vec<Box<dyn FnOnce() + Send>>,
    cancel_fns: Vec<Box<dyn Fn() + Send + Sync>>,
    cancelled: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    running: bool,
    stopped: bool,
}

impl Chain {
    pub fn new() -> Self {
        Chain {
            steps: Vec::new(),
            queues: Vec::new(),
            finalizers: Vec::new(),
            cancel_fns: Vec::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
            running: false,
            stopped: false,
        }
    }

    /// Adds step 0: a producer emitting into a freshly created downstream
    /// queue of capacity `qdepth`. Returns the step id.
    pub fn add_producer<F>(&mut self, qdepth: usize, f: F) -> usize
    where
        F: FnOnce(BlockQueue, StepControl) + Send + 'static,
    {
        assert!(self.steps.is_empty(), "producer must be the first step");
        self.queues.push(Arc::new(BoundedQueue::new(qdepth)));
        self.steps.push(Step {
            body: StepBody::Producer(Box::new(f)),
            cancel_fn: None,
        });
        0
    }

    /// Adds a filter step consuming the previous step's downstream queue
    /// and producing into a new one of capacity `qdepth`.
    pub fn add_filter<F>(&mut self, qdepth: usize, f: F) -> usize
    where
        F: FnOnce(BlockQueue, BlockQueue, StepControl) + Send + 'static,
    {
        assert!(!self.steps.is_empty(), "filter needs an upstream step");
        self.queues.push(Arc::new(BoundedQueue::new(qdepth)));
        self.steps.push(Step {
            body: StepBody::Filter(Box::new(f)),
            cancel_fn: None,
        });
        self.steps.len() - 1
    }

    /// Adds the final consumer step; no downstream queue is created.
    pub fn add_consumer<F>(&mut self, f: F) -> usize
    where
        F: FnOnce(BlockQueue, StepControl) + Send + 'static,
    {
        assert!(!self.steps.is_empty(), "consumer needs an upstream step");
        self.steps.push(Step {
            body: StepBody::Consumer(Box::new(f)),
            cancel_fn: None,
        });
        self.steps.len() - 1
    }

    /// Registers a cancellation function for `step_id`, invoked by `stop`.
    /// Typical implementations close a file descriptor or call
    /// `shutdown(2)` so a thread blocked in I/O wakes up.
    pub fn register_cancel<F>(&mut self, step_id: usize, cancel_fn: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.steps[step_id].cancel_fn = Some(Box::new(cancel_fn));
    }

    /// Registers a finalizer run, in registration order, after every step
    /// thread has exited.
    pub fn register_final<F>(&mut self, finalizer: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.finalizers.push(Box::new(finalizer));
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn is_running(&self) -> bool {
        self.running && !self.stopped
    }

    /// Spawns one thread per step, in dependency order (producer first).
    pub fn run(&mut self) {
        assert!(!self.running, "chain already started");
        assert!(!self.stopped, "a stopped chain cannot be restarted");
        self.running = true;

        let steps = std::mem::take(&mut self.steps);
        for (idx, step) in steps.into_iter().enumerate() {
            let ctl = StepControl {
                cancelled: self.cancelled.clone(),
                step_id: idx,
            };
            let upstream = if idx == 0 {
                None
            } else {
                Some(self.queues[idx - 1].clone())
            };
            let downstream = self.queues.get(idx).cloned();
            let handle = match step.body {
                StepBody::Producer(f) => {
                    let out = downstream.expect("producer must have a downstream queue");
                    thread::spawn(move || {
                        log::debug!("chain step {idx} (producer) starting");
                        let out_for_eof = out.clone();
                        f(out, ctl);
                        // A producer that returns naturally (EOF, fixed
                        // n_blocks) must still unblock a consumer waiting
                        // in pop() on the other end.
                        out_for_eof.delayed_disable();
                        log::debug!("chain step {idx} (producer) exited");
                    })
                }
                StepBody::Filter(f) => {
                    let inq = upstream.expect("filter must have an upstream queue");
                    let out = downstream.expect("filter must have a downstream queue");
                    thread::spawn(move || {
                        log::debug!("chain step {idx} (filter) starting");
                        let out_for_eof = out.clone();
                        f(inq, out, ctl);
                        out_for_eof.delayed_disable();
                        log::debug!("chain step {idx} (filter) exited");
                    })
                }
                StepBody::Consumer(f) => {
                    let inq = upstream.expect("consumer must have an upstream queue");
                    thread::spawn(move || {
                        log::debug!("chain step {idx} (consumer) starting");
                        f(inq, ctl);
                        log::debug!("chain step {idx} (consumer) exited");
                    })
                }
            };
            self.handles.push(handle);
            if let Some(cancel_fn) = step.cancel_fn {
                self.cancel_fns.push(cancel_fn);
            }
        }
    }

    fn join_all(&mut self) {
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.join() {
                log::error!("chain step panicked: {e:?}");
            }
        }
    }

    fn run_finalizers(&mut self) {
        for finalizer in self.finalizers.drain(..) {
            finalizer();
        }
    }

    /// Sets `cancelled`, invokes every registered cancel function, disables
    /// every queue, joins every thread, then runs finalizers in
    /// registration order. Idempotent: calling twice is a no-op the second
    /// time.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.cancelled.store(true, Ordering::Release);
        for cancel_fn in &self.cancel_fns {
            cancel_fn();
        }
        for q in &self.queues {
            q.disable();
        }
        self.join_all();
        self.run_finalizers();
    }

    /// Like `stop`, but drains in-flight data: queues are delay-disabled
    /// instead of disabled outright, so producers already mid-flight can
    /// finish delivering what they've already read.
    pub fn delayed_disable(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        for q in &self.queues {
            q.delayed_disable();
        }
        self.join_all();
        self.run_finalizers();
    }

    /// Joins every step thread without disabling queues or setting
    /// `cancelled` — for a producer that reaches EOF naturally. Does not
    /// mark the chain stopped; a subsequent `stop()` still runs cleanly
    /// (mirrors §8 item 3: `wait()` followed by `stop()` is equivalent to
    /// `wait()`).
    pub fn wait(&mut self) {
        self.join_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockPool;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[test]
    fn three_stage_chain_moves_a_fixed_number_of_blocks_through() {
        let pool = Arc::new(BlockPool::new(64, 4));
        let produced = Arc::new(AtomicUsize::new(0));
        let consumed = Arc::new(AtomicUsize::new(0));

        let mut chain = Chain::new();
        let p = pool.clone();
        let prod_count = produced.clone();
        chain.add_producer(2, move |out, ctl| {
            for _ in 0..10 {
                if ctl.is_cancelled() {
                    break;
                }
                let block = p.get();
                if out.push(block).is_err() {
                    break;
                }
                prod_count.fetch_add(1, Ordering::SeqCst);
            }
        });
        chain.add_filter(2, |inq, outq, _ctl| {
            while let Some(b) = inq.pop() {
                let _ = outq.push(b);
            }
        });
        let cons_count = consumed.clone();
        chain.add_consumer(move |inq, _ctl| {
            while let Some(_b) = inq.pop() {
                cons_count.fetch_add(1, Ordering::SeqCst);
            }
        });
        chain.run();
        chain.wait();

        assert_eq!(produced.load(Ordering::SeqCst), 10);
        assert_eq!(consumed.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn stop_is_idempotent_and_joins_blocked_producers() {
        let mut chain = Chain::new();
        chain.add_producer(1, |out, ctl| {
            loop {
                if ctl.is_cancelled() {
                    break;
                }
                if out.push(Block::empty()).is_err() {
                    break;
                }
            }
        });
        chain.add_consumer(|_inq, _ctl| {
            // Never pops: forces the producer to block on a full queue.
            thread::sleep(std::time::Duration::from_millis(50));
        });
        chain.run();
        thread::sleep(std::time::Duration::from_millis(20));
        chain.stop();
        chain.stop();
    }

    #[test]
    fn finalizers_run_exactly_once_after_stop() {
        let mut chain = Chain::new();
        chain.add_producer(1, |_out, _ctl| {});
        chain.add_consumer(|inq, _ctl| while inq.pop().is_some() {});
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        chain.register_final(move || {
            *c.lock().unwrap() += 1;
        });
        chain.run();
        chain.stop();
        chain.stop();
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn delayed_disable_drains_in_flight_blocks_before_stopping() {
        let pool = Arc::new(BlockPool::new(16, 4));
        let consumed = Arc::new(AtomicUsize::new(0));
        let mut chain = Chain::new();
        let p = pool.clone();
        chain.add_producer(8, move |out, _ctl| {
            for _ in 0..5 {
                let _ = out.push(p.get());
            }
        });
        let c = consumed.clone();
        chain.add_consumer(move |inq, _ctl| {
            while let Some(_b) = inq.pop() {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        chain.run();
        thread::sleep(std::time::Duration::from_millis(20));
        chain.delayed_disable();
        assert_eq!(consumed.load(Ordering::SeqCst), 5);
    }
}
