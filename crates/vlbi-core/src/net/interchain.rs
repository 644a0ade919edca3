//! Interchain source queues: a bounded queue shared between two chains in
//! the same process, so (for example) a recording chain and a monitoring
//! chain can share one input without double-reading the hardware.

use crate::block::Block;
use crate::queue::BoundedQueue;
use std::sync::{Arc, Mutex};

pub type InterchainQueue = Arc<BoundedQueue<Block>>;

/// Registry of interchain queues for one runtime. `request_interchain_queue`
/// creates and registers a new queue; `interchain_queues_push` fans a block
/// out to every registered queue; `resize_enable_push` adjusts an existing
/// queue's capacity online.
#[derive(Default)]
pub struct InterchainRegistry {
    queues: Mutex<Vec<InterchainQueue>>,
}

impl InterchainRegistry {
    pub fn new() -> Self {
        InterchainRegistry {
            queues: Mutex::new(Vec::new()),
        }
    }

    pub fn request_interchain_queue(&self, capacity: usize) -> InterchainQueue {
        let q: InterchainQueue = Arc::new(BoundedQueue::new(capacity));
        self.queues.lock().unwrap().push(q.clone());
        q
    }

    /// Pushes a clone of `block` into every registered queue. A queue that
    /// is full or disabled is skipped rather than blocking the producer
    /// that calls this — interchain consumers are monitors, not the
    /// primary data path.
    pub fn interchain_queues_push(&self, block: &Block) {
        let queues = self.queues.lock().unwrap();
        for q in queues.iter() {
            let _ = q.try_push(block.clone());
        }
    }

    pub fn resize_enable_push(&self, queue: &InterchainQueue, new_capacity: usize) {
        queue.enable(Some(new_capacity));
    }

    pub fn queue_count(&self) -> usize {
        self.queues.lock().unwrap().len()
    }
}
