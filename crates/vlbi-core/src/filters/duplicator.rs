//! Fan-out duplicator filter: pushes every incoming block both downstream
//! and into any interchain queues registered against the runtime, so a
//! monitoring chain can observe the same data a recording chain consumes
//! without re-reading the hardware.

use crate::chain::{BlockQueue, StepControl};
use crate::net::interchain::InterchainRegistry;
use std::sync::Arc;

pub fn duplicator(
    registry: Arc<InterchainRegistry>,
) -> impl FnOnce(BlockQueue, BlockQueue, StepControl) + Send {
    move |inq, outq, ctl| {
        while let Some(block) = inq.pop() {
            if ctl.is_cancelled() {
                break;
            }
            registry.interchain_queues_push(&block);
            if outq.push(block).is_err() {
                break;
            }
        }
    }
}
