//! Queue collapsing applied before a backlog is persisted or replayed.
//!
//! Rules, applied in timestamp order per unique key:
//! - same key but different bundle/item (key collision): keep both
//! - both operations target an item: the newer one replaces the older
//! - the newer one is a delete: it replaces the older
//! - otherwise keep both
//!
//! A delete at bundle scope additionally discards every earlier operation of
//! the same bundle, item-level ones included. A delete with neither bundle nor
//! item discards everything queued before it.

use crate::operation::{Operation, OperationType};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Result of [`filter_queue`].
#[derive(Debug, Default)]
pub struct FilteredQueue {
    /// Surviving operations, oldest first.
    pub retained: Vec<Operation>,
    /// Operations marked as superseded, oldest first.
    pub discarded: Vec<Operation>,
}

enum Decision {
    KeepBoth,
    ReplacePrevious,
}

/// Collapse redundant operations while preserving causal order.
pub fn filter_queue(mut queue: Vec<Operation>) -> FilteredQueue {
    // Stable: equal timestamps keep their submission order.
    queue.sort_by_key(Operation::timestamp_ms);

    let mut last_seen: HashMap<String, Vec<usize>> = HashMap::new();
    let mut by_bundle: HashMap<String, Vec<usize>> = HashMap::new();

    for index in 0..queue.len() {
        let slot = last_seen
            .entry(queue[index].unique_key().to_string())
            .or_default();

        if let Some(&previous) = slot.last() {
            let decision = {
                let prev = &queue[previous];
                let current = &queue[index];

                if prev.bundle() != current.bundle() || prev.item_key() != current.item_key() {
                    warn!(
                        unique_key = %current.unique_key(),
                        previous_bundle = %prev.bundle(),
                        previous_item = %prev.item_key(),
                        bundle = %current.bundle(),
                        item_key = %current.item_key(),
                        "Operation key mismatch, keeping both operations"
                    );
                    Decision::KeepBoth
                } else if !prev.item_key().is_empty() && !current.item_key().is_empty() {
                    debug!(
                        unique_key = %current.unique_key(),
                        "Discarding previous item operation, newer operation overwrites data"
                    );
                    Decision::ReplacePrevious
                } else if current.op_type() == OperationType::Delete {
                    debug!(
                        unique_key = %current.unique_key(),
                        "Discarding previous bundle operation, newer delete supersedes it"
                    );
                    Decision::ReplacePrevious
                } else {
                    Decision::KeepBoth
                }
            };

            if let Decision::ReplacePrevious = decision {
                queue[previous].discard = true;
                slot.pop();
            }
        }
        slot.push(index);

        let current = &queue[index];
        if current.op_type() == OperationType::Delete && current.item_key().is_empty() {
            let targets: Vec<usize> = if current.bundle().is_empty() {
                (0..index).collect()
            } else {
                by_bundle
                    .get(current.bundle())
                    .cloned()
                    .unwrap_or_default()
            };
            for earlier in targets {
                if !queue[earlier].discard {
                    debug!(
                        bundle = %queue[index].bundle(),
                        discarded_item = %queue[earlier].item_key(),
                        "Discarding operation superseded by scoped delete"
                    );
                    queue[earlier].discard = true;
                }
            }
        }

        by_bundle
            .entry(queue[index].bundle().to_string())
            .or_default()
            .push(index);
    }

    let mut filtered = FilteredQueue::default();
    for operation in queue {
        if operation.discard {
            filtered.discarded.push(operation);
        } else {
            filtered.retained.push(operation);
        }
    }

    info!(
        retained = filtered.retained.len(),
        discarded = filtered.discarded.len(),
        "Filtered operation queue"
    );

    filtered
}
