//! Replay ledger: the chronologically ordered queue of historical orders.

use std::collections::VecDeque;

use crate::data::ingest::IngestError;
use crate::domain::units::is_hour_aligned;
use crate::domain::{DatasetHash, LimitOrder, Timestamp};

/// Orders waiting to be replayed, ordered by placement time.
///
/// Batches are validated in full before anything is appended, so a rejected
/// batch leaves the ledger exactly as it was.
#[derive(Debug, Clone)]
pub struct OrderLedger {
    queue: VecDeque<LimitOrder>,
    last_start: Option<Timestamp>,
    ingested: u64,
    hasher: blake3::Hasher,
}

impl OrderLedger {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            last_start: None,
            ingested: 0,
            hasher: blake3::Hasher::new(),
        }
    }

    /// Append a batch. Returns the number of orders appended.
    pub fn extend(&mut self, orders: Vec<LimitOrder>) -> Result<usize, IngestError> {
        let mut previous = self.last_start;
        for order in &orders {
            if let Some(prev) = previous {
                if order.start < prev {
                    return Err(IngestError::NonMonotonic {
                        id: order.id,
                        start: order.start,
                        previous: prev,
                    });
                }
            }
            if order.volume <= 0 {
                return Err(IngestError::NonPositiveVolume {
                    id: order.id,
                    volume: order.volume,
                });
            }
            if !is_hour_aligned(order.delivery) {
                return Err(IngestError::UnalignedDelivery {
                    id: order.id,
                    delivery: order.delivery,
                });
            }
            previous = Some(order.start);
        }

        let count = orders.len();
        for order in &orders {
            hash_order(&mut self.hasher, order);
        }
        self.last_start = previous;
        self.ingested += count as u64;
        self.queue.extend(orders);
        Ok(count)
    }

    pub fn peek(&self) -> Option<&LimitOrder> {
        self.queue.front()
    }

    pub fn pop(&mut self) -> Option<LimitOrder> {
        self.queue.pop_front()
    }

    /// Orders still queued.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Orders appended over the ledger's lifetime.
    pub fn ingested(&self) -> u64 {
        self.ingested
    }

    pub fn last_start(&self) -> Option<Timestamp> {
        self.last_start
    }

    pub fn dataset_hash(&self) -> DatasetHash {
        DatasetHash(self.hasher.clone().finalize().to_hex().to_string())
    }
}

impl Default for OrderLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_order(hasher: &mut blake3::Hasher, order: &LimitOrder) {
    hasher.update(&order.id.0.to_le_bytes());
    hasher.update(&order.initial_id.0.to_le_bytes());
    hasher.update(&order.start.to_le_bytes());
    hasher.update(&order.cancel.to_le_bytes());
    hasher.update(&order.delivery.to_le_bytes());
    hasher.update(&[order.side.code()]);
    hasher.update(&order.price.to_le_bytes());
    hasher.update(&order.volume.to_le_bytes());
}
