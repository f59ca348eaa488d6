//! Settlement scheduling
//!
//! A deterministic queue of pending contract completions: a min-heap keyed
//! by fire time. The decision loop drains due entries with the current
//! time, so settlement ordering is reproducible in tests without real
//! wall-clock delays. Entries with equal fire times drain in trade-id
//! (creation) order.

use chrono::{DateTime, Utc};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::{ContractRef, TradeId};

/// One scheduled contract completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSettlement {
    pub due_at: DateTime<Utc>,
    pub trade_id: TradeId,
    pub contract: ContractRef,
}

impl Ord for PendingSettlement {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due_at
            .cmp(&other.due_at)
            .then(self.trade_id.cmp(&other.trade_id))
    }
}

impl PartialOrd for PendingSettlement {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of pending settlements keyed by fire time
#[derive(Debug, Default)]
pub struct SettlementQueue {
    heap: BinaryHeap<Reverse<PendingSettlement>>,
}

impl SettlementQueue {
    pub fn new() -> Self {
        SettlementQueue {
            heap: BinaryHeap::new(),
        }
    }

    /// Schedule a settlement to fire at `due_at`.
    pub fn schedule(&mut self, trade_id: TradeId, contract: ContractRef, due_at: DateTime<Utc>) {
        self.heap.push(Reverse(PendingSettlement {
            due_at,
            trade_id,
            contract,
        }));
    }

    /// Pop every entry due at or before `now`, in fire-time order.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<PendingSettlement> {
        let mut due = Vec::new();
        while let Some(Reverse(next)) = self.heap.peek() {
            if next.due_at > now {
                break;
            }
            due.push(self.heap.pop().expect("peeked entry exists").0);
        }
        due
    }

    /// Fire time of the earliest scheduled entry, if any.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|Reverse(p)| p.due_at)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
