//! Bounded audit log of recovery decisions
//!
//! Decisions are built in full before the write lock is taken and stored as
//! `Arc<Decision>`, so readers only ever see complete entries.

use astra_common::{Decision, DecisionDraft, MissionPhase, ResponseClass};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use tracing::debug;
use uuid::Uuid;

/// Aggregate view over the retained decisions
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DecisionSummary {
    /// Decisions recorded since start, evicted ones included
    pub total_recorded: u64,
    pub retained: usize,
    pub escalations: usize,
    pub escalation_rate: f64,
    pub by_phase: BTreeMap<MissionPhase, usize>,
    pub by_action: BTreeMap<ResponseClass, usize>,
    pub by_anomaly_type: BTreeMap<String, usize>,
}

/// Fixed-capacity FIFO of decisions
#[derive(Debug)]
pub struct DecisionTracer {
    capacity: usize,
    decisions: RwLock<VecDeque<Arc<Decision>>>,
    total_recorded: AtomicU64,
}

impl DecisionTracer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            decisions: RwLock::new(VecDeque::with_capacity(capacity)),
            total_recorded: AtomicU64::new(0),
        }
    }

    /// Assign an id and timestamp to `draft` and append it, evicting the
    /// oldest entry when full
    pub fn record(&self, draft: DecisionDraft) -> Arc<Decision> {
        let decision = Arc::new(Decision::from_draft(Uuid::new_v4(), Utc::now(), draft));

        {
            let mut decisions = self
                .decisions
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if decisions.len() >= self.capacity {
                if let Some(evicted) = decisions.pop_front() {
                    debug!(decision_id = %evicted.id, "evicting oldest decision");
                }
            }
            decisions.push_back(Arc::clone(&decision));
        }
        self.total_recorded.fetch_add(1, Ordering::Relaxed);

        decision
    }

    pub fn add_decision(&self, draft: DecisionDraft) -> Uuid {
        self.record(draft).id
    }

    /// Up to `n` decisions, most recent first
    pub fn get_recent(&self, n: usize) -> Vec<Arc<Decision>> {
        self.read().iter().rev().take(n).cloned().collect()
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Decision>> {
        self.read().iter().rev().find(|d| d.id == id).cloned()
    }

    pub fn decisions_for_phase(&self, phase: MissionPhase) -> Vec<Arc<Decision>> {
        self.filtered(|d| d.mission_phase == phase)
    }

    pub fn decisions_for_anomaly_type(&self, anomaly_type: &str) -> Vec<Arc<Decision>> {
        self.filtered(|d| d.anomaly_type == anomaly_type)
    }

    pub fn escalations(&self) -> Vec<Arc<Decision>> {
        self.filtered(|d| d.is_escalation())
    }

    pub fn summary(&self) -> DecisionSummary {
        let decisions = self.read();
        let mut summary = DecisionSummary {
            total_recorded: self.total_recorded.load(Ordering::Relaxed),
            retained: decisions.len(),
            ..DecisionSummary::default()
        };

        for d in decisions.iter() {
            if d.is_escalation() {
                summary.escalations += 1;
            }
            *summary.by_phase.entry(d.mission_phase).or_insert(0) += 1;
            *summary.by_action.entry(d.action.class).or_insert(0) += 1;
            *summary.by_anomaly_type.entry(d.anomaly_type.clone()).or_insert(0) += 1;
        }

        if summary.retained > 0 {
            summary.escalation_rate = summary.escalations as f64 / summary.retained as f64;
        }
        summary
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Newest first
    fn filtered(&self, keep: impl Fn(&Decision) -> bool) -> Vec<Arc<Decision>> {
        self.read().iter().rev().filter(|d| keep(d)).cloned().collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, VecDeque<Arc<Decision>>> {
        self.decisions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
