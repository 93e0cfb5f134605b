//! Per-model metric ledger: global MSE and per-trainer partial MSE by iteration.
//!
//! Writes overwrite by iteration and may arrive out of order. A value the
//! buyer has confirmed through a check is locked: it may be rewritten with
//! the same value but never changed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type Iteration = u64;
pub type Mse = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricEntry {
    pub value: Mse,
    pub verified: bool,
}

impl MetricEntry {
    fn accepts(&self, value: Mse) -> bool { !self.verified || self.value == value }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IterationRecord {
    pub global_mse: Option<MetricEntry>,
    pub partial_mse: BTreeMap<String, MetricEntry>,
}

/// Rejected overwrite of a verified value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedMetric {
    pub iteration: Iteration,
    pub locked_value: Mse,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricLedger {
    iterations: BTreeMap<Iteration, IterationRecord>,
}

impl MetricLedger {
    pub fn new() -> Self { Self::default() }

    pub fn save_global_mse(&mut self, iteration: Iteration, value: Mse) -> Result<(), VerifiedMetric> {
        if let Some(entry) = self.iterations.get(&iteration).and_then(|r| r.global_mse) {
            if !entry.accepts(value) { return Err(VerifiedMetric { iteration, locked_value: entry.value }); }
            if entry.value == value { return Ok(()); }
        }
        self.iterations.entry(iteration).or_default().global_mse = Some(MetricEntry { value, verified: false });
        Ok(())
    }

    pub fn save_partial_mse(&mut self, trainer: &str, iteration: Iteration, value: Mse) -> Result<(), VerifiedMetric> {
        if let Some(entry) = self.partial_entry(trainer, iteration) {
            if !entry.accepts(value) { return Err(VerifiedMetric { iteration, locked_value: entry.value }); }
            if entry.value == value { return Ok(()); }
        }
        self.iterations
            .entry(iteration)
            .or_default()
            .partial_mse
            .insert(trainer.to_string(), MetricEntry { value, verified: false });
        Ok(())
    }

    /// Equality check against the stored global MSE. A match locks the value.
    pub fn check_global_mse(&mut self, iteration: Iteration, expected: Mse) -> bool {
        match self.iterations.get_mut(&iteration).and_then(|r| r.global_mse.as_mut()) {
            Some(entry) if entry.value == expected => { entry.verified = true; true }
            _ => false,
        }
    }

    pub fn check_partial_mse(&mut self, trainer: &str, iteration: Iteration, expected: Mse) -> bool {
        match self.iterations.get_mut(&iteration).and_then(|r| r.partial_mse.get_mut(trainer)) {
            Some(entry) if entry.value == expected => { entry.verified = true; true }
            _ => false,
        }
    }

    pub fn global_mse(&self, iteration: Iteration) -> Option<Mse> {
        self.iterations.get(&iteration).and_then(|r| r.global_mse).map(|e| e.value)
    }

    pub fn partial_mse(&self, trainer: &str, iteration: Iteration) -> Option<Mse> {
        self.partial_entry(trainer, iteration).map(|e| e.value)
    }

    fn partial_entry(&self, trainer: &str, iteration: Iteration) -> Option<MetricEntry> {
        self.iterations.get(&iteration).and_then(|r| r.partial_mse.get(trainer)).copied()
    }

    /// Global MSE at the lowest iteration that has one: the training baseline.
    pub fn initial_global(&self) -> Option<(Iteration, Mse)> {
        self.iterations.iter().find_map(|(i, r)| r.global_mse.map(|e| (*i, e.value)))
    }

    /// Global MSE at the highest iteration that has one.
    pub fn final_global(&self) -> Option<(Iteration, Mse)> {
        self.iterations.iter().rev().find_map(|(i, r)| r.global_mse.map(|e| (*i, e.value)))
    }

    /// Highest iteration touched by any write.
    pub fn current_iteration(&self) -> Option<Iteration> { self.iterations.keys().next_back().copied() }

    pub fn len(&self) -> usize { self.iterations.len() }
    pub fn is_empty(&self) -> bool { self.iterations.is_empty() }
}
