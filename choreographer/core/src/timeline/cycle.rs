//! Cycle Bookkeeping
//!
//! Maps loop iterations to the spans that realize them. The live keys are
//! always exactly the contiguous range `[first_active, last_added]`: cycles
//! are only ever appended at the top and retired from the bottom.

use std::collections::BTreeMap;

use super::span::SpanId;

/// Live cycles of the current clip
#[derive(Clone, Debug, Default)]
pub struct CycleBook {
    cycles: BTreeMap<u64, Vec<SpanId>>,
}

impl CycleBook {
    /// Create an empty book
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lowest live cycle
    #[must_use]
    pub fn first_active(&self) -> Option<u64> {
        self.cycles.keys().next().copied()
    }

    /// Highest live cycle
    #[must_use]
    pub fn last_added(&self) -> Option<u64> {
        self.cycles.keys().next_back().copied()
    }

    /// Index the next appended cycle will get
    #[must_use]
    pub fn next_cycle(&self) -> u64 {
        self.last_added().map_or(0, |c| c + 1)
    }

    /// Append the next cycle; returns its index
    pub fn push(&mut self, spans: Vec<SpanId>) -> u64 {
        let cycle = self.next_cycle();
        self.cycles.insert(cycle, spans);
        cycle
    }

    /// Spans of a live cycle
    #[must_use]
    pub fn spans(&self, cycle: u64) -> Option<&[SpanId]> {
        self.cycles.get(&cycle).map(Vec::as_slice)
    }

    /// Remove every cycle strictly below `cycle`, returning them in order
    pub fn retire_below(&mut self, cycle: u64) -> Vec<(u64, Vec<SpanId>)> {
        let kept = self.cycles.split_off(&cycle);
        std::mem::replace(&mut self.cycles, kept)
            .into_iter()
            .collect()
    }

    /// Remove every cycle, returning all their spans
    pub fn drain_all(&mut self) -> Vec<SpanId> {
        std::mem::take(&mut self.cycles)
            .into_values()
            .flatten()
            .collect()
    }

    /// Number of live cycles
    #[must_use]
    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    /// Whether no cycle is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }

    /// Live cycle indices in ascending order
    pub fn keys(&self) -> impl Iterator<Item = u64> + '_ {
        self.cycles.keys().copied()
    }

    /// Whether the live keys form the range `[first_active, last_added]`
    #[must_use]
    pub fn is_contiguous(&self) -> bool {
        match (self.first_active(), self.last_added()) {
            (Some(first), Some(last)) => (last - first + 1) as usize == self.cycles.len(),
            _ => true,
        }
    }
}
