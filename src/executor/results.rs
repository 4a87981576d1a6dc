use super::outcome::TaskOutcome;
use anyhow::{anyhow, Error};

/// Index-keyed slots holding each task's terminal outcome.
///
/// Every slot is written at most once; outcomes are released in input order
/// regardless of the order in which tasks finished.
pub(crate) struct OrderedResults<T> {
    slots: Vec<Option<TaskOutcome<T>>>,
    filled: usize,
}

impl<T> OrderedResults<T> {
    pub(crate) fn new(len: usize) -> Self {
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, || None);
        Self { slots, filled: 0 }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Stores the outcome for `index`. Returns false (and keeps the first
    /// outcome) if the slot was already terminal or `index` is out of range.
    pub(crate) fn record(&mut self, index: usize, outcome: TaskOutcome<T>) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) if slot.is_none() => {
                *slot = Some(outcome);
                self.filled += 1;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.filled == self.slots.len()
    }

    pub(crate) fn pending(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.is_none().then_some(index))
            .collect()
    }

    /// Fails every non-terminal slot with an error built by `make_error`,
    /// returning the indices that were filled.
    pub(crate) fn fail_pending<F>(&mut self, mut make_error: F) -> Vec<usize>
    where
        F: FnMut() -> Error,
    {
        let pending = self.pending();
        for &index in &pending {
            self.record(index, TaskOutcome::Failure(make_error()));
        }
        pending
    }

    pub(crate) fn into_outcomes(self) -> Vec<TaskOutcome<T>> {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    TaskOutcome::Failure(anyhow!("task {index} never reached a terminal state"))
                })
            })
            .collect()
    }
}
