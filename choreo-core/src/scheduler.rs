//! Run-sequence scheduler.
//!
//! A pure state machine over the declared order:
//!
//! ```text
//! At(0) ──all of step 0 satisfied──► At(1) ──► … ──► Completed
//! ```
//!
//! Transitions never go backward and a step is never revisited. The
//! coordination server owns the only instance and serializes every call, so
//! "mark satisfied" and "advance the cursor" happen as one step.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::sequence::{RunSequence, Step};

/// Where the scheduler stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for every member of the step at this index.
    At(usize),
    /// Every step has been satisfied.
    Completed,
}

/// Result of accepting a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// The name was marked satisfied.
    Satisfied {
        /// New state when the signal completed its step, `None` otherwise.
        advanced_to: Option<SchedulerState>,
    },
    /// The name was already satisfied; nothing changed.
    Duplicate,
    /// The name is declared but not part of the run sequence; recorded only.
    Unsequenced,
}

/// Signals the scheduler refuses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The name is not declared.
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
    /// The name's step has not been reached.
    #[error("event `{event}` belongs to step {step} but step {cursor} is awaited")]
    OutOfOrder {
        /// Event name.
        event: String,
        /// Step of the event.
        step: usize,
        /// Step currently awaited.
        cursor: usize,
    },
}

/// State machine over a [`RunSequence`].
#[derive(Debug, Clone)]
pub struct Scheduler {
    sequence: RunSequence,
    /// name → step index, for sequenced names.
    steps_by_name: HashMap<String, usize>,
    /// Declared names outside the sequence.
    unsequenced: HashSet<String>,
    satisfied: HashSet<String>,
    cursor: usize,
    /// Sequenced names satisfied so far.
    progress: usize,
    /// Names in the order they were satisfied.
    order: Vec<String>,
}

impl Scheduler {
    /// Create a scheduler for `sequence`.
    ///
    /// `declared` lists every event name of the deployment; names not in the
    /// sequence become unconstrained.
    pub fn new<I, S>(sequence: RunSequence, declared: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let steps_by_name: HashMap<String, usize> = sequence
            .steps()
            .iter()
            .enumerate()
            .flat_map(|(i, step)| step.names().iter().map(move |n| (n.clone(), i)))
            .collect();
        let unsequenced = declared
            .into_iter()
            .map(Into::into)
            .filter(|n| !steps_by_name.contains_key(n))
            .collect();

        let mut scheduler = Self {
            sequence,
            steps_by_name,
            unsequenced,
            satisfied: HashSet::new(),
            cursor: 0,
            progress: 0,
            order: Vec::new(),
        };
        // Empty steps never block.
        scheduler.advance();
        scheduler
    }

    /// Current state.
    pub fn state(&self) -> SchedulerState {
        if self.cursor >= self.sequence.len() {
            SchedulerState::Completed
        } else {
            SchedulerState::At(self.cursor)
        }
    }

    /// Index of the awaited step (equals the step count once completed).
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of sequenced names satisfied so far.
    ///
    /// Grows with every accepted signal for a step, including signals that
    /// leave a concurrent step open.
    pub fn progress(&self) -> usize {
        self.progress
    }

    /// The run sequence being walked.
    pub fn sequence(&self) -> &RunSequence {
        &self.sequence
    }

    /// The awaited step, if any.
    pub fn current_step(&self) -> Option<&Step> {
        self.sequence.steps().get(self.cursor)
    }

    /// Whether every step has been satisfied.
    pub fn is_completed(&self) -> bool {
        matches!(self.state(), SchedulerState::Completed)
    }

    /// Whether `name` is known to this scheduler.
    pub fn is_declared(&self, name: &str) -> bool {
        self.steps_by_name.contains_key(name) || self.unsequenced.contains(name)
    }

    /// Step index of a sequenced name.
    pub fn step_of(&self, name: &str) -> Option<usize> {
        self.steps_by_name.get(name).copied()
    }

    /// Whether `name` has been satisfied.
    pub fn is_satisfied(&self, name: &str) -> Result<bool, SchedulerError> {
        if !self.is_declared(name) {
            return Err(SchedulerError::UnknownEvent(name.to_string()));
        }
        Ok(self.satisfied.contains(name))
    }

    /// Whether `name` may be released: every earlier step is satisfied.
    pub fn is_turn(&self, name: &str) -> Result<bool, SchedulerError> {
        match self.steps_by_name.get(name) {
            Some(step) => Ok(*step <= self.cursor),
            None if self.unsequenced.contains(name) => Ok(true),
            None => Err(SchedulerError::UnknownEvent(name.to_string())),
        }
    }

    /// Mark `name` satisfied, advancing past every step that is now complete.
    pub fn mark_satisfied(&mut self, name: &str) -> Result<SignalOutcome, SchedulerError> {
        if self.satisfied.contains(name) {
            return Ok(SignalOutcome::Duplicate);
        }

        let step = match self.steps_by_name.get(name) {
            Some(step) => *step,
            None if self.unsequenced.contains(name) => {
                self.record(name);
                return Ok(SignalOutcome::Unsequenced);
            }
            None => return Err(SchedulerError::UnknownEvent(name.to_string())),
        };

        if step > self.cursor {
            return Err(SchedulerError::OutOfOrder {
                event: name.to_string(),
                step,
                cursor: self.cursor,
            });
        }

        self.record(name);
        self.progress += 1;
        let before = self.cursor;
        self.advance();
        let advanced_to = (self.cursor != before).then(|| self.state());

        Ok(SignalOutcome::Satisfied { advanced_to })
    }

    /// Names in the order they were satisfied.
    pub fn satisfied_order(&self) -> &[String] {
        &self.order
    }

    fn record(&mut self, name: &str) {
        self.satisfied.insert(name.to_string());
        self.order.push(name.to_string());
    }

    fn advance(&mut self) {
        while let Some(step) = self.sequence.steps().get(self.cursor) {
            if !step.names().iter().all(|n| self.satisfied.contains(n)) {
                break;
            }
            self.cursor += 1;
        }
    }
}
