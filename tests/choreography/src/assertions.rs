//! Assertion helpers for choreographed runs.
//!
//! Pure functions over the order in which events were satisfied.

use choreo_core::RunSequence;
use std::collections::HashSet;

/// Result of an assertion check.
#[derive(Debug, Clone)]
pub struct AssertionResult {
    /// Whether the assertion passed
    pub passed: bool,
    /// Description of what was checked
    pub description: String,
    /// Details on failure
    pub failure_details: Option<String>,
}

impl AssertionResult {
    /// Create a passing result.
    pub fn pass(description: &str) -> Self {
        Self {
            passed: true,
            description: description.into(),
            failure_details: None,
        }
    }

    /// Create a failing result.
    pub fn fail(description: &str, details: &str) -> Self {
        Self {
            passed: false,
            description: description.into(),
            failure_details: Some(details.into()),
        }
    }
}

/// Every step's names were all satisfied before any name of a later step.
///
/// Names outside the sequence are ignored.
pub fn respects_sequence(history: &[String], sequence: &RunSequence) -> AssertionResult {
    let description = "history respects run sequence";
    let mut step = 0usize;
    let mut seen_in_step = 0usize;

    for name in history {
        let Some(position) = sequence.position_of(name) else {
            continue;
        };

        if position != step {
            let complete = sequence
                .steps()
                .get(step)
                .is_some_and(|s| seen_in_step == s.len());
            if position != step + 1 || !complete {
                return AssertionResult::fail(
                    description,
                    &format!(
                        "`{}` (step {}) satisfied while step {} had {} of its names",
                        name, position, step, seen_in_step
                    ),
                );
            }
            step = position;
            seen_in_step = 0;
        }
        seen_in_step += 1;
    }

    AssertionResult::pass(description)
}

/// No name was satisfied twice.
pub fn satisfied_once(history: &[String]) -> AssertionResult {
    let description = "every event satisfied at most once";
    let mut seen = HashSet::new();
    for name in history {
        if !seen.insert(name) {
            return AssertionResult::fail(description, &format!("`{}` satisfied twice", name));
        }
    }
    AssertionResult::pass(description)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn accepts_steps_in_order() {
        let sequence = RunSequence::parse("a {b c} d").unwrap();
        assert!(respects_sequence(&history(&["a", "c", "b", "d"]), &sequence).passed);
        assert!(respects_sequence(&history(&["a", "x", "b"]), &sequence).passed);
    }

    #[test]
    fn rejects_skipped_or_partial_steps() {
        let sequence = RunSequence::parse("a {b c} d").unwrap();

        let result = respects_sequence(&history(&["a", "b", "d"]), &sequence);
        assert!(!result.passed);
        assert!(result.failure_details.unwrap().contains("`d`"));

        assert!(!respects_sequence(&history(&["b"]), &sequence).passed);
    }

    #[test]
    fn detects_double_satisfaction() {
        assert!(satisfied_once(&history(&["a", "b"])).passed);
        assert!(!satisfied_once(&history(&["a", "b", "a"])).passed);
    }
}
