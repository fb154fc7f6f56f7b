//! Run sequences: the declared order events must occur in.
//!
//! The textual form is a list of event names. `*` may separate names and is
//! ignored; every bare name is its own step, so the default reading is a
//! strict total order. Braces group names into one step whose members may
//! complete in any relative order:
//!
//! ```text
//! bbe2 * e1 * ubbe2 * e2 * e3      five singleton steps
//! start-n1 {e1 e2} stop-n1         three steps, the middle one concurrent
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Errors from parsing the textual run sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequenceParseError {
    /// A `{` group was opened inside another group.
    #[error("nested group at offset {offset}")]
    NestedGroup {
        /// Byte offset of the inner `{`.
        offset: usize,
    },
    /// A `{` group was never closed.
    #[error("unclosed group opened at offset {offset}")]
    UnclosedGroup {
        /// Byte offset of the `{`.
        offset: usize,
    },
    /// A `}` appeared without a matching `{`.
    #[error("unexpected `}}` at offset {offset}")]
    UnexpectedClose {
        /// Byte offset of the `}`.
        offset: usize,
    },
    /// A group contained no names.
    #[error("empty group at offset {offset}")]
    EmptyGroup {
        /// Byte offset of the `{`.
        offset: usize,
    },
    /// A character that cannot appear in an event name.
    #[error("invalid character {ch:?} at offset {offset}")]
    InvalidCharacter {
        /// The character.
        ch: char,
        /// Byte offset of the character.
        offset: usize,
    },
    /// A name appeared more than once.
    #[error("event `{0}` appears more than once")]
    DuplicateName(String),
}

/// One position in the run sequence.
///
/// Every member must be satisfied before any member of the next step is
/// released. Members are kept in declaration order for stable output only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    names: Vec<String>,
}

impl Step {
    /// Create a step from its member names.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Member names of this step.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Whether `name` is a member of this step.
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the step has no members.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Ordered list of steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunSequence {
    steps: Vec<Step>,
}

impl RunSequence {
    /// Build a run sequence from already-grouped steps.
    ///
    /// No validation happens here; duplicates are reported by the verifier.
    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// Strict total order of singleton steps.
    pub fn strict<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: names.into_iter().map(|n| Step::new([n])).collect(),
        }
    }

    /// Parse the textual form.
    pub fn parse(input: &str) -> Result<Self, SequenceParseError> {
        let mut steps = Vec::new();
        let mut group: Option<(usize, Vec<String>)> = None;
        let mut seen = HashSet::new();

        for token in tokenize(input)? {
            match token {
                Token::Separator => {}
                Token::Open(offset) => {
                    if group.is_some() {
                        return Err(SequenceParseError::NestedGroup { offset });
                    }
                    group = Some((offset, Vec::new()));
                }
                Token::Close(offset) => match group.take() {
                    Some((open, names)) if names.is_empty() => {
                        return Err(SequenceParseError::EmptyGroup { offset: open });
                    }
                    Some((_, names)) => steps.push(Step { names }),
                    None => return Err(SequenceParseError::UnexpectedClose { offset }),
                },
                Token::Name(name) => {
                    if !seen.insert(name.clone()) {
                        return Err(SequenceParseError::DuplicateName(name));
                    }
                    match group.as_mut() {
                        Some((_, names)) => names.push(name),
                        None => steps.push(Step { names: vec![name] }),
                    }
                }
            }
        }

        if let Some((offset, _)) = group {
            return Err(SequenceParseError::UnclosedGroup { offset });
        }

        Ok(Self { steps })
    }

    /// All steps in order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the sequence has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Index of the step containing `name`.
    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.contains(name))
    }

    /// Every name in sequence order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.steps
            .iter()
            .flat_map(|s| s.names.iter().map(String::as_str))
    }
}

impl std::fmt::Display for RunSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str(" * ")?;
            }
            match step.names.as_slice() {
                [single] => f.write_str(single)?,
                names => write!(f, "{{{}}}", names.join(" "))?,
            }
        }
        Ok(())
    }
}

impl TryFrom<String> for RunSequence {
    type Error = SequenceParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RunSequence> for String {
    fn from(value: RunSequence) -> Self {
        value.to_string()
    }
}

enum Token {
    Separator,
    Open(usize),
    Close(usize),
    Name(String),
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '/')
}

fn tokenize(input: &str) -> Result<Vec<Token>, SequenceParseError> {
    let mut tokens = Vec::new();
    let mut current: Option<String> = None;

    for (offset, ch) in input.char_indices() {
        if is_name_char(ch) {
            current.get_or_insert_with(String::new).push(ch);
            continue;
        }
        if let Some(name) = current.take() {
            tokens.push(Token::Name(name));
        }
        match ch {
            '*' | ',' => tokens.push(Token::Separator),
            '{' => tokens.push(Token::Open(offset)),
            '}' => tokens.push(Token::Close(offset)),
            c if c.is_whitespace() => {}
            c => return Err(SequenceParseError::InvalidCharacter { ch: c, offset }),
        }
    }
    if let Some(name) = current.take() {
        tokens.push(Token::Name(name));
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separator_is_cosmetic() {
        let starred = RunSequence::parse("bbe2 * e1 * ubbe2 * e2 * e3").unwrap();
        let bare = RunSequence::parse("bbe2 e1 ubbe2 e2 e3").unwrap();
        assert_eq!(starred, bare);
        assert_eq!(starred.len(), 5);
        assert!(starred.steps().iter().all(|s| s.len() == 1));
    }

    #[test]
    fn braces_group_concurrent_siblings() {
        let seq = RunSequence::parse("start-n1 {e1 e2} stop-n1").unwrap();
        assert_eq!(seq.len(), 3);
        assert_eq!(seq.steps()[1].names(), ["e1", "e2"]);
        assert_eq!(seq.position_of("e2"), Some(1));
        assert_eq!(seq.position_of("missing"), None);
    }

    #[test]
    fn display_roundtrips_through_parse() {
        let seq = RunSequence::parse("a*{b c}*d").unwrap();
        assert_eq!(seq.to_string(), "a * {b c} * d");
        assert_eq!(RunSequence::parse(&seq.to_string()).unwrap(), seq);
    }

    #[test]
    fn empty_input_is_empty_sequence() {
        let seq = RunSequence::parse("   ").unwrap();
        assert!(seq.is_empty());
    }

    #[test]
    fn rejects_duplicates() {
        assert_eq!(
            RunSequence::parse("a b a"),
            Err(SequenceParseError::DuplicateName("a".into()))
        );
    }

    #[test]
    fn rejects_bad_groups() {
        assert!(matches!(
            RunSequence::parse("{a {b}}"),
            Err(SequenceParseError::NestedGroup { offset: 3 })
        ));
        assert!(matches!(
            RunSequence::parse("{a b"),
            Err(SequenceParseError::UnclosedGroup { offset: 0 })
        ));
        assert!(matches!(
            RunSequence::parse("a }"),
            Err(SequenceParseError::UnexpectedClose { offset: 2 })
        ));
        assert!(matches!(
            RunSequence::parse("a {}"),
            Err(SequenceParseError::EmptyGroup { offset: 2 })
        ));
    }

    #[test]
    fn rejects_invalid_characters() {
        assert!(matches!(
            RunSequence::parse("a;b"),
            Err(SequenceParseError::InvalidCharacter { ch: ';', offset: 1 })
        ));
    }

    #[test]
    fn strict_builds_singletons() {
        let seq = RunSequence::strict(["x", "y"]);
        assert_eq!(seq.names().collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(seq.len(), 2);
    }
}
