use std::fmt;
use std::sync::Arc;

use crate::grammars::{DelimRule, Grammar, Repository};
use crate::scope::Scope;

/// One open region: a begin pattern has matched, its end (or while) has not.
///
/// A frame owns everything needed to finish the region on a later line: the
/// rule, the grammar it came from (which may differ from the base grammar
/// after a cross-grammar include), the repository chain active where the
/// region opened, and a snapshot of the begin line and its capture offsets
/// for backreference substitution into the end pattern.
#[derive(Clone)]
pub struct StackFrame {
    pub(crate) rule: Arc<DelimRule>,
    pub(crate) grammar: Arc<Grammar>,
    pub(crate) repos: Vec<Arc<Repository>>,
    pub(crate) begin_line: Box<str>,
    pub(crate) begin_captures: Vec<Option<(usize, usize)>>,
    /// Scopes tagging the begin and end markers: outer scopes plus the
    /// rule's `name`.
    pub(crate) name_scopes: Vec<Scope>,
    /// Scopes tagging the interior: `name_scopes` plus `contentName`.
    pub(crate) content_scopes: Vec<Scope>,
    /// Position where the region opened during the current line, for
    /// zero-width close protection. `None` once the line ends.
    pub(crate) enter_pos: Option<usize>,
}

impl fmt::Debug for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StackFrame(content=[")?;
        for (i, scope) in self.content_scopes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{scope}")?;
        }
        write!(f, "], begin={:?})", self.rule.begin.pattern())
    }
}

/// The nesting state threaded between lines: open regions from outermost to
/// innermost. Empty means the root context of the base grammar.
///
/// A stack returned by one `tokenize_line` call is self-contained; it can be
/// stored, cloned for branching, and fed into the next line whenever.
#[derive(Debug, Clone, Default)]
pub struct StateStack {
    pub(crate) frames: Vec<StackFrame>,
}

impl StateStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub(crate) fn top(&self) -> Option<&StackFrame> {
        self.frames.last()
    }

    pub(crate) fn push(&mut self, frame: StackFrame) {
        self.frames.push(frame);
    }

    pub(crate) fn pop(&mut self) -> Option<StackFrame> {
        self.frames.pop()
    }

    /// Drops the frame at `index` and everything nested inside it.
    pub(crate) fn truncate(&mut self, index: usize) {
        self.frames.truncate(index);
    }

    /// Clears per-line bookkeeping; called when a new line starts.
    pub(crate) fn reset(&mut self) {
        for frame in &mut self.frames {
            frame.enter_pos = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammars::{DelimKind, Regex};

    fn dummy_frame(marker: &str) -> StackFrame {
        let rule = Arc::new(DelimRule {
            name: Scope::parse_list(marker),
            content_name: Vec::new(),
            begin: Regex::new("x".to_string()),
            end_source: "y".to_string(),
            end: Some(Regex::new("y".to_string())),
            end_has_backrefs: false,
            kind: DelimKind::End,
            begin_captures: Default::default(),
            end_captures: Default::default(),
            patterns: Vec::new(),
            apply_end_pattern_last: false,
        });
        let grammar = Arc::new(
            crate::grammars::Grammar::load_from_str(r#"{ "scopeName": "source.stacktest" }"#)
                .unwrap(),
        );
        StackFrame {
            rule,
            repos: vec![Arc::clone(&grammar.repository)],
            grammar,
            begin_line: "x\n".into(),
            begin_captures: vec![Some((0, 1))],
            name_scopes: Scope::parse_list(marker),
            content_scopes: Scope::parse_list(marker),
            enter_pos: Some(0),
        }
    }

    #[test]
    fn truncate_drops_nested_frames() {
        let mut stack = StateStack::new();
        stack.push(dummy_frame("outer"));
        stack.push(dummy_frame("middle"));
        stack.push(dummy_frame("inner"));
        stack.truncate(1);
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.top().unwrap().name_scopes, Scope::parse_list("outer"));
    }

    #[test]
    fn reset_clears_enter_positions() {
        let mut stack = StateStack::new();
        stack.push(dummy_frame("outer"));
        assert_eq!(stack.top().unwrap().enter_pos, Some(0));
        stack.reset();
        assert_eq!(stack.top().unwrap().enter_pos, None);
    }
}
