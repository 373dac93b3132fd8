//! Line tokenization following the model of <https://github.com/microsoft/vscode-textmate>:
//! walk a line left to right, try anchored patterns in grammar order, keep a
//! stack of open begin/end regions, and flatten capture nesting into tokens.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Registry;
use crate::error::{Error, TintaResult};
use crate::grammars::{
    CaptureTable, DelimKind, DelimRule, Grammar, Include, MatchRule, Pattern, Regex, RegexMatch,
    Repository, RepositoryEntry, substitute_backreferences,
};
use crate::scope::Scope;
use crate::tokenizer::stack::StackFrame;

mod stack;

pub use stack::StateStack;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Byte span within the line (start inclusive, end exclusive, 0-based)
    pub span: Range<usize>,
    /// Scope names from outermost to innermost; the first element is always
    /// the base grammar's root scope
    pub scopes: Vec<Scope>,
}

/// Small wrapper so we only ever produce valid tokens: spans are contiguous,
/// endings never decrease, and zero-width tokens are dropped on the spot.
#[derive(Debug, Clone, Default)]
struct TokenAccumulator {
    tokens: Vec<Token>,
    /// Position up to which tokens have been generated
    last_end_pos: usize,
}

impl TokenAccumulator {
    fn produce(&mut self, end_pos: usize, scopes: &[Scope]) {
        // Skip empty tokens (routine with zero-width matches)
        if self.last_end_pos >= end_pos {
            return;
        }
        self.tokens.push(Token {
            span: self.last_end_pos..end_pos,
            scopes: scopes.to_vec(),
        });
        self.last_end_pos = end_pos;
    }
}

/// Flattens one match's captures into tokens over `[mat_start, mat_end]`.
///
/// Group numbering follows left-parenthesis order, a pre-order walk of the
/// capture tree, so scanning indices in ascending order while keeping a stack
/// of still-open captures recovers the nesting. A capture that reaches past
/// its parent (possible with lookahead) is cut off at the parent's end; a
/// group that did not participate contributes nothing.
fn resolve_captures(
    acc: &mut TokenAccumulator,
    table: &CaptureTable,
    captures: &[Option<(usize, usize)>],
    base_scopes: &[Scope],
    mat_end: usize,
) {
    if table.is_empty() {
        return;
    }

    // (end offset, full scope list) of captures not yet closed
    let mut open: Vec<(usize, Vec<Scope>)> = Vec::with_capacity(2);

    for (&index, scopes) in table {
        if index >= captures.len() {
            continue;
        }
        let Some((cap_start, cap_end)) = captures[index] else {
            continue;
        };
        if cap_start == cap_end {
            continue;
        }

        let cap_start = cap_start.max(acc.last_end_pos);

        // Close captures that end before this one starts
        while open.last().is_some_and(|(end, _)| *end <= cap_start) {
            let (end, finished) = open.pop().expect("checked non-empty");
            acc.produce(end, &finished);
        }

        // The gap up to this capture belongs to the enclosing capture, or to
        // the match itself
        if let Some((_, parent)) = open.last() {
            let parent = parent.clone();
            acc.produce(cap_start, &parent);
        } else {
            acc.produce(cap_start, base_scopes);
        }

        let bound = open.last().map_or(mat_end, |(end, _)| *end);
        let cap_end = cap_end.min(bound);
        if cap_end <= cap_start {
            continue;
        }

        let mut scope_list = open
            .last()
            .map_or_else(|| base_scopes.to_vec(), |(_, scopes)| scopes.clone());
        scope_list.extend(scopes.iter().copied());
        open.push((cap_end, scope_list));
    }

    while let Some((end, scopes)) = open.pop() {
        acc.produce(end, &scopes);
    }
}

/// Where a splice frame's pattern list comes from.
#[derive(Clone)]
enum SpliceSource {
    Grammar(Arc<Grammar>),
    Delim(Arc<DelimRule>),
    Entry(Arc<RepositoryEntry>),
}

impl SpliceSource {
    fn patterns(&self) -> &[Pattern] {
        match self {
            SpliceSource::Grammar(grammar) => &grammar.patterns,
            SpliceSource::Delim(rule) => &rule.patterns,
            SpliceSource::Entry(entry) => &entry.patterns,
        }
    }

    fn key(&self) -> usize {
        match self {
            SpliceSource::Grammar(grammar) => Arc::as_ptr(grammar) as usize,
            SpliceSource::Delim(rule) => Arc::as_ptr(rule) as usize,
            SpliceSource::Entry(entry) => Arc::as_ptr(entry) as usize,
        }
    }
}

/// One frame of the include work stack: a pattern list part-way through, the
/// repository chain for `#key` lookups made from it, and the grammar that
/// `$self` means inside it. Spliced lists sit on top of the frame that
/// included them, so the original list resumes when they are exhausted.
struct SpliceFrame {
    source: SpliceSource,
    index: usize,
    repos: Vec<Arc<Repository>>,
    grammar: Arc<Grammar>,
}

enum PatternHit {
    Match {
        rule: Arc<MatchRule>,
        m: RegexMatch,
    },
    Begin {
        rule: Arc<DelimRule>,
        grammar: Arc<Grammar>,
        repos: Vec<Arc<Repository>>,
        m: RegexMatch,
    },
}

#[derive(Debug)]
pub struct Tokenizer<'r> {
    /// The grammar `$base` refers to, and the root context of an empty stack
    base: Arc<Grammar>,
    base_scopes: Vec<Scope>,
    /// Consulted for includes that name another grammar's scope
    registry: &'r Registry,
    /// End patterns with backreferences are dynamic; their compiled forms are
    /// kept here keyed by the substituted source, so a region reopened with
    /// the same captures compiles once
    end_regex_cache: HashMap<String, Regex>,
}

impl<'r> Tokenizer<'r> {
    pub fn new(base: Arc<Grammar>, registry: &'r Registry) -> Self {
        let base_scopes = vec![base.root_scope];
        Self {
            base,
            base_scopes,
            registry,
            end_regex_cache: HashMap::new(),
        }
    }

    /// Tokenizes one line against the given stack, returning the tokens and
    /// the stack to thread into the next line.
    ///
    /// The caller appends `"\n"` to the line if patterns relying on
    /// end-of-line anchors should see one; `tokenize_block` does.
    pub fn tokenize_line(
        &mut self,
        stack: StateStack,
        line: &str,
    ) -> TintaResult<(Vec<Token>, StateStack)> {
        let mut stack = stack;
        stack.reset();
        let mut acc = TokenAccumulator::default();
        let mut pos = 0;

        // 1. Regions continued by a `while` pattern must re-prove themselves
        //    at the start of every line
        self.check_while_conditions(&mut stack, line, &mut pos, &mut acc)?;

        // 2. Scan for matching patterns
        loop {
            // Closing the innermost region is attempted first unless the rule
            // defers it behind its own patterns
            let mut close: Option<RegexMatch> = None;
            let mut apply_end_pattern_last = false;
            if let Some(frame) = stack.top()
                && frame.rule.kind == DelimKind::End
            {
                apply_end_pattern_last = frame.rule.apply_end_pattern_last;
                close = self.end_regex(frame)?.find_at(line, pos)?;
            }

            if let Some(m) = &close
                && !apply_end_pattern_last
            {
                let m = m.clone();
                if Self::close_region(&mut stack, &mut acc, line, pos, &m) {
                    break;
                }
                pos = m.end;
                continue;
            }

            if let Some(hit) = self.find_match(&stack, line, pos)? {
                match hit {
                    PatternHit::Match { rule, m } => {
                        #[cfg(feature = "debug")]
                        log::debug!("match rule at {}..{}: {:?}", m.start, m.end, rule.regex);

                        let outer = self.content_scopes(&stack).to_vec();
                        acc.produce(m.start, &outer);
                        let mut match_scopes = outer.clone();
                        match_scopes.extend(rule.name.iter().copied());
                        resolve_captures(&mut acc, &rule.captures, &m.captures, &match_scopes, m.end);
                        acc.produce(m.end, &match_scopes);

                        if m.end == pos {
                            // The grammar is not advancing; finish the line
                            // instead of spinning (vscode-textmate#12 family)
                            acc.produce(line.len(), &outer);
                            break;
                        }
                        pos = m.end;
                    }
                    PatternHit::Begin {
                        rule,
                        grammar,
                        repos,
                        m,
                    } => {
                        #[cfg(feature = "debug")]
                        log::debug!("open region at {}..{}: {:?}", m.start, m.end, rule.begin);

                        let outer = self.content_scopes(&stack).to_vec();
                        acc.produce(m.start, &outer);
                        let mut name_scopes = outer.clone();
                        name_scopes.extend(rule.name.iter().copied());
                        resolve_captures(
                            &mut acc,
                            &rule.begin_captures,
                            &m.captures,
                            &name_scopes,
                            m.end,
                        );
                        acc.produce(m.end, &name_scopes);

                        let mut content_scopes = name_scopes.clone();
                        content_scopes.extend(rule.content_name.iter().copied());
                        let kind = rule.kind;
                        stack.push(StackFrame {
                            rule,
                            grammar,
                            repos,
                            begin_line: line.into(),
                            begin_captures: m.captures.clone(),
                            name_scopes,
                            content_scopes: content_scopes.clone(),
                            enter_pos: Some(pos),
                        });

                        if kind == DelimKind::While {
                            // A while region owns the rest of its begin line;
                            // the next line decides whether it continues
                            acc.produce(line.len(), &content_scopes);
                            return Ok((acc.tokens, stack));
                        }
                        pos = m.end;
                    }
                }
                continue;
            }

            if let Some(m) = &close {
                // apply_end_pattern_last: the children had their chance
                let m = m.clone();
                if Self::close_region(&mut stack, &mut acc, line, pos, &m) {
                    break;
                }
                pos = m.end;
                continue;
            }

            // Nothing matched here. Skip one byte, or finish the line.
            if pos >= line.len() {
                let scopes = self.content_scopes(&stack).to_vec();
                acc.produce(line.len(), &scopes);
                break;
            }
            pos += 1;
        }

        Ok((acc.tokens, stack))
    }

    /// Splits on `'\n'`, reattaches the newline to every line, and threads
    /// the stack from empty. One token vector per line.
    pub fn tokenize_block(&mut self, text: &str) -> TintaResult<Vec<Vec<Token>>> {
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let mut stack = StateStack::new();
        let mut lines_tokens = Vec::new();
        for line in text.split('\n') {
            // Always add a newline, some patterns expect it
            let line = format!("{line}\n");
            let (tokens, next_stack) = self.tokenize_line(stack, &line)?;
            lines_tokens.push(tokens);
            stack = next_stack;
        }
        Ok(lines_tokens)
    }

    fn content_scopes<'a>(&'a self, stack: &'a StateStack) -> &'a [Scope] {
        stack
            .top()
            .map_or(&self.base_scopes, |frame| frame.content_scopes.as_slice())
    }

    /// The concrete end (or while) regex of an open region. Backreference-free
    /// patterns were compiled with the grammar; the rest are substituted from
    /// the begin-match snapshot and compiled through the cache.
    fn end_regex<'a>(&'a mut self, frame: &'a StackFrame) -> TintaResult<&'a Regex> {
        if !frame.rule.end_has_backrefs {
            return Ok(frame
                .rule
                .end
                .as_ref()
                .expect("backref-free delim rules carry a compiled end regex"));
        }
        let resolved = substitute_backreferences(
            &frame.rule.end_source,
            &frame.begin_line,
            &frame.begin_captures,
        );
        let regex = self
            .end_regex_cache
            .entry(resolved)
            .or_insert_with_key(|source| Regex::new(source.clone()));
        regex.validate()?;
        Ok(regex)
    }

    /// Emits the interior, end captures, and end marker for the innermost
    /// region, then pops it. Returns `true` when the line should stop: a
    /// region that closes zero-width right where it opened would otherwise
    /// reopen forever (vscode-textmate issue 12), so it is restored and the
    /// line finished.
    fn close_region(
        stack: &mut StateStack,
        acc: &mut TokenAccumulator,
        line: &str,
        pos: usize,
        m: &RegexMatch,
    ) -> bool {
        let frame = stack.pop().expect("closing a region requires one open");

        #[cfg(feature = "debug")]
        log::debug!("close region at {}..{}: {:?}", m.start, m.end, frame.rule.end_source);

        acc.produce(m.start, &frame.content_scopes);
        resolve_captures(
            acc,
            &frame.rule.end_captures,
            &m.captures,
            &frame.name_scopes,
            m.end,
        );
        acc.produce(m.end, &frame.name_scopes);

        if m.end == pos && frame.enter_pos == Some(pos) {
            acc.produce(line.len(), &frame.content_scopes);
            stack.push(frame);
            return true;
        }
        false
    }

    /// First anchored match at `pos` among the applicable patterns, in strict
    /// list order. Includes splice their targets on a work stack so the
    /// remaining patterns resume when a spliced list fails; a visited set
    /// keeps recursive includes from looping, since re-splicing the same list
    /// at the same position cannot match anything new.
    fn find_match(
        &self,
        stack: &StateStack,
        line: &str,
        pos: usize,
    ) -> TintaResult<Option<PatternHit>> {
        let (source, repos, grammar) = match stack.top() {
            Some(frame) => (
                SpliceSource::Delim(Arc::clone(&frame.rule)),
                frame.repos.clone(),
                Arc::clone(&frame.grammar),
            ),
            None => (
                SpliceSource::Grammar(Arc::clone(&self.base)),
                vec![Arc::clone(&self.base.repository)],
                Arc::clone(&self.base),
            ),
        };

        let mut visited: HashSet<usize> = HashSet::new();
        visited.insert(source.key());
        let mut work = vec![SpliceFrame {
            source,
            index: 0,
            repos,
            grammar,
        }];

        loop {
            let Some(frame) = work.last_mut() else {
                return Ok(None);
            };
            let Some(pattern) = frame.source.patterns().get(frame.index) else {
                work.pop();
                continue;
            };
            let pattern = pattern.clone();
            frame.index += 1;
            let repos = frame.repos.clone();
            let grammar = Arc::clone(&frame.grammar);

            match pattern {
                Pattern::Match(rule) => {
                    if let Some(m) = rule.regex.find_at(line, pos)? {
                        return Ok(Some(PatternHit::Match { rule, m }));
                    }
                }
                Pattern::Delim(rule) => {
                    if let Some(m) = rule.begin.find_at(line, pos)? {
                        return Ok(Some(PatternHit::Begin {
                            rule,
                            grammar,
                            repos,
                            m,
                        }));
                    }
                }
                Pattern::Include(Include::Self_) => {
                    splice_grammar(&mut work, &mut visited, grammar);
                }
                Pattern::Include(Include::Base) => {
                    splice_grammar(&mut work, &mut visited, Arc::clone(&self.base));
                }
                Pattern::Include(Include::Scope(name)) => {
                    if let Some(target) = self.registry.grammar(&name) {
                        splice_grammar(&mut work, &mut visited, Arc::clone(target));
                    }
                    // An unregistered grammar is not an error; the include is
                    // dropped and the next pattern tried
                }
                Pattern::Include(Include::Local(key)) => {
                    let Some(entry) = repos.iter().find_map(|repo| repo.get(&key)) else {
                        return Err(Error::UnknownRepositoryKey(key));
                    };
                    let entry = Arc::clone(entry);
                    if visited.insert(Arc::as_ptr(&entry) as usize) {
                        let mut entry_repos = repos;
                        if let Some(inner) = &entry.repository {
                            entry_repos.insert(0, Arc::clone(inner));
                        }
                        work.push(SpliceFrame {
                            source: SpliceSource::Entry(entry),
                            index: 0,
                            repos: entry_repos,
                            grammar,
                        });
                    }
                }
            }
        }
    }

    /// Line-start pass over regions held open by `while` rules, outermost in:
    /// each must match again on this line's prefix or be dropped together
    /// with everything nested inside it.
    fn check_while_conditions(
        &mut self,
        stack: &mut StateStack,
        line: &str,
        pos: &mut usize,
        acc: &mut TokenAccumulator,
    ) -> TintaResult<()> {
        if stack.is_empty() {
            return Ok(());
        }

        let while_indices: Vec<usize> = stack
            .frames
            .iter()
            .enumerate()
            .filter(|(_, frame)| frame.rule.kind == DelimKind::While)
            .map(|(index, _)| index)
            .collect();

        for index in while_indices {
            let matched = {
                let frame = &stack.frames[index];
                self.end_regex(frame)?.search_from(line, *pos)?
            };

            match matched {
                Some(m) => {
                    let frame = &stack.frames[index];
                    acc.produce(m.start, &frame.content_scopes);
                    resolve_captures(
                        acc,
                        &frame.rule.end_captures,
                        &m.captures,
                        &frame.name_scopes,
                        m.end,
                    );
                    acc.produce(m.end, &frame.name_scopes);
                    *pos = m.end;
                }
                None => {
                    #[cfg(feature = "debug")]
                    log::debug!(
                        "while condition failed, popping region at depth {index}"
                    );
                    stack.truncate(index);
                    break;
                }
            }
        }

        Ok(())
    }
}

fn splice_grammar(
    work: &mut Vec<SpliceFrame>,
    visited: &mut HashSet<usize>,
    grammar: Arc<Grammar>,
) {
    if visited.insert(Arc::as_ptr(&grammar) as usize) {
        work.push(SpliceFrame {
            repos: vec![Arc::clone(&grammar.repository)],
            source: SpliceSource::Grammar(Arc::clone(&grammar)),
            index: 0,
            grammar,
        });
    }
}
