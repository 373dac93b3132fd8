use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, TintaResult};
use crate::grammars::raw::{RawCapture, RawGrammar, RawRule};
use crate::grammars::regex::{Regex, has_backreferences};
use crate::scope::Scope;

/// Scope names for numbered capture groups. Index 0 is the whole match.
/// Indices that the regex never populates are simply never looked up.
pub type CaptureTable = BTreeMap<usize, Vec<Scope>>;

/// per vscode-textmate, the allowed `include` values:
///  * `$self`: the grammar currently being tokenized
///  * `$base`: the grammar of the outermost tokenization call
///  * `#key`: a repository lookup through the active repository chain
///  * a scope name: another grammar, resolved through the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Include {
    Self_,
    Base,
    Local(String),
    Scope(String),
}

impl From<&str> for Include {
    fn from(value: &str) -> Self {
        match value {
            "$self" => Self::Self_,
            "$base" => Self::Base,
            s if s.starts_with('#') => Self::Local(s[1..].to_string()),
            s => Self::Scope(s.to_string()),
        }
    }
}

/// A rule matching one contiguous span.
#[derive(Debug)]
pub struct MatchRule {
    pub name: Vec<Scope>,
    pub regex: Regex,
    pub captures: CaptureTable,
}

/// How a delimited region ends: when its end pattern matches (`End`), or at
/// the first line whose prefix no longer matches the pattern (`While`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelimKind {
    End,
    While,
}

/// A begin/end (or begin/while) region.
///
/// `end_source` is kept as source text because it may reference captures of
/// the begin match; `end` is the pre-compiled form, present only when the
/// source has no backreferences.
#[derive(Debug)]
pub struct DelimRule {
    pub name: Vec<Scope>,
    pub content_name: Vec<Scope>,
    pub begin: Regex,
    pub end_source: String,
    pub end: Option<Regex>,
    pub end_has_backrefs: bool,
    pub kind: DelimKind,
    pub begin_captures: CaptureTable,
    pub end_captures: CaptureTable,
    pub patterns: Vec<Pattern>,
    pub apply_end_pattern_last: bool,
}

#[derive(Debug, Clone)]
pub enum Pattern {
    Match(Arc<MatchRule>),
    Delim(Arc<DelimRule>),
    Include(Include),
}

/// A named reusable pattern group. Entries that carry their own `repository`
/// put it in scope for `#key` includes made from inside their patterns.
#[derive(Debug, Default)]
pub struct RepositoryEntry {
    pub patterns: Vec<Pattern>,
    pub repository: Option<Arc<Repository>>,
}

#[derive(Debug, Default)]
pub struct Repository(HashMap<String, Arc<RepositoryEntry>>);

impl Repository {
    pub fn get(&self, key: &str) -> Option<&Arc<RepositoryEntry>> {
        self.0.get(key)
    }
}

/// An immutable, compiled grammar. Built once from a raw document, then
/// shared freely; tokenization never mutates it.
#[derive(Debug)]
pub struct Grammar {
    pub name: Option<String>,
    pub scope_name: String,
    pub root_scope: Scope,
    pub patterns: Vec<Pattern>,
    pub repository: Arc<Repository>,
}

impl Grammar {
    /// Validates and compiles a raw grammar. Any shape problem or broken
    /// statically-known regex fails the whole grammar; nothing partial is
    /// ever returned.
    pub fn from_raw(raw: RawGrammar) -> TintaResult<Self> {
        let scope_name = raw
            .scope_name
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::GrammarShape("missing `scopeName`".to_string()))?;
        let root_scope = Scope::new(&scope_name);
        let patterns = compile_patterns(&raw.patterns)?;
        let repository = compile_repository(&raw.repository)?;
        Ok(Self {
            name: raw.name,
            scope_name,
            root_scope,
            patterns,
            repository,
        })
    }

    pub fn load_from_str(content: &str) -> TintaResult<Self> {
        Self::from_raw(RawGrammar::load_from_str(content)?)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> TintaResult<Self> {
        Self::from_raw(RawGrammar::load_from_file(path)?)
    }
}

fn parse_name(name: &Option<String>) -> Vec<Scope> {
    name.as_deref().map(Scope::parse_list).unwrap_or_default()
}

fn compile_captures(raw: &BTreeMap<String, RawCapture>) -> TintaResult<CaptureTable> {
    let mut table = CaptureTable::new();
    for (key, capture) in raw {
        let index: usize = key.parse().map_err(|_| {
            Error::GrammarShape(format!("capture index '{key}' is not an integer"))
        })?;
        let scopes = parse_name(&capture.name);
        // A capture without a name assigns nothing; keep the table dense
        if !scopes.is_empty() {
            table.insert(index, scopes);
        }
    }
    Ok(table)
}

fn compile_patterns(rules: &[RawRule]) -> TintaResult<Vec<Pattern>> {
    rules.iter().map(compile_pattern).collect()
}

fn compile_pattern(raw: &RawRule) -> TintaResult<Pattern> {
    // An `include` wins over anything else on the same rule, as in
    // vscode-textmate
    if let Some(include) = &raw.include {
        return Ok(Pattern::Include(Include::from(include.as_str())));
    }

    if let Some(source) = &raw.match_ {
        if raw.begin.is_some() || raw.end.is_some() || raw.while_.is_some() {
            return Err(Error::GrammarShape(
                "a rule cannot combine `match` with `begin`/`end`/`while`".to_string(),
            ));
        }
        let regex = Regex::new(source.clone());
        regex.validate()?;
        return Ok(Pattern::Match(Arc::new(MatchRule {
            name: parse_name(&raw.name),
            regex,
            captures: compile_captures(&raw.captures)?,
        })));
    }

    if let Some(begin_source) = &raw.begin {
        let (end_source, kind) = match (&raw.end, &raw.while_) {
            (Some(_), Some(_)) => {
                return Err(Error::GrammarShape(
                    "a rule cannot have both `end` and `while`".to_string(),
                ));
            }
            (Some(end), None) => (end.clone(), DelimKind::End),
            (None, Some(while_)) => (while_.clone(), DelimKind::While),
            (None, None) => {
                return Err(Error::GrammarShape(
                    "`begin` requires an `end` or `while`".to_string(),
                ));
            }
        };

        let begin = Regex::new(begin_source.clone());
        begin.validate()?;

        let end_has_backrefs = has_backreferences(&end_source);
        let end = if end_has_backrefs {
            // Compiled lazily per open region, once the begin captures are
            // spliced in
            None
        } else {
            let regex = Regex::new(end_source.clone());
            regex.validate()?;
            Some(regex)
        };

        // A plain `captures` table stands in for both specific tables
        let begin_captures = if raw.begin_captures.is_empty() {
            compile_captures(&raw.captures)?
        } else {
            compile_captures(&raw.begin_captures)?
        };
        let end_captures = if raw.end_captures.is_empty() {
            compile_captures(&raw.captures)?
        } else {
            compile_captures(&raw.end_captures)?
        };

        return Ok(Pattern::Delim(Arc::new(DelimRule {
            name: parse_name(&raw.name),
            content_name: parse_name(&raw.content_name),
            begin,
            end_source,
            end,
            end_has_backrefs,
            kind,
            begin_captures,
            end_captures,
            patterns: compile_patterns(&raw.patterns)?,
            apply_end_pattern_last: raw.apply_end_pattern_last,
        })));
    }

    Err(Error::GrammarShape(
        "a pattern must have one of `match`, `begin`, or `include`".to_string(),
    ))
}

fn compile_repository(raw: &BTreeMap<String, RawRule>) -> TintaResult<Arc<Repository>> {
    let mut entries = HashMap::with_capacity(raw.len());
    for (key, rule) in raw {
        entries.insert(key.clone(), Arc::new(compile_repository_entry(rule)?));
    }
    Ok(Arc::new(Repository(entries)))
}

fn compile_repository_entry(rule: &RawRule) -> TintaResult<RepositoryEntry> {
    let repository = if rule.repository.is_empty() {
        None
    } else {
        Some(compile_repository(&rule.repository)?)
    };

    // A repository value is either a single rule or a `{ "patterns": [...] }`
    // container
    let patterns = if rule.include.is_some() || rule.match_.is_some() || rule.begin.is_some() {
        vec![compile_pattern(rule)?]
    } else {
        compile_patterns(&rule.patterns)?
    };

    Ok(RepositoryEntry {
        patterns,
        repository,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(json: &str) -> TintaResult<Grammar> {
        Grammar::load_from_str(json)
    }

    #[test]
    fn include_parsing() {
        assert_eq!(Include::from("$self"), Include::Self_);
        assert_eq!(Include::from("$base"), Include::Base);
        assert_eq!(Include::from("#value"), Include::Local("value".to_string()));
        assert_eq!(
            Include::from("source.js"),
            Include::Scope("source.js".to_string())
        );
    }

    #[test]
    fn missing_scope_name_is_a_shape_error() {
        let err = compile(r#"{ "patterns": [] }"#).unwrap_err();
        assert!(matches!(err, Error::GrammarShape(_)));
    }

    #[test]
    fn match_combined_with_begin_is_rejected() {
        let err = compile(
            r#"{ "scopeName": "source.t",
                 "patterns": [{ "match": "a", "begin": "b", "end": "c" }] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::GrammarShape(_)));
    }

    #[test]
    fn begin_without_end_or_while_is_rejected() {
        let err = compile(
            r#"{ "scopeName": "source.t", "patterns": [{ "begin": "a" }] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::GrammarShape(_)));
    }

    #[test]
    fn end_and_while_together_are_rejected() {
        let err = compile(
            r#"{ "scopeName": "source.t",
                 "patterns": [{ "begin": "a", "end": "b", "while": "c" }] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::GrammarShape(_)));
    }

    #[test]
    fn empty_pattern_object_is_rejected() {
        let err =
            compile(r#"{ "scopeName": "source.t", "patterns": [{ "name": "x" }] }"#).unwrap_err();
        assert!(matches!(err, Error::GrammarShape(_)));
    }

    #[test]
    fn non_integer_capture_index_is_rejected() {
        let err = compile(
            r#"{ "scopeName": "source.t",
                 "patterns": [{ "match": "a", "captures": { "first": { "name": "x" } } }] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::GrammarShape(_)));
    }

    #[test]
    fn broken_regex_fails_the_load() {
        let err = compile(
            r#"{ "scopeName": "source.t", "patterns": [{ "match": "(" }] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::RegexCompile { .. }));
    }

    #[test]
    fn end_with_backrefs_is_not_precompiled() {
        let grammar = compile(
            r#"{ "scopeName": "source.t",
                 "patterns": [{ "begin": "(\\w+)", "end": "\\1" }] }"#,
        )
        .unwrap();
        let Pattern::Delim(rule) = &grammar.patterns[0] else {
            panic!("expected a delim rule");
        };
        assert!(rule.end_has_backrefs);
        assert!(rule.end.is_none());
        assert_eq!(rule.end_source, "\\1");
    }

    #[test]
    fn shared_captures_apply_to_both_markers() {
        let grammar = compile(
            r#"{ "scopeName": "source.t",
                 "patterns": [{
                     "begin": "(\")", "end": "(\")",
                     "captures": { "1": { "name": "punctuation.quote" } }
                 }] }"#,
        )
        .unwrap();
        let Pattern::Delim(rule) = &grammar.patterns[0] else {
            panic!("expected a delim rule");
        };
        assert_eq!(rule.begin_captures.len(), 1);
        assert_eq!(rule.end_captures.len(), 1);
    }

    #[test]
    fn repository_accepts_single_rules_and_containers() {
        let grammar = compile(
            r##"{ "scopeName": "source.t",
                  "patterns": [{ "include": "#a" }],
                  "repository": {
                      "a": { "match": "x", "name": "kw" },
                      "b": {
                          "patterns": [{ "include": "#inner" }],
                          "repository": { "inner": { "match": "y" } }
                      }
                  } }"##,
        )
        .unwrap();
        let a = grammar.repository.get("a").unwrap();
        assert_eq!(a.patterns.len(), 1);
        assert!(a.repository.is_none());

        let b = grammar.repository.get("b").unwrap();
        assert_eq!(b.patterns.len(), 1);
        let inner = b.repository.as_ref().unwrap();
        assert!(inner.get("inner").is_some());
    }

    #[test]
    fn names_with_spaces_become_scope_lists() {
        let grammar = compile(
            r#"{ "scopeName": "source.t",
                 "patterns": [{ "match": "x", "name": "string.json support.type" }] }"#,
        )
        .unwrap();
        let Pattern::Match(rule) = &grammar.patterns[0] else {
            panic!("expected a match rule");
        };
        assert_eq!(rule.name.len(), 2);
    }
}
