use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer};

use crate::error::TintaResult;

/// `applyEndPatternLast` shows up as a bool in most grammars but as 0/1 in
/// older ones; accept both.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum BoolOrNumber {
    Bool(bool),
    Number(u8),
}

fn bool_or_number<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match BoolOrNumber::deserialize(deserializer)? {
        BoolOrNumber::Bool(b) => Ok(b),
        BoolOrNumber::Number(0) => Ok(false),
        BoolOrNumber::Number(1) => Ok(true),
        BoolOrNumber::Number(x) => Err(serde::de::Error::custom(format!(
            "expected bool, 0, or 1, got {x}"
        ))),
    }
}

/// A capture table value: `{ "name": "..." }`.
///
/// Keys of the surrounding object are decimal group indices; they stay as
/// strings here and are validated when the grammar is compiled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawCapture {
    #[serde(default)]
    pub name: Option<String>,
}

/// One entry of a `patterns` array or `repository` object, before
/// validation. Which fields are present decides what the rule is: a match
/// rule, a begin/end or begin/while region, an include, or (repository
/// values only) a plain pattern container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawRule {
    pub include: Option<String>,

    pub name: Option<String>,
    pub content_name: Option<String>,

    #[serde(rename = "match")]
    pub match_: Option<String>,
    pub captures: BTreeMap<String, RawCapture>,

    pub begin: Option<String>,
    pub begin_captures: BTreeMap<String, RawCapture>,

    pub end: Option<String>,
    pub end_captures: BTreeMap<String, RawCapture>,

    #[serde(rename = "while")]
    pub while_: Option<String>,

    pub patterns: Vec<RawRule>,
    pub repository: BTreeMap<String, RawRule>,

    #[serde(deserialize_with = "bool_or_number")]
    pub apply_end_pattern_last: bool,
}

/// Top-level structure of a TextMate grammar document, JSON flavour.
///
/// ```json
/// {
///   "name": "JSON",
///   "scopeName": "source.json",
///   "patterns": [{ "include": "#value" }],
///   "repository": {
///     "value": { "patterns": [{ "match": "\\d+", "name": "constant.numeric" }] }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawGrammar {
    pub name: Option<String>,
    pub scope_name: Option<String>,
    pub patterns: Vec<RawRule>,
    pub repository: BTreeMap<String, RawRule>,
}

impl RawGrammar {
    pub fn load_from_str(content: &str) -> TintaResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> TintaResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::load_from_str(&content)
    }
}
