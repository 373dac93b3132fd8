use std::io;

use thiserror::Error;

pub(crate) type TintaResult<T> = Result<T, Error>;

/// Errors that can occur while loading grammars or tokenizing.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred when reading a grammar file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON parsing failed when loading a grammar.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// A grammar document is structurally invalid: missing required keys,
    /// conflicting `match`/`begin`, a non-integer capture index, etc.
    /// Nothing of the grammar is kept when this is returned.
    #[error("malformed grammar: {0}")]
    GrammarShape(String),

    /// A regex failed to compile, either while loading a grammar or after
    /// backreference substitution into an end pattern at tokenization time.
    #[error("invalid regex '{pattern}': {message}")]
    RegexCompile { pattern: String, message: String },

    /// A grammar was not found in the registry.
    /// Only happens when asking to tokenize with a grammar we can't find;
    /// a missing `include` target is skipped silently instead.
    #[error("grammar '{0}' not found in the registry")]
    GrammarNotFound(String),

    /// A `#key` include could not be resolved through the repository chain.
    #[error("repository key '{0}' not found")]
    UnknownRepositoryKey(String),
}
