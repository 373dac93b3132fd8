mod compiled;
mod raw;
mod regex;

pub use compiled::{
    CaptureTable, DelimKind, DelimRule, Grammar, Include, MatchRule, Pattern, Repository,
    RepositoryEntry,
};
pub use raw::{RawCapture, RawGrammar, RawRule};
pub use regex::{Regex, RegexMatch, escape_regex, has_backreferences, substitute_backreferences};
