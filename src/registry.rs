use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, TintaResult};
use crate::grammars::Grammar;
use crate::tokenizer::{Token, Tokenizer};

/// Grammars indexed by their root scope name (`source.js`,
/// `text.html.markdown`, ...).
///
/// Cross-grammar includes are resolved against this map: an `include` whose
/// value is a scope name looks the target grammar up here. Grammars are
/// immutable and handed out as `Arc`s, so a registry can be shared across
/// threads once loading is done; loading itself takes `&mut self` and is the
/// caller's to synchronise.
#[derive(Debug, Default)]
pub struct Registry {
    grammars: HashMap<String, Arc<Grammar>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a compiled grammar under its root scope name, replacing any
    /// previous grammar with the same name.
    pub fn add_grammar(&mut self, grammar: Grammar) -> Arc<Grammar> {
        let grammar = Arc::new(grammar);
        self.grammars
            .insert(grammar.scope_name.clone(), Arc::clone(&grammar));
        grammar
    }

    /// Parses, compiles and registers a JSON grammar document.
    pub fn add_grammar_from_str(&mut self, content: &str) -> TintaResult<Arc<Grammar>> {
        Ok(self.add_grammar(Grammar::load_from_str(content)?))
    }

    /// Reads the file and adds it as a grammar.
    pub fn add_grammar_from_path<P: AsRef<Path>>(&mut self, path: P) -> TintaResult<Arc<Grammar>> {
        Ok(self.add_grammar(Grammar::load_from_file(path)?))
    }

    pub fn grammar(&self, scope_name: &str) -> Option<&Arc<Grammar>> {
        self.grammars.get(scope_name)
    }

    pub fn contains_grammar(&self, scope_name: &str) -> bool {
        self.grammars.contains_key(scope_name)
    }

    /// Tokenizes a whole text with the named grammar, one token vector per
    /// line. Fails with [`Error::GrammarNotFound`] for unknown scope names.
    pub fn tokenize(&self, scope_name: &str, text: &str) -> TintaResult<Vec<Vec<Token>>> {
        let grammar = self
            .grammar(scope_name)
            .ok_or_else(|| Error::GrammarNotFound(scope_name.to_string()))?;
        Tokenizer::new(Arc::clone(grammar), self).tokenize_block(text)
    }
}
