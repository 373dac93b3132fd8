//! The seam towards output assembly. The tokenizer stops at scope-annotated
//! spans; turning those into HTML, ANSI colors, or anything else is a
//! renderer's job, downstream of this crate.

use crate::scope::Scope;
use crate::tokenizer::Token;

pub trait Renderer {
    /// Called once per token, in line order, with the token's scopes
    /// (outermost first) and the text it covers.
    fn create_span(&mut self, scopes: &[Scope], text: &str);
}

/// Feeds one line's tokens through a renderer.
pub fn render_line<R: Renderer>(renderer: &mut R, line: &str, tokens: &[Token]) {
    for token in tokens {
        renderer.create_span(&token.scopes, &line[token.span.clone()]);
    }
}
