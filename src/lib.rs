mod error;
pub mod grammars;
mod registry;
mod renderer;
mod scope;
pub mod tokenizer;

pub use error::Error;
pub use grammars::{Grammar, RawGrammar};
pub use registry::Registry;
pub use renderer::{Renderer, render_line};
pub use scope::Scope;
pub use tokenizer::{StateStack, Token, Tokenizer};
