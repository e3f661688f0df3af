//! An interpreter for the Asteria scripting language: a compiler front
//! end (lexer, parser, AIR lowering) plus the stack-based virtual
//! machine that executes its intermediate representation.

pub mod air;
pub mod ast;
pub mod diagnostic;
pub mod lexer;
pub mod opts;
pub mod parser;
pub mod reader;
pub mod runtime;
pub mod script;
pub mod sloc;
pub mod token;
pub mod token_queue;
pub mod value;

// Re-export the embedding surface.
pub use diagnostic::{CompilerError, CompilerStatus};
pub use opts::CompilerOptions;
pub use runtime::error::RuntimeError;
pub use script::{ScriptError, SimpleScript};
pub use sloc::Sloc;
pub use value::Value;

use std::rc::Rc;

use ast::Statement;
use lexer::Lexer;
use parser::Parser;
use token_queue::TokenQueue;

/// Lex and parse a source string into a statement sequence, with the
/// implicit trailing `return;` appended.
pub fn parse_source(
    source: &str,
    filename: &str,
    opts: CompilerOptions,
) -> Result<Vec<Statement>, CompilerError> {
    let mut cursor = std::io::Cursor::new(source.as_bytes().to_vec());
    let tokens = Lexer::new(opts).tokenize(Rc::from(filename), 1, &mut cursor)?;
    let mut tq = TokenQueue::new(tokens);
    Parser::new(&mut tq).parse_document()
}
