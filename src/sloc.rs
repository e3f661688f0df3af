use std::fmt;
use std::rc::Rc;

/// A source location: file name plus 1-based line and column.
///
/// Copied into every token, AST node, AIR node and runtime frame, so the
/// file name is a shared `Rc<str>` rather than an owned string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sloc {
    pub file: Rc<str>,
    pub line: i32,
    pub column: i32,
}

impl Sloc {
    pub fn new(file: Rc<str>, line: i32, column: i32) -> Self {
        Self { file, line, column }
    }

    /// The sentinel location used when a token queue has been drained.
    pub fn end_of_stream() -> Self {
        Self {
            file: Rc::from("[end]"),
            line: -1,
            column: -1,
        }
    }

    pub fn dummy() -> Self {
        Self {
            file: Rc::from(""),
            line: 0,
            column: 0,
        }
    }
}

impl Default for Sloc {
    fn default() -> Self {
        Sloc::dummy()
    }
}

impl fmt::Display for Sloc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let sloc = Sloc::new(Rc::from("demo.ast"), 3, 17);
        assert_eq!(sloc.to_string(), "demo.ast:3:17");
    }

    #[test]
    fn test_end_sentinel() {
        let sloc = Sloc::end_of_stream();
        assert_eq!(&*sloc.file, "[end]");
        assert_eq!(sloc.line, -1);
        assert_eq!(sloc.column, -1);
    }
}
