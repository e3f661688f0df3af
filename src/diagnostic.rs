use std::fmt;

use crate::sloc::Sloc;

/// Status codes for errors raised by the lexer, the parser and IR
/// lowering. The set is closed; every user-visible compile failure maps
/// onto exactly one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompilerStatus {
    Utf8SequenceInvalid,
    NullCharacterDisallowed,
    ConflictMarkerDetected,
    TokenCharacterUnrecognized,
    StringLiteralUnclosed,
    EscapeSequenceUnknown,
    EscapeSequenceIncomplete,
    EscapeSequenceInvalidHex,
    EscapeUtfCodePointInvalid,
    NumericLiteralSuffixInvalid,
    IntegerLiteralOverflow,
    IntegerLiteralInexact,
    RealLiteralOverflow,
    RealLiteralUnderflow,
    BlockCommentUnclosed,
    IdentifierExpected,
    SemicolonExpected,
    StringLiteralExpected,
    StatementExpected,
    EqualsSignExpected,
    ExpressionExpected,
    OpenBraceExpected,
    ClosingBraceOrStatementExpected,
    OpenParenthesisExpected,
    ClosingParenthesisOrCommaExpected,
    ClosingParenthesisExpected,
    ClosingBracketOrCommaExpected,
    ClosingBracketExpected,
    ColonExpected,
    ClosingBraceOrSwitchClauseExpected,
    KeywordWhileExpected,
    KeywordCatchExpected,
    CommaExpected,
    ForStatementInitializerExpected,
    DuplicateNameInStructuredBinding,
    DuplicateNameInParameterList,
    ClosingParenthesisOrArgumentExpected,
    ClosingParenthesisOrParameterExpected,
    ClosingBracketOrExpressionExpected,
    ClosingBraceOrCommaExpected,
    ClosingBraceOrJson5KeyExpected,
    ArrowExpected,
    ClosingBracketOrIdentifierExpected,
    ClosingBraceOrIdentifierExpected,
    OpenBraceOrInitializerExpected,
    EqualsSignOrColonExpected,
    NondeclarativeStatementExpected,
    BreakNoMatchingScope,
    ContinueNoMatchingScope,
    MultipleDefault,
    DuplicateKeyInObject,
    IntervalExpected,
    IntervalClosureExpected,
    ArgumentExpected,
    InvalidExpression,
    UndeclaredIdentifier,
    KeywordNotDeclarable,
    ReservedIdentifierNotDeclarable,
    TooManyElements,
    TooManyNestedLevels,
}

impl CompilerStatus {
    /// A short description, used when no custom message is supplied.
    pub fn describe(self) -> &'static str {
        use CompilerStatus::*;
        match self {
            Utf8SequenceInvalid => "invalid UTF-8 sequence",
            NullCharacterDisallowed => "null character disallowed in source data",
            ConflictMarkerDetected => "merge conflict marker detected",
            TokenCharacterUnrecognized => "character not recognized",
            StringLiteralUnclosed => "string literal unclosed",
            EscapeSequenceUnknown => "escape sequence not recognized",
            EscapeSequenceIncomplete => "escape sequence incomplete",
            EscapeSequenceInvalidHex => "invalid hexadecimal digit in escape sequence",
            EscapeUtfCodePointInvalid => "UTF code point value invalid",
            NumericLiteralSuffixInvalid => "numeric literal suffix invalid",
            IntegerLiteralOverflow => "integer literal too large",
            IntegerLiteralInexact => "integer literal not representable exactly",
            RealLiteralOverflow => "real literal too large",
            RealLiteralUnderflow => "real literal truncated to zero",
            BlockCommentUnclosed => "block comment unclosed",
            IdentifierExpected => "identifier expected",
            SemicolonExpected => "`;` expected",
            StringLiteralExpected => "string literal expected",
            StatementExpected => "statement expected",
            EqualsSignExpected => "`=` expected",
            ExpressionExpected => "expression expected",
            OpenBraceExpected => "`{` expected",
            ClosingBraceOrStatementExpected => "`}` or statement expected",
            OpenParenthesisExpected => "`(` expected",
            ClosingParenthesisOrCommaExpected => "`)` or `,` expected",
            ClosingParenthesisExpected => "`)` expected",
            ClosingBracketOrCommaExpected => "`]` or `,` expected",
            ClosingBracketExpected => "`]` expected",
            ColonExpected => "`:` expected",
            ClosingBraceOrSwitchClauseExpected => "`}`, `case`, `default` or `each` expected",
            KeywordWhileExpected => "`while` expected",
            KeywordCatchExpected => "`catch` expected",
            CommaExpected => "`,` expected",
            ForStatementInitializerExpected => "initializer expected",
            DuplicateNameInStructuredBinding => "duplicate name in structured binding",
            DuplicateNameInParameterList => "duplicate name in parameter list",
            ClosingParenthesisOrArgumentExpected => "`)` or argument expected",
            ClosingParenthesisOrParameterExpected => "`)` or parameter expected",
            ClosingBracketOrExpressionExpected => "`]` or expression expected",
            ClosingBraceOrCommaExpected => "`}` or `,` expected",
            ClosingBraceOrJson5KeyExpected => "`}` or key expected",
            ArrowExpected => "`->` expected",
            ClosingBracketOrIdentifierExpected => "`]` or identifier expected",
            ClosingBraceOrIdentifierExpected => "`}` or identifier expected",
            OpenBraceOrInitializerExpected => "`{`, `=` or `->` expected",
            EqualsSignOrColonExpected => "`=` or `:` expected",
            NondeclarativeStatementExpected => "non-declarative statement expected",
            BreakNoMatchingScope => "no matching scope for `break`",
            ContinueNoMatchingScope => "no matching scope for `continue`",
            MultipleDefault => "multiple `default` clauses not allowed",
            DuplicateKeyInObject => "duplicate key in object",
            IntervalExpected => "`[` or `(` expected",
            IntervalClosureExpected => "`]` or `)` expected",
            ArgumentExpected => "argument expected",
            InvalidExpression => "expression invalid",
            UndeclaredIdentifier => "undeclared identifier",
            KeywordNotDeclarable => "keyword not user-declarable",
            ReservedIdentifierNotDeclarable => "reserved identifier not user-declarable",
            TooManyElements => "too many elements",
            TooManyNestedLevels => "too many nested levels",
        }
    }
}

/// An error raised by the compiler front end. Carries a status code, the
/// location of the failure, and a message that may quote the location of
/// an unmatched opening delimiter.
#[derive(Clone, Debug)]
pub struct CompilerError {
    pub status: CompilerStatus,
    pub sloc: Sloc,
    pub message: String,
}

impl CompilerError {
    pub fn new(status: CompilerStatus, sloc: Sloc) -> Self {
        Self {
            status,
            sloc,
            message: status.describe().to_string(),
        }
    }

    pub fn with_message(status: CompilerStatus, sloc: Sloc, message: String) -> Self {
        Self {
            status,
            sloc,
            message,
        }
    }

    /// Annotate with the location of an unmatched opening delimiter.
    pub fn with_unmatched(status: CompilerStatus, sloc: Sloc, open: &str, op_sloc: &Sloc) -> Self {
        Self {
            status,
            sloc,
            message: format!(
                "{}\n[unmatched `{}` at '{}']",
                status.describe(),
                open,
                op_sloc
            ),
        }
    }

    /// Render the error to stderr using ariadne. `source` must be the
    /// full text of the file named by `self.sloc`.
    pub fn render(&self, filename: &str, source: &str) {
        use ariadne::{Color, Label, Report, ReportKind, Source};

        let offset = byte_offset_of(source, self.sloc.line, self.sloc.column);

        let report = Report::build(ReportKind::Error, filename, offset)
            .with_message(&self.message)
            .with_label(
                Label::new((filename, offset..offset.saturating_add(1)))
                    .with_message(self.status.describe())
                    .with_color(Color::Red),
            );

        let _ = report.finish().eprint((filename, Source::from(source)));
    }
}

impl fmt::Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.sloc, self.message)
    }
}

impl std::error::Error for CompilerError {}

/// Translate a 1-based line/column pair into a byte offset.
fn byte_offset_of(source: &str, line: i32, column: i32) -> usize {
    let mut offset = 0usize;
    let mut cur_line = 1i32;
    for text_line in source.split_inclusive('\n') {
        if cur_line == line {
            let col = (column.max(1) as usize).saturating_sub(1);
            return offset + col.min(text_line.len());
        }
        offset += text_line.len();
        cur_line += 1;
    }
    offset
}

/// Render a list of compiler errors.
pub fn render_errors(errors: &[CompilerError], filename: &str, source: &str) {
    for err in errors {
        err.render(filename, source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_error_construction() {
        let sloc = Sloc::new(Rc::from("a.ast"), 4, 9);
        let err = CompilerError::new(CompilerStatus::SemicolonExpected, sloc);
        assert_eq!(err.status, CompilerStatus::SemicolonExpected);
        assert_eq!(err.message, "`;` expected");
        assert_eq!(err.sloc.line, 4);
    }

    #[test]
    fn test_unmatched_message_quotes_opening_location() {
        let sloc = Sloc::new(Rc::from("a.ast"), 9, 1);
        let op = Sloc::new(Rc::from("a.ast"), 2, 5);
        let err = CompilerError::with_unmatched(
            CompilerStatus::ClosingParenthesisExpected,
            sloc,
            "(",
            &op,
        );
        assert!(err.message.contains("a.ast:2:5"));
        assert!(err.message.contains("unmatched `(`"));
    }

    #[test]
    fn test_byte_offset() {
        let src = "ab\ncdef\ng";
        assert_eq!(byte_offset_of(src, 1, 1), 0);
        assert_eq!(byte_offset_of(src, 2, 3), 5);
        assert_eq!(byte_offset_of(src, 3, 1), 8);
    }
}
