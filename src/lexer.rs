use std::io::BufRead;
use std::rc::Rc;

use crate::diagnostic::{CompilerError, CompilerStatus};
use crate::opts::CompilerOptions;
use crate::reader::SourceReader;
use crate::sloc::Sloc;
use crate::token::{lookup_keyword, Keyword, Punct, Token, TokenData, PUNCTUATORS};

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_name_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Whether an infix operator may legally follow the tokens lexed so far.
/// This gate disambiguates unary `+`/`-` prefixes from the signs of
/// numeric literals.
fn may_infix_operators_follow(tokens: &[Token]) -> bool {
    let last = match tokens.last() {
        Some(tok) => tok,
        None => return false,
    };

    if let Some(kwrd) = last.as_keyword() {
        return matches!(
            kwrd,
            Keyword::Null | Keyword::True | Keyword::False | Keyword::This
        );
    }

    if let Some(punct) = last.as_punct() {
        return matches!(
            punct,
            Punct::Inc
                | Punct::Dec
                | Punct::Head
                | Punct::Tail
                | Punct::ParenthCl
                | Punct::BracketCl
                | Punct::BraceCl
        );
    }

    true
}

/// Converts a byte stream into an ordered token list. The parser stores
/// the result reversed so it can shift from the tail.
pub struct Lexer {
    opts: CompilerOptions,
}

impl Lexer {
    pub fn new(opts: CompilerOptions) -> Self {
        Self { opts }
    }

    /// Lex an entire source unit. Tokens are returned in source order.
    pub fn tokenize(
        &self,
        file: Rc<str>,
        start_line: i32,
        input: &mut dyn BufRead,
    ) -> Result<Vec<Token>, CompilerError> {
        let mut tokens = Vec::new();
        let mut reader = SourceReader::new(input, file, start_line);

        // Location of an unterminated block comment, if any.
        let mut bcomm: Option<Sloc> = None;

        while reader.advance()? {
            if reader.line() == start_line {
                if reader.starts_with(b"\xEF\xBB\xBF") {
                    reader.consume(3);
                }
                if reader.starts_with(b"#!") {
                    continue;
                }
            }

            for marker in [b"<<<<<<<", b"|||||||", b"=======", b">>>>>>>"] {
                if reader.starts_with(marker) {
                    return Err(CompilerError::new(
                        CompilerStatus::ConflictMarkerDetected,
                        reader.tell(),
                    ));
                }
            }

            // The whole line must be valid UTF-8 before tokenizing.
            reader.validate_line()?;
            reader.rewind();
            if reader.line() == start_line && reader.starts_with(b"\xEF\xBB\xBF") {
                reader.consume(3);
            }

            while reader.navail() != 0 {
                if bcomm.is_some() {
                    // Search for the terminator of this block comment.
                    match find_subslice(reader.data(), b"*/") {
                        Some(pos) => {
                            bcomm = None;
                            reader.consume(pos + 2);
                            continue;
                        }
                        None => break,
                    }
                }

                let c = reader.peek(0);
                if c.is_ascii_whitespace() {
                    reader.consume(1);
                    continue;
                }

                if c == b'/' {
                    if reader.peek(1) == b'/' {
                        // Line comment: discard the rest of this line.
                        break;
                    }
                    if reader.peek(1) == b'*' {
                        bcomm = Some(reader.tell());
                        reader.consume(2);
                        continue;
                    }
                }

                let found = self.accept_numeric_literal(&mut tokens, &mut reader)?
                    || accept_punctuator(&mut tokens, &mut reader)
                    || self.accept_string_literal(&mut tokens, &mut reader, b'\"', true)?
                    || self.accept_string_literal(
                        &mut tokens,
                        &mut reader,
                        b'\'',
                        self.opts.escapable_single_quotes,
                    )?
                    || self.accept_identifier_or_keyword(&mut tokens, &mut reader)?;
                if !found {
                    return Err(CompilerError::new(
                        CompilerStatus::TokenCharacterUnrecognized,
                        reader.tell(),
                    ));
                }
            }
        }

        // A block comment may straddle multiple lines; report the line of
        // the unmatched `/*`.
        if let Some(op_sloc) = bcomm {
            return Err(CompilerError::with_message(
                CompilerStatus::BlockCommentUnclosed,
                reader.tell(),
                format!("block comment unclosed\n[unmatched `/*` at '{}']", op_sloc),
            ));
        }

        Ok(tokens)
    }

    fn accept_numeric_literal(
        &self,
        tokens: &mut Vec<Token>,
        reader: &mut SourceReader,
    ) -> Result<bool, CompilerError> {
        let mut tlen = 0usize;
        let mut negative = false;
        let mut explicit_sign = false;

        match reader.peek(0) {
            b'+' => {
                tlen += 1;
                explicit_sign = true;
            }
            b'-' => {
                tlen += 1;
                explicit_sign = true;
                negative = true;
            }
            _ => {}
        }

        // A sign in a context where an infix operator is allowed is the
        // operator, not part of a literal.
        if explicit_sign && may_infix_operators_follow(tokens) {
            return Ok(false);
        }

        match reader.peek(tlen) {
            b'n' | b'N' => {
                // `nan` or `NaN`
                let mut run = 0;
                while is_name_continue(reader.peek(tlen + run)) {
                    run += 1;
                }
                if run != 3 {
                    return Ok(false);
                }
                let b0 = reader.peek(tlen);
                if reader.peek(tlen + 1) != b'a' || reader.peek(tlen + 2) != b0 {
                    return Ok(false);
                }
                let val = if negative { -f64::NAN } else { f64::NAN };
                push_token(tokens, reader, tlen + 3, TokenData::RealLiteral(val));
                return Ok(true);
            }

            b'i' | b'I' => {
                // `infinity` or `Infinity`
                let mut run = 0;
                while is_name_continue(reader.peek(tlen + run)) {
                    run += 1;
                }
                if run != 8 {
                    return Ok(false);
                }
                if &reader.data()[tlen + 1..tlen + 8] != b"nfinity" {
                    return Ok(false);
                }
                let val = if negative {
                    f64::NEG_INFINITY
                } else {
                    f64::INFINITY
                };
                push_token(tokens, reader, tlen + 8, TokenData::RealLiteral(val));
                return Ok(true);
            }

            b'0'..=b'9' => {}

            _ => return Ok(false),
        }

        // Radix prefix.
        let mut radix = 10u32;
        if reader.peek(tlen) == b'0' {
            match reader.peek(tlen + 1) | 0x20 {
                b'b' => {
                    radix = 2;
                    tlen += 2;
                }
                b'x' => {
                    radix = 16;
                    tlen += 2;
                }
                _ => {}
            }
        }
        let digit_mask_hex = radix != 10;
        let expch = if digit_mask_hex { b'p' } else { b'e' };

        let mut int_digits = String::new();
        collect_digits(&mut int_digits, &mut tlen, reader, digit_mask_hex);

        // A radix point forces a real literal.
        let mut frac_digits = String::new();
        let mut has_point = false;
        if reader.peek(tlen) == b'.' {
            tlen += 1;
            has_point = true;
            collect_digits(&mut frac_digits, &mut tlen, reader, digit_mask_hex);
        }

        // Exponent: `e` for decimal, `p` for binary and hexadecimal.
        let mut exp_digits = String::new();
        let mut exp_negative = false;
        let mut has_expch = false;
        if reader.peek(tlen) | 0x20 == expch {
            tlen += 1;
            has_expch = true;
            match reader.peek(tlen) {
                b'+' => tlen += 1,
                b'-' => {
                    tlen += 1;
                    exp_negative = true;
                }
                _ => {}
            }
            collect_digits(&mut exp_digits, &mut tlen, reader, false);
        }

        // Anything alphanumeric left over is a bogus suffix.
        let mut suffix = 0usize;
        while reader.peek(tlen + suffix).is_ascii_alphanumeric() || reader.peek(tlen + suffix) == b'`'
        {
            suffix += 1;
        }
        if suffix != 0 || int_digits.is_empty() || (has_expch && exp_digits.is_empty()) {
            return Err(CompilerError::new(
                CompilerStatus::NumericLiteralSuffixInvalid,
                reader.tell(),
            ));
        }
        if radix == 2 {
            // The digit collector is permissive; binary literals must
            // still contain binary digits only.
            for d in int_digits.chars().chain(frac_digits.chars()) {
                if d != '0' && d != '1' {
                    return Err(CompilerError::new(
                        CompilerStatus::NumericLiteralSuffixInvalid,
                        reader.tell(),
                    ));
                }
            }
        }

        let mut exponent: i64 = 0;
        for d in exp_digits.chars() {
            exponent = exponent
                .saturating_mul(10)
                .saturating_add((d as u8 - b'0') as i64);
        }
        if exp_negative {
            exponent = -exponent;
        }

        let data = if !self.opts.integers_as_reals && !has_point {
            TokenData::IntegerLiteral(cast_integer(
                &int_digits,
                radix,
                exponent,
                negative,
                reader.tell(),
            )?)
        } else {
            TokenData::RealLiteral(cast_real(
                &int_digits,
                &frac_digits,
                radix,
                exponent,
                negative,
                reader.tell(),
            )?)
        };
        push_token(tokens, reader, tlen, data);
        Ok(true)
    }

    fn accept_string_literal(
        &self,
        tokens: &mut Vec<Token>,
        reader: &mut SourceReader,
        head: u8,
        escapable: bool,
    ) -> Result<bool, CompilerError> {
        if reader.peek(0) != head {
            return Ok(false);
        }

        let mut tlen = 1usize;
        let mut val = String::new();

        loop {
            let next = reader.peek(tlen);
            if next == 0 {
                return Err(CompilerError::new(
                    CompilerStatus::StringLiteralUnclosed,
                    reader.tell(),
                ));
            }
            tlen += 1;

            if next == head {
                break;
            }
            if !escapable || next != b'\\' {
                // Copy this character as is. The line has already been
                // validated as UTF-8, so raw bytes may pass through.
                val.push(next as char);
                if next >= 0x80 {
                    // Re-take the raw multi-byte sequence verbatim.
                    val.pop();
                    let text = reader.data();
                    let ch_start = tlen - 1;
                    let ch_len = utf8_len(text[ch_start]);
                    let s = std::str::from_utf8(&text[ch_start..ch_start + ch_len])
                        .map_err(|_| {
                            CompilerError::new(CompilerStatus::Utf8SequenceInvalid, reader.tell())
                        })?;
                    val.push_str(s);
                    tlen = ch_start + ch_len;
                }
                continue;
            }

            // Translate the escape sequence.
            let next = reader.peek(tlen);
            if next == 0 {
                return Err(CompilerError::new(
                    CompilerStatus::EscapeSequenceIncomplete,
                    reader.tell(),
                ));
            }
            tlen += 1;

            match next {
                b'\'' | b'\"' | b'\\' | b'?' | b'/' => val.push(next as char),
                b'a' => val.push('\x07'),
                b'b' => val.push('\x08'),
                b'f' => val.push('\x0C'),
                b'n' => val.push('\n'),
                b'r' => val.push('\r'),
                b't' => val.push('\t'),
                b'v' => val.push('\x0B'),
                b'0' => val.push('\0'),
                b'Z' => val.push('\x1A'),
                b'e' => val.push('\x1B'),
                b'x' | b'u' | b'U' => {
                    let xcnt = match next {
                        b'x' => 2usize,
                        b'u' => 4,
                        _ => 6,
                    };
                    let mut cp: u32 = 0;
                    for _ in 0..xcnt {
                        let c = reader.peek(tlen);
                        if c == 0 {
                            return Err(CompilerError::new(
                                CompilerStatus::EscapeSequenceIncomplete,
                                reader.tell(),
                            ));
                        }
                        if !c.is_ascii_hexdigit() {
                            return Err(CompilerError::new(
                                CompilerStatus::EscapeSequenceInvalidHex,
                                reader.tell(),
                            ));
                        }
                        tlen += 1;
                        cp = cp * 16 + (c as char).to_digit(16).unwrap_or(0);
                    }
                    match char::from_u32(cp) {
                        Some(ch) => val.push(ch),
                        None => {
                            return Err(CompilerError::new(
                                CompilerStatus::EscapeUtfCodePointInvalid,
                                reader.tell(),
                            ))
                        }
                    }
                }
                _ => {
                    return Err(CompilerError::new(
                        CompilerStatus::EscapeSequenceUnknown,
                        reader.tell(),
                    ))
                }
            }
        }

        let val = reader.intern(val);
        push_token(tokens, reader, tlen, TokenData::StringLiteral(val));
        Ok(true)
    }

    fn accept_identifier_or_keyword(
        &self,
        tokens: &mut Vec<Token>,
        reader: &mut SourceReader,
    ) -> Result<bool, CompilerError> {
        if !is_name_start(reader.peek(0)) {
            return Ok(false);
        }

        let mut tlen = 0usize;
        while is_name_continue(reader.peek(tlen)) {
            tlen += 1;
        }
        let text = std::str::from_utf8(&reader.data()[..tlen])
            .map_err(|_| CompilerError::new(CompilerStatus::Utf8SequenceInvalid, reader.tell()))?
            .to_string();

        if !self.opts.keywords_as_identifiers {
            if let Some(kwrd) = lookup_keyword(&text) {
                push_token(tokens, reader, tlen, TokenData::Keyword(kwrd));
                return Ok(true);
            }
        }

        let name = reader.intern(text);
        push_token(tokens, reader, tlen, TokenData::Identifier(name));
        Ok(true)
    }
}

fn push_token(tokens: &mut Vec<Token>, reader: &mut SourceReader, tlen: usize, data: TokenData) {
    tokens.push(Token {
        sloc: reader.tell(),
        length: tlen as u32,
        data,
    });
    reader.consume(tlen);
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn utf8_len(b: u8) -> usize {
    match b {
        0xF0..=0xF7 => 4,
        0xE0..=0xEF => 3,
        0xC0..=0xDF => 2,
        _ => 1,
    }
}

/// Collect digits, stripping `` ` `` separators. The hex mask is also
/// used for binary literals; stray digits are rejected afterwards.
fn collect_digits(out: &mut String, tlen: &mut usize, reader: &SourceReader, hex: bool) {
    loop {
        let c = reader.peek(*tlen);
        if c == b'`' {
            *tlen += 1;
            continue;
        }
        let ok = if hex {
            c.is_ascii_hexdigit()
        } else {
            c.is_ascii_digit()
        };
        if !ok {
            break;
        }
        out.push(c as char);
        *tlen += 1;
    }
}

/// Cast an exact numeric literal to an integer. Overflow and inexactness
/// are distinct errors.
fn cast_integer(
    int_digits: &str,
    radix: u32,
    exponent: i64,
    negative: bool,
    sloc: Sloc,
) -> Result<i64, CompilerError> {
    let overflow = |sloc: Sloc| CompilerError::new(CompilerStatus::IntegerLiteralOverflow, sloc);
    let inexact = |sloc: Sloc| CompilerError::new(CompilerStatus::IntegerLiteralInexact, sloc);

    let mut mant: i128 = 0;
    for d in int_digits.chars() {
        let dv = d.to_digit(radix as u32).unwrap_or(0) as i128;
        mant = mant
            .checked_mul(radix as i128)
            .and_then(|m| m.checked_add(dv))
            .ok_or_else(|| overflow(sloc.clone()))?;
    }

    // A decimal exponent scales by ten, a binary one by two.
    let base: i128 = if radix == 10 { 10 } else { 2 };
    if exponent >= 0 {
        for _ in 0..exponent {
            mant = mant
                .checked_mul(base)
                .ok_or_else(|| overflow(sloc.clone()))?;
        }
    } else {
        for _ in 0..(-exponent) {
            if mant % base != 0 {
                return Err(inexact(sloc));
            }
            mant /= base;
        }
    }

    if negative {
        mant = -mant;
    }
    i64::try_from(mant).map_err(|_| overflow(sloc))
}

/// Cast a numeric literal to a real. Overflow and underflow are distinct
/// errors.
fn cast_real(
    int_digits: &str,
    frac_digits: &str,
    radix: u32,
    exponent: i64,
    negative: bool,
    sloc: Sloc,
) -> Result<f64, CompilerError> {
    let mag = if radix == 10 {
        // Let the standard library perform the correctly-rounded decimal
        // conversion.
        let text = format!(
            "{}.{}e{}",
            if int_digits.is_empty() { "0" } else { int_digits },
            if frac_digits.is_empty() { "0" } else { frac_digits },
            exponent.clamp(-100000, 100000)
        );
        text.parse::<f64>().unwrap_or(f64::NAN)
    } else {
        // Binary and hexadecimal literals scale by powers of two, which
        // is exact, so only the mantissa conversion rounds.
        let bits_per_digit: i64 = if radix == 16 { 4 } else { 1 };
        let mut mant_f = 0.0f64;
        for d in int_digits.chars().chain(frac_digits.chars()) {
            mant_f = mant_f * radix as f64 + d.to_digit(radix).unwrap_or(0) as f64;
        }
        let scale = exponent - bits_per_digit * frac_digits.len() as i64;
        mant_f * 2.0f64.powi(scale.clamp(-4096, 4096) as i32)
    };

    let has_digits = int_digits
        .chars()
        .chain(frac_digits.chars())
        .any(|d| d != '0');
    if mag.is_infinite() {
        return Err(CompilerError::new(CompilerStatus::RealLiteralOverflow, sloc));
    }
    if mag == 0.0 && has_digits {
        return Err(CompilerError::new(
            CompilerStatus::RealLiteralUnderflow,
            sloc,
        ));
    }
    Ok(if negative { -mag } else { mag })
}

fn accept_punctuator(tokens: &mut Vec<Token>, reader: &mut SourceReader) -> bool {
    let first = reader.peek(0);
    // The table is sorted, so scanning candidates backwards tries the
    // longest spelling first.
    let lo = PUNCTUATORS.partition_point(|(s, _)| s.as_bytes()[0] < first);
    let hi = PUNCTUATORS.partition_point(|(s, _)| s.as_bytes()[0] <= first);
    for &(text, punct) in PUNCTUATORS[lo..hi].iter().rev() {
        if reader.starts_with(text.as_bytes()) {
            push_token(tokens, reader, text.len(), TokenData::Punct(punct));
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn lex(text: &str) -> Vec<Token> {
        let mut cur = Cursor::new(text.as_bytes().to_vec());
        Lexer::new(CompilerOptions::default())
            .tokenize(Rc::from("test"), 1, &mut cur)
            .expect("lexing should succeed")
    }

    fn lex_err(text: &str) -> CompilerError {
        let mut cur = Cursor::new(text.as_bytes().to_vec());
        Lexer::new(CompilerOptions::default())
            .tokenize(Rc::from("test"), 1, &mut cur)
            .expect_err("lexing should fail")
    }

    #[test]
    fn test_hex_real_literal() {
        let toks = lex("0x1.8p+4");
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].as_real_literal(), Some(24.0));
    }

    #[test]
    fn test_decimal_exponent_integer() {
        let toks = lex("-42e13");
        assert_eq!(toks[0].as_integer_literal(), Some(-420000000000000));
    }

    #[test]
    fn test_digit_separators() {
        let toks = lex("1`000`000");
        assert_eq!(toks[0].as_integer_literal(), Some(1000000));
    }

    #[test]
    fn test_negative_exponent_inexact() {
        let err = lex_err("7e-1");
        assert_eq!(err.status, CompilerStatus::IntegerLiteralInexact);
        let toks = lex("40e-1");
        assert_eq!(toks[0].as_integer_literal(), Some(4));
    }

    #[test]
    fn test_integer_overflow() {
        let err = lex_err("9223372036854775808");
        assert_eq!(err.status, CompilerStatus::IntegerLiteralOverflow);
        let toks = lex("-9223372036854775808");
        assert_eq!(toks[0].as_integer_literal(), Some(i64::MIN));
    }

    #[test]
    fn test_nan_and_infinity() {
        let toks = lex("nan");
        assert!(toks[0].as_real_literal().unwrap().is_nan());
        let toks = lex("-infinity");
        assert_eq!(toks[0].as_real_literal(), Some(f64::NEG_INFINITY));
        // `Nan` is a plain identifier.
        let toks = lex("Nan");
        assert!(toks[0].as_identifier().is_some());
    }

    #[test]
    fn test_sign_is_infix_after_value() {
        let toks = lex("a-1");
        assert_eq!(toks.len(), 3);
        assert_eq!(toks[1].as_punct(), Some(Punct::Sub));
        // ...but a sign at the start of an expression belongs to the
        // literal.
        let toks = lex(";-1");
        assert_eq!(toks.len(), 2);
        assert_eq!(toks[1].as_integer_literal(), Some(-1));
    }

    #[test]
    fn test_longest_punctuator_match() {
        let toks = lex("<<<&>>>>>");
        let puncts: Vec<_> = toks.iter().filter_map(|t| t.as_punct()).collect();
        assert_eq!(
            puncts,
            vec![Punct::Sll, Punct::Andb, Punct::Srl, Punct::Sra]
        );
    }

    #[test]
    fn test_string_escapes() {
        let toks = lex(r#""喵b\n""#);
        assert_eq!(&**toks[0].as_string_literal().unwrap(), "喵b\n");
    }

    #[test]
    fn test_single_quotes_literal_by_default() {
        let toks = lex(r"'喵'");
        assert_eq!(&**toks[0].as_string_literal().unwrap(), r"喵");

        let mut opts = CompilerOptions::default();
        opts.escapable_single_quotes = true;
        let mut cur = Cursor::new(r"'喵'".as_bytes().to_vec());
        let toks = Lexer::new(opts)
            .tokenize(Rc::from("test"), 1, &mut cur)
            .unwrap();
        assert_eq!(&**toks[0].as_string_literal().unwrap(), "喵");
    }

    #[test]
    fn test_adjacent_strings_stay_separate() {
        let toks = lex(r#""a" '喵'"#);
        assert_eq!(toks.len(), 2);
        assert!(toks[0].as_string_literal().is_some());
        assert!(toks[1].as_string_literal().is_some());
    }

    #[test]
    fn test_unclosed_string() {
        let err = lex_err("\"abc");
        assert_eq!(err.status, CompilerStatus::StringLiteralUnclosed);
    }

    #[test]
    fn test_comments() {
        let toks = lex("1 // one\n/* two\nlines */ 2");
        assert_eq!(toks.len(), 2);
        assert_eq!(toks[1].as_integer_literal(), Some(2));
    }

    #[test]
    fn test_unclosed_block_comment_reports_opening() {
        let err = lex_err("1 /* never\nclosed");
        assert_eq!(err.status, CompilerStatus::BlockCommentUnclosed);
        assert!(err.message.contains("1:3"));
    }

    #[test]
    fn test_conflict_marker() {
        let err = lex_err("a\n<<<<<<< theirs\nb");
        assert_eq!(err.status, CompilerStatus::ConflictMarkerDetected);
    }

    #[test]
    fn test_shebang_and_bom() {
        let toks = lex("#!/usr/bin/env asteria\n42");
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].as_integer_literal(), Some(42));

        let mut cur = Cursor::new(b"\xEF\xBB\xBF7".to_vec());
        let toks = Lexer::new(CompilerOptions::default())
            .tokenize(Rc::from("t"), 1, &mut cur)
            .unwrap();
        assert_eq!(toks[0].as_integer_literal(), Some(7));
    }

    #[test]
    fn test_keywords_as_identifiers_option() {
        let mut opts = CompilerOptions::default();
        opts.keywords_as_identifiers = true;
        let mut cur = Cursor::new(b"while".to_vec());
        let toks = Lexer::new(opts)
            .tokenize(Rc::from("t"), 1, &mut cur)
            .unwrap();
        assert!(toks[0].as_identifier().is_some());
    }

    #[test]
    fn test_integers_as_reals_option() {
        let mut opts = CompilerOptions::default();
        opts.integers_as_reals = true;
        let mut cur = Cursor::new(b"42".to_vec());
        let toks = Lexer::new(opts)
            .tokenize(Rc::from("t"), 1, &mut cur)
            .unwrap();
        assert_eq!(toks[0].as_real_literal(), Some(42.0));
    }

    #[test]
    fn test_numeric_suffix_rejected() {
        let err = lex_err("123abc");
        assert_eq!(err.status, CompilerStatus::NumericLiteralSuffixInvalid);
    }

    #[test]
    fn test_token_positions() {
        let toks = lex("a\n  b");
        assert_eq!(toks[0].sloc.line, 1);
        assert_eq!(toks[0].sloc.column, 1);
        assert_eq!(toks[1].sloc.line, 2);
        assert_eq!(toks[1].sloc.column, 3);
    }
}
