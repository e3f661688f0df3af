//! Lexer behavior over a gnarly mixed sample, plus the token-level
//! round-trip property.

use std::io::Cursor;
use std::rc::Rc;

use asteria::lexer::Lexer;
use asteria::token::{Keyword, Punct, Token, TokenData};
use asteria::CompilerOptions;

fn lex(text: &str) -> Vec<Token> {
    let mut cur = Cursor::new(text.as_bytes().to_vec());
    Lexer::new(CompilerOptions::default())
        .tokenize(Rc::from("dummy_file"), 16, &mut cur)
        .expect("lexing should succeed")
}

#[test]
fn mixed_sample_tokenizes_exactly() {
    // A shebang first line, dense punctuators, escapes, comments, and
    // numeric literals with separators.
    let toks = lex(concat!(
        "#!some shebang\n",
        "        hh+++\n",
        "        if <<<&>>>>>\"\\u55b5b喵\"/\n",
        "        * - 0x01`7.8`4p+4  // comments\n",
        "        .false/*more\n",
        "        comments*/;/*yet more*/-42e13\n",
    ));

    let mut it = toks.iter();
    let mut next = || it.next().expect("token expected");

    assert_eq!(next().as_identifier().map(|n| &**n), Some("hh"));
    assert_eq!(next().as_punct(), Some(Punct::Inc));
    assert_eq!(next().as_punct(), Some(Punct::Add));
    assert_eq!(next().as_keyword(), Some(Keyword::If));
    assert_eq!(next().as_punct(), Some(Punct::Sll));
    assert_eq!(next().as_punct(), Some(Punct::Andb));
    assert_eq!(next().as_punct(), Some(Punct::Srl));
    assert_eq!(next().as_punct(), Some(Punct::Sra));
    assert_eq!(
        next().as_string_literal().map(|s| &**s),
        Some("\u{55b5}b喵")
    );
    assert_eq!(next().as_punct(), Some(Punct::Div));
    assert_eq!(next().as_punct(), Some(Punct::Mul));
    assert_eq!(next().as_punct(), Some(Punct::Sub));
    assert_eq!(next().as_real_literal(), Some(376.25));
    assert_eq!(next().as_punct(), Some(Punct::Dot));
    assert_eq!(next().as_keyword(), Some(Keyword::False));
    assert_eq!(next().as_punct(), Some(Punct::Semicol));
    assert_eq!(next().as_integer_literal(), Some(-420000000000000));
    assert!(it.next().is_none());
}

#[test]
fn hex_real_literal_value() {
    let toks = lex("0x1.8p+4");
    assert_eq!(toks[0].as_real_literal(), Some(24.0));
}

#[test]
fn single_quotes_stay_literal_without_the_option() {
    // With `escapable_single_quotes` off, the second literal keeps the
    // backslash sequence verbatim.
    let toks = lex(r#""a" '\u55b5'"#);
    assert_eq!(toks.len(), 2);
    assert_eq!(toks[0].as_string_literal().map(|s| &**s), Some("a"));
    assert_eq!(toks[1].as_string_literal().map(|s| &**s), Some(r"\u55b5"));

    let mut opts = CompilerOptions::default();
    opts.escapable_single_quotes = true;
    let mut cur = Cursor::new(r#""a" '\u55b5'"#.as_bytes().to_vec());
    let toks = Lexer::new(opts)
        .tokenize(Rc::from("t"), 1, &mut cur)
        .unwrap();
    assert_eq!(toks[1].as_string_literal().map(|s| &**s), Some("\u{55b5}"));
}

/// Reprint a token in a canonical textual form.
fn reprint(tok: &Token) -> String {
    match &tok.data {
        TokenData::Keyword(kwrd) => kwrd.as_str().to_string(),
        TokenData::Punct(punct) => punct.as_str().to_string(),
        TokenData::Identifier(name) => name.to_string(),
        TokenData::IntegerLiteral(val) => val.to_string(),
        TokenData::RealLiteral(val) => {
            if val.is_nan() {
                "nan".to_string()
            } else if *val == f64::INFINITY {
                "infinity".to_string()
            } else if *val == f64::NEG_INFINITY {
                "-infinity".to_string()
            } else {
                format!("{:?}", val)
            }
        }
        TokenData::StringLiteral(val) => {
            let mut out = String::from("\"");
            for ch in val.chars() {
                match ch {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\t' => out.push_str("\\t"),
                    '\r' => out.push_str("\\r"),
                    '\0' => out.push_str("\\0"),
                    c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02X}", c as u32)),
                    c => out.push(c),
                }
            }
            out.push('"');
            out
        }
    }
}

#[test]
fn reprinted_tokens_relex_identically() {
    let source = concat!
        ("var a = 1 + 2.5; func f(x) { return x <<< 3; }\n",
         "const s = \"text\\n\"; if(a <=> 2 == 1) { a ??= [1, 2]; }\n",
         "switch(a) { each [0, 9]: break switch; default: ; }\n",
    );
    let first = lex(source);

    let mut reprinted = String::new();
    for tok in &first {
        reprinted.push_str(&reprint(tok));
        reprinted.push(' ');
    }

    let second = lex(&reprinted);
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.data, b.data, "token mismatch after reprint");
    }
}
