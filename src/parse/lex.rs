//! Tokenizing assembly source.
//!
//! This module holds [`Token`], the unit the parser consumes. The token
//! set is ISA-agnostic: mnemonics and labels both lex as identifiers, and
//! whether an identifier names an instruction is decided later, against
//! the loaded ISA table.
//!
//! Statements are line-delimited, so newlines are significant and lex as
//! [`Token::NewLine`].

use std::num::IntErrorKind;

use logos::{Lexer, Logos};

/// A unit of information in assembly source code.
#[derive(Debug, Logos, PartialEq, Eq, Clone)]
#[logos(skip r"[ \t]+", error = LexErr)]
pub enum Token {
    // These regexes deliberately span over tokens that are invalid
    // (e.g. `23trst` matches the decimal regex). The validator function
    // rejects them, so the whole unit is reported rather than its prefix.

    /// A numeric literal: decimal (`20`, `-7`), hexadecimal (`0x7F`),
    /// or binary (`0b0101`).
    #[regex(r"\d\w*", lex_dec)]
    #[regex(r"-\d\w*", lex_dec)]
    #[regex(r"0[xX]\w*", lex_hex, priority = 10)]
    #[regex(r"-0[xX]\w*", lex_hex, priority = 10)]
    #[regex(r"0[bB]\w*", lex_bin, priority = 10)]
    #[regex(r"-0[bB]\w*", lex_bin, priority = 10)]
    Number(i64),

    /// A register reference (`R0`, `r13`).
    ///
    /// How many registers exist is the ISA's business; the lexer only
    /// recognizes the `R<n>` shape.
    #[regex(r"[Rr]\d+", lex_reg)]
    Reg(u8),

    /// An identifier: a mnemonic or a label, decided by position and
    /// by the ISA table during encoding.
    #[regex(r"[A-Za-z_]\w*", |lx| lx.slice().to_string())]
    Ident(String),

    /// A directive (`.org`, `.byte`, `.word`), without the leading dot.
    #[regex(r"\.[A-Za-z_]\w*", |lx| lx.slice()[1..].to_string())]
    Directive(String),

    /// A string literal (e.g. `"Hello!"`).
    #[token(r#"""#, lex_str_literal)]
    String(String),

    /// A colon, which terminates a label definition.
    #[token(":")]
    Colon,

    /// A comma, which delineates operands and data values.
    #[token(",")]
    Comma,

    /// An opening bracket, which starts a memory reference.
    #[token("[")]
    LBrack,

    /// A closing bracket, which ends a memory reference.
    #[token("]")]
    RBrack,

    /// A comment, from a semicolon to the end of the line.
    #[regex(r";[^\n]*")]
    Comment,

    /// A new line.
    #[regex(r"\r?\n")]
    NewLine,
}

/// Any errors raised in attempting to tokenize an input stream.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum LexErr {
    /// Numeric literal does not fit the 64-bit backing.
    DoesNotFit,
    /// Numeric literal has digits invalid for its base.
    InvalidDigit,
    /// Numeric literal has a base prefix but no digits (`0x`, `0b`).
    EmptyNumber,
    /// Token had the shape `R<n>` but `<n>` is not a register number.
    InvalidRegister,
    /// String literal is missing its closing quote.
    UnclosedString,
    /// A character was used which no token recognizes.
    #[default]
    InvalidCharacter,
}
impl std::fmt::Display for LexErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LexErr::DoesNotFit       => f.write_str("numeric literal does not fit a 64-bit integer"),
            LexErr::InvalidDigit     => f.write_str("invalid digit in numeric literal"),
            LexErr::EmptyNumber      => f.write_str("numeric literal has no digits"),
            LexErr::InvalidRegister  => f.write_str("invalid register"),
            LexErr::UnclosedString   => f.write_str("unclosed string literal"),
            LexErr::InvalidCharacter => f.write_str("unrecognized character"),
        }
    }
}
impl std::error::Error for LexErr {}
impl crate::err::Error for LexErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            LexErr::DoesNotFit       => Some(format!("literals must fit in [{}, {}]", i64::MIN, i64::MAX).into()),
            LexErr::InvalidDigit     => Some("decimal uses 0-9, hex 0-9/A-F after 0x, binary 0/1 after 0b".into()),
            LexErr::EmptyNumber      => Some("there should be digits after the base prefix".into()),
            LexErr::InvalidRegister  => Some("register numbers must fit in a byte".into()),
            LexErr::UnclosedString   => Some("add a quote to the end of the string literal".into()),
            LexErr::InvalidCharacter => Some("this character does not occur in any token".into()),
        }
    }
}

/// Converts an int parse failure to the corresponding LexErr.
fn convert_int_error(e: &IntErrorKind) -> LexErr {
    match e {
        IntErrorKind::Empty => LexErr::EmptyNumber,
        IntErrorKind::InvalidDigit => LexErr::InvalidDigit,
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => LexErr::DoesNotFit,
        _ => LexErr::InvalidDigit,
    }
}

fn lex_dec(lx: &Lexer<'_, Token>) -> Result<i64, LexErr> {
    lx.slice()
        .parse::<i64>()
        .map_err(|e| convert_int_error(e.kind()))
}

/// Parses a prefixed literal (`0x...`, `-0b...`) in the given base.
fn lex_radix(slice: &str, base: u32) -> Result<i64, LexErr> {
    let (neg, body) = match slice.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, slice),
    };
    // Skip the two-character base prefix; the regex guarantees it.
    let digits = &body[2..];

    let magnitude = u64::from_str_radix(digits, base).map_err(|e| convert_int_error(e.kind()))?;
    let value = match neg {
        true => -i128::from(magnitude),
        false => i128::from(magnitude),
    };
    i64::try_from(value).map_err(|_| LexErr::DoesNotFit)
}

fn lex_hex(lx: &Lexer<'_, Token>) -> Result<i64, LexErr> {
    lex_radix(lx.slice(), 16)
}
fn lex_bin(lx: &Lexer<'_, Token>) -> Result<i64, LexErr> {
    lex_radix(lx.slice(), 2)
}
fn lex_reg(lx: &Lexer<'_, Token>) -> Result<u8, LexErr> {
    lx.slice()[1..].parse::<u8>().map_err(|_| LexErr::InvalidRegister)
}

fn lex_str_literal(lx: &mut Lexer<'_, Token>) -> Result<String, LexErr> {
    let rem = lx.remainder().lines().next().unwrap_or("");

    // Find the closing quote on this line and consume up to and
    // including it. A quote is escaped only when preceded by an odd
    // run of backslashes (`\"` is escaped, `\\"` is not).
    let mlen = rem
        .match_indices('"')
        .map(|(n, _)| n)
        .find(|&n| rem[..n].bytes().rev().take_while(|&b| b == b'\\').count() % 2 == 0);

    match mlen {
        Some(len) => lx.bump(len + 1),
        None => {
            lx.bump(rem.len());
            return Err(LexErr::UnclosedString);
        }
    }

    // The text inside the quotes:
    let mut remaining = &lx.slice()[1..(lx.slice().len() - 1)];
    let mut buf = String::with_capacity(remaining.len());

    // Only a simple group of escapes is implemented.
    while let Some((left, right)) = remaining.split_once('\\') {
        buf.push_str(left);

        let esc = right
            .as_bytes()
            .first()
            .unwrap_or_else(|| unreachable!("expected character after escape"));
        match esc {
            b'n'  => buf.push('\n'),
            b'r'  => buf.push('\r'),
            b't'  => buf.push('\t'),
            b'\\' => buf.push('\\'),
            b'0'  => buf.push('\0'),
            b'"'  => buf.push('\"'),
            &c => {
                buf.push('\\');
                buf.push(char::from(c));
            }
        }

        remaining = &right[1..];
    }
    buf.push_str(remaining);

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use logos::Logos;

    use super::{LexErr, Token};

    fn ident(s: &str) -> Token {
        Token::Ident(s.to_string())
    }
    fn directive(s: &str) -> Token {
        Token::Directive(s.to_string())
    }
    fn str_literal(s: &str) -> Token {
        Token::String(s.to_string())
    }

    #[test]
    fn test_numeric_dec() {
        let mut tokens = Token::lexer("0 123 456 -789");
        assert_eq!(tokens.next(), Some(Ok(Token::Number(0))));
        assert_eq!(tokens.next(), Some(Ok(Token::Number(123))));
        assert_eq!(tokens.next(), Some(Ok(Token::Number(456))));
        assert_eq!(tokens.next(), Some(Ok(Token::Number(-789))));
        assert_eq!(tokens.next(), None);

        assert_eq!(Token::lexer("3Q").next(), Some(Err(LexErr::InvalidDigit)));
        assert_eq!(
            Token::lexer("99999999999999999999").next(),
            Some(Err(LexErr::DoesNotFit))
        );
    }

    #[test]
    fn test_numeric_hex() {
        let mut tokens = Token::lexer("0x0 0x7F 0XABCD -0x10");
        assert_eq!(tokens.next(), Some(Ok(Token::Number(0x0))));
        assert_eq!(tokens.next(), Some(Ok(Token::Number(0x7F))));
        assert_eq!(tokens.next(), Some(Ok(Token::Number(0xABCD))));
        assert_eq!(tokens.next(), Some(Ok(Token::Number(-0x10))));
        assert_eq!(tokens.next(), None);

        assert_eq!(Token::lexer("0x").next(), Some(Err(LexErr::EmptyNumber)));
        assert_eq!(Token::lexer("0xG1").next(), Some(Err(LexErr::InvalidDigit)));
    }

    #[test]
    fn test_numeric_bin() {
        let mut tokens = Token::lexer("0b0 0b0101 -0b11");
        assert_eq!(tokens.next(), Some(Ok(Token::Number(0b0))));
        assert_eq!(tokens.next(), Some(Ok(Token::Number(0b0101))));
        assert_eq!(tokens.next(), Some(Ok(Token::Number(-0b11))));
        assert_eq!(tokens.next(), None);

        assert_eq!(Token::lexer("0b").next(), Some(Err(LexErr::EmptyNumber)));
        assert_eq!(Token::lexer("0b2").next(), Some(Err(LexErr::InvalidDigit)));
    }

    #[test]
    fn test_regs() {
        let mut tokens = Token::lexer("R0 r1 R15 R255");
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(0))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(1))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(15))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(255))));
        assert_eq!(tokens.next(), None);

        assert_eq!(Token::lexer("R256").next(), Some(Err(LexErr::InvalidRegister)));

        // `R2D2` is an identifier, not a register.
        assert_eq!(Token::lexer("R2D2").next(), Some(Ok(ident("R2D2"))));
    }

    #[test]
    fn test_idents() {
        let mut tokens = Token::lexer("ADD loop _tmp R");
        assert_eq!(tokens.next(), Some(Ok(ident("ADD"))));
        assert_eq!(tokens.next(), Some(Ok(ident("loop"))));
        assert_eq!(tokens.next(), Some(Ok(ident("_tmp"))));
        assert_eq!(tokens.next(), Some(Ok(ident("R"))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_directives() {
        let mut tokens = Token::lexer(".org .byte .word ._x");
        assert_eq!(tokens.next(), Some(Ok(directive("org"))));
        assert_eq!(tokens.next(), Some(Ok(directive("byte"))));
        assert_eq!(tokens.next(), Some(Ok(directive("word"))));
        assert_eq!(tokens.next(), Some(Ok(directive("_x"))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_str() {
        let mut tokens = Token::lexer(r#" "abc" "" "a\nb\"c" "#);
        assert_eq!(tokens.next(), Some(Ok(str_literal("abc"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal(""))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("a\nb\"c"))));
        assert_eq!(tokens.next(), None);

        assert_eq!(Token::lexer(r#""oops"#).next(), Some(Err(LexErr::UnclosedString)));
    }

    #[test]
    fn test_str_trailing_escaped_backslash() {
        // An escaped backslash right before the closing quote does not
        // escape the quote.
        let mut tokens = Token::lexer(r#" "ab\\" 5 "#);
        assert_eq!(tokens.next(), Some(Ok(str_literal("ab\\"))));
        assert_eq!(tokens.next(), Some(Ok(Token::Number(5))));
        assert_eq!(tokens.next(), None);

        // An odd run still escapes it.
        assert_eq!(
            Token::lexer(r#""ab\\\""#).next(),
            Some(Err(LexErr::UnclosedString))
        );
        assert_eq!(
            Token::lexer(r#""a\\\"b""#).next(),
            Some(Ok(str_literal("a\\\"b")))
        );
    }

    #[test]
    fn test_punct() {
        let mut tokens = Token::lexer("0\n1,2:[3] ; trailing comment");
        assert_eq!(tokens.next(), Some(Ok(Token::Number(0))));
        assert_eq!(tokens.next(), Some(Ok(Token::NewLine)));
        assert_eq!(tokens.next(), Some(Ok(Token::Number(1))));
        assert_eq!(tokens.next(), Some(Ok(Token::Comma)));
        assert_eq!(tokens.next(), Some(Ok(Token::Number(2))));
        assert_eq!(tokens.next(), Some(Ok(Token::Colon)));
        assert_eq!(tokens.next(), Some(Ok(Token::LBrack)));
        assert_eq!(tokens.next(), Some(Ok(Token::Number(3))));
        assert_eq!(tokens.next(), Some(Ok(Token::RBrack)));
        assert_eq!(tokens.next(), Some(Ok(Token::Comment)));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_invalid_character() {
        assert_eq!(Token::lexer("@").next(), Some(Err(LexErr::InvalidCharacter)));
        assert_eq!(Token::lexer("{").next(), Some(Err(LexErr::InvalidCharacter)));
        assert_eq!(Token::lexer("ADD R1 %").nth(2), Some(Err(LexErr::InvalidCharacter)));
    }
}
