//! Parsing assembly source into the statement sequence.
//!
//! [`parse_program`] is the entry point. It lexes the whole source, then
//! reads it line by line with a small recursive-descent reader. The
//! grammar per line is:
//!
//! ```text
//! [label:]* [mnemonic operand,*] [comment]
//! [label:]* [.directive args]    [comment]
//! ```
//!
//! Errors do not abort the run: a malformed line is skipped up to the
//! next line boundary and parsing continues, so every lex and syntax
//! error in a file is collected in one pass. If any error occurred, no
//! statement sequence is produced (the later passes cannot trust it).

pub mod lex;

use logos::{Logos, Span};

use crate::ast::{AsmInstr, DataValue, Directive, Label, Operand, OperandArg, Stmt, StmtKind};
use crate::err::ErrSpan;

use lex::{LexErr, Token};

/// A lex or syntax error, with the span it points at.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ParseErr {
    /// What went wrong.
    pub kind: ParseErrKind,
    /// The span in the source associated with this error.
    pub span: ErrSpan,
}
impl ParseErr {
    fn new<E: Into<ErrSpan>>(kind: ParseErrKind, span: E) -> Self {
        ParseErr { kind, span: span.into() }
    }
}
impl std::fmt::Display for ParseErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ParseErrKind::Lex(e) => e.fmt(f),
            ParseErrKind::Syntax(e) => e.fmt(f),
        }
    }
}
impl std::error::Error for ParseErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ParseErrKind::Lex(e) => Some(e),
            ParseErrKind::Syntax(e) => Some(e),
        }
    }
}
impl crate::err::Error for ParseErr {
    fn span(&self) -> Option<ErrSpan> {
        Some(self.span.clone())
    }
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match &self.kind {
            ParseErrKind::Lex(e) => crate::err::Error::help(e),
            ParseErrKind::Syntax(e) => crate::err::Error::help(e),
        }
    }
}

/// Which stage of reading a line failed.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ParseErrKind {
    /// The lexer could not tokenize part of the line.
    Lex(LexErr),
    /// The tokens did not match the line grammar.
    Syntax(SyntaxErr),
}

/// A grammar violation, carrying what the reader expected to see.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum SyntaxErr {
    /// Found a token other than the expected one.
    Unexpected {
        /// A description of what was expected here.
        expected: &'static str,
        /// A description of what was found instead.
        found: String,
    },
    /// The line ended where more tokens were expected.
    UnexpectedEol {
        /// A description of what was expected here.
        expected: &'static str,
    },
    /// A directive name this assembler does not know.
    UnknownDirective(String),
    /// `.org` was given a negative address.
    NegativeOrigin(i64),
}
impl std::fmt::Display for SyntaxErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyntaxErr::Unexpected { expected, found } => {
                write!(f, "expected {expected}, found {found}")
            }
            SyntaxErr::UnexpectedEol { expected } => {
                write!(f, "expected {expected}, found end of line")
            }
            SyntaxErr::UnknownDirective(name) => write!(f, "unknown directive '.{name}'"),
            SyntaxErr::NegativeOrigin(v) => write!(f, "origin address {v} cannot be negative"),
        }
    }
}
impl std::error::Error for SyntaxErr {}
impl crate::err::Error for SyntaxErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            SyntaxErr::UnknownDirective(_) => {
                Some("the recognized directives are .org, .byte, and .word".into())
            }
            _ => None,
        }
    }
}

/// Parses source code into a statement sequence.
///
/// On failure, every lex and syntax error found in the file is returned.
///
/// # Example
/// ```
/// use genasm::parse::parse_program;
///
/// let stmts = parse_program("
///     start:  ADD R1, R2   ; comment
///             JMP start
/// ").unwrap();
/// assert_eq!(stmts.len(), 3); // label def + two instructions
/// ```
pub fn parse_program(src: &str) -> Result<Vec<Stmt>, Vec<ParseErr>> {
    let spanned: Vec<_> = Token::lexer(src).spanned().collect();

    let mut stmts = vec![];
    let mut errs = vec![];

    for line in spanned.split(|(t, _)| matches!(t, Ok(Token::NewLine))) {
        // Collect every lex error on the line; a line with any lex error
        // is not parsed further.
        let mut poisoned = false;
        for (res, span) in line {
            if let Err(e) = res {
                errs.push(ParseErr::new(ParseErrKind::Lex(*e), span.clone()));
                poisoned = true;
            }
        }
        if poisoned {
            continue;
        }

        let tokens: Vec<(Token, Span)> = line
            .iter()
            .filter_map(|(t, span)| match t {
                Ok(Token::Comment) | Err(_) => None,
                Ok(t) => Some((t.clone(), span.clone())),
            })
            .collect();

        match parse_line(&tokens) {
            Ok(line_stmts) => stmts.extend(line_stmts),
            Err(e) => errs.push(e),
        }
    }

    match errs.is_empty() {
        true => Ok(stmts),
        false => Err(errs),
    }
}

/// A short rendering of a token for "expected X, found Y" messages.
fn describe(tok: &Token) -> String {
    match tok {
        Token::Number(v) => format!("number {v}"),
        Token::Reg(r) => format!("register R{r}"),
        Token::Ident(name) => format!("'{name}'"),
        Token::Directive(name) => format!("'.{name}'"),
        Token::String(_) => "a string literal".to_string(),
        Token::Colon => "':'".to_string(),
        Token::Comma => "','".to_string(),
        Token::LBrack => "'['".to_string(),
        Token::RBrack => "']'".to_string(),
        Token::Comment | Token::NewLine => "end of line".to_string(),
    }
}

fn unexpected(expected: &'static str, tok: &Token, span: &Span) -> ParseErr {
    ParseErr::new(
        ParseErrKind::Syntax(SyntaxErr::Unexpected { expected, found: describe(tok) }),
        span.clone(),
    )
}
fn unexpected_eol(expected: &'static str, line_end: usize) -> ParseErr {
    ParseErr::new(
        ParseErrKind::Syntax(SyntaxErr::UnexpectedEol { expected }),
        line_end..line_end,
    )
}

/// Parses one source line. A line can hold several statements
/// (label definitions followed by an instruction or directive).
fn parse_line(line: &[(Token, Span)]) -> Result<Vec<Stmt>, ParseErr> {
    let mut stmts = vec![];
    let mut ts = line;

    // Leading label definitions: `name:`.
    while let [(Token::Ident(name), span), (Token::Colon, colon_span), rest @ ..] = ts {
        stmts.push(Stmt {
            kind: StmtKind::Label(Label::new(name.clone(), span.clone())),
            span: span.start..colon_span.end,
        });
        ts = rest;
    }

    match ts {
        [] => {}
        [(Token::Directive(name), span), rest @ ..] => {
            stmts.push(parse_directive(name, span, rest)?);
        }
        [(Token::Ident(mnemonic), span), rest @ ..] => {
            stmts.push(parse_instr(mnemonic, span, rest)?);
        }
        [(tok, span), ..] => {
            return Err(unexpected("a label, mnemonic, or directive", tok, span));
        }
    }

    Ok(stmts)
}

fn parse_instr(mnemonic: &str, mspan: &Span, mut ts: &[(Token, Span)]) -> Result<Stmt, ParseErr> {
    let mut operands = vec![];
    let mut end = mspan.end;

    if !ts.is_empty() {
        loop {
            let op = parse_operand(&mut ts, end)?;
            end = op.span.end;
            operands.push(op);

            match ts {
                [] => break,
                [(Token::Comma, _), rest @ ..] => ts = rest,
                [(tok, span), ..] => return Err(unexpected("',' or end of line", tok, span)),
            }
        }
    }

    Ok(Stmt {
        kind: StmtKind::Instr(AsmInstr { mnemonic: mnemonic.to_string(), operands }),
        span: mspan.start..end,
    })
}

fn parse_operand(ts: &mut &[(Token, Span)], line_end: usize) -> Result<Operand, ParseErr> {
    match *ts {
        [(Token::Reg(r), span), rest @ ..] => {
            *ts = rest;
            Ok(Operand { arg: OperandArg::Reg(*r), span: span.clone() })
        }
        [(Token::Number(v), span), rest @ ..] => {
            *ts = rest;
            Ok(Operand { arg: OperandArg::Imm(*v), span: span.clone() })
        }
        [(Token::Ident(name), span), rest @ ..] => {
            *ts = rest;
            Ok(Operand { arg: OperandArg::Label(name.clone()), span: span.clone() })
        }
        [(Token::LBrack, lspan), rest @ ..] => {
            *ts = rest;
            let inner = parse_operand(ts, line_end)?;
            match *ts {
                [(Token::RBrack, rspan), rest @ ..] => {
                    *ts = rest;
                    Ok(Operand {
                        span: lspan.start..rspan.end,
                        arg: OperandArg::Mem(Box::new(inner)),
                    })
                }
                [(tok, span), ..] => Err(unexpected("']'", tok, span)),
                [] => Err(unexpected_eol("']'", line_end)),
            }
        }
        [(tok, span), ..] => Err(unexpected("an operand", tok, span)),
        [] => Err(unexpected_eol("an operand", line_end)),
    }
}

fn parse_directive(name: &str, dspan: &Span, ts: &[(Token, Span)]) -> Result<Stmt, ParseErr> {
    match name.to_lowercase().as_str() {
        "org" => parse_org(dspan, ts),
        "byte" => {
            let (values, end) = parse_data_values(ts, dspan.end)?;
            Ok(Stmt {
                kind: StmtKind::Directive(Directive::Byte(values)),
                span: dspan.start..end,
            })
        }
        "word" => {
            let (values, end) = parse_data_values(ts, dspan.end)?;
            Ok(Stmt {
                kind: StmtKind::Directive(Directive::Word(values)),
                span: dspan.start..end,
            })
        }
        _ => Err(ParseErr::new(
            ParseErrKind::Syntax(SyntaxErr::UnknownDirective(name.to_string())),
            dspan.clone(),
        )),
    }
}

fn parse_org(dspan: &Span, ts: &[(Token, Span)]) -> Result<Stmt, ParseErr> {
    match ts {
        [(Token::Number(v), span)] => match u64::try_from(*v) {
            Ok(addr) => Ok(Stmt {
                kind: StmtKind::Directive(Directive::Org(addr)),
                span: dspan.start..span.end,
            }),
            Err(_) => Err(ParseErr::new(
                ParseErrKind::Syntax(SyntaxErr::NegativeOrigin(*v)),
                span.clone(),
            )),
        },
        [(Token::Number(_), _), (tok, span), ..] => Err(unexpected("end of line", tok, span)),
        [(tok, span), ..] => Err(unexpected("an address", tok, span)),
        [] => Err(unexpected_eol("an address", dspan.end)),
    }
}

fn parse_data_values(
    mut ts: &[(Token, Span)],
    line_end: usize,
) -> Result<(Vec<DataValue>, usize), ParseErr> {
    let mut values = vec![];
    let mut end = line_end;

    loop {
        match ts {
            [(Token::Number(v), span), rest @ ..] => {
                values.push(DataValue::Imm(*v));
                end = span.end;
                ts = rest;
            }
            [(Token::Ident(name), span), rest @ ..] => {
                values.push(DataValue::Label(Label::new(name.clone(), span.clone())));
                end = span.end;
                ts = rest;
            }
            [(Token::String(s), span), rest @ ..] => {
                values.push(DataValue::Str(s.clone()));
                end = span.end;
                ts = rest;
            }
            [(tok, span), ..] => return Err(unexpected("a data value", tok, span)),
            [] => return Err(unexpected_eol("a data value", end)),
        }

        match ts {
            [] => break,
            [(Token::Comma, _), rest @ ..] => ts = rest,
            [(tok, span), ..] => return Err(unexpected("',' or end of line", tok, span)),
        }
    }

    Ok((values, end))
}

#[cfg(test)]
mod tests {
    use crate::ast::{DataValue, Directive, OperandArg, StmtKind};
    use crate::parse::lex::LexErr;
    use crate::parse::{parse_program, ParseErrKind, SyntaxErr};

    fn kinds(src: &str) -> Vec<StmtKind> {
        parse_program(src)
            .unwrap()
            .into_iter()
            .map(|s| s.kind)
            .collect()
    }

    #[test]
    fn test_labels_and_instr() {
        let stmts = kinds("start: loop: ADD R1, R2\n");
        assert_eq!(stmts.len(), 3);
        assert!(matches!(&stmts[0], StmtKind::Label(l) if l.name == "start"));
        assert!(matches!(&stmts[1], StmtKind::Label(l) if l.name == "loop"));

        let StmtKind::Instr(instr) = &stmts[2] else {
            panic!("expected instruction, got {:?}", stmts[2]);
        };
        assert_eq!(instr.mnemonic, "ADD");
        assert_eq!(instr.operands.len(), 2);
        assert_eq!(instr.operands[0].arg, OperandArg::Reg(1));
        assert_eq!(instr.operands[1].arg, OperandArg::Reg(2));
    }

    #[test]
    fn test_operand_classification() {
        let stmts = kinds("LD R3, 0x40, buffer, [12], [buf]\n");
        let StmtKind::Instr(instr) = &stmts[0] else {
            panic!("expected instruction");
        };
        assert_eq!(instr.operands[0].arg, OperandArg::Reg(3));
        assert_eq!(instr.operands[1].arg, OperandArg::Imm(0x40));
        assert_eq!(instr.operands[2].arg, OperandArg::Label("buffer".to_string()));
        assert!(
            matches!(&instr.operands[3].arg, OperandArg::Mem(op) if op.arg == OperandArg::Imm(12))
        );
        assert!(matches!(
            &instr.operands[4].arg,
            OperandArg::Mem(op) if op.arg == OperandArg::Label("buf".to_string())
        ));
    }

    #[test]
    fn test_no_operands() {
        let stmts = kinds("HALT\n");
        assert!(matches!(&stmts[0], StmtKind::Instr(i) if i.mnemonic == "HALT" && i.operands.is_empty()));
    }

    #[test]
    fn test_directives() {
        let stmts = kinds("
            .org 0x10
            .byte 1, -2, msg
            .word 0x1234
            .byte \"hi\", 0
        ");
        assert!(matches!(&stmts[0], StmtKind::Directive(Directive::Org(0x10))));
        assert!(matches!(
            &stmts[1],
            StmtKind::Directive(Directive::Byte(vals))
                if vals.len() == 3
                && vals[0] == DataValue::Imm(1)
                && vals[1] == DataValue::Imm(-2)
                && matches!(&vals[2], DataValue::Label(l) if l.name == "msg")
        ));
        assert!(matches!(
            &stmts[2],
            StmtKind::Directive(Directive::Word(vals)) if vals == &[DataValue::Imm(0x1234)]
        ));
        assert!(matches!(
            &stmts[3],
            StmtKind::Directive(Directive::Byte(vals))
                if vals[0] == DataValue::Str("hi".to_string()) && vals[1] == DataValue::Imm(0)
        ));
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let stmts = kinds("\n; full-line comment\nNOP ; trailing\n\n");
        assert_eq!(stmts.len(), 1);
    }

    #[test]
    fn test_collects_multiple_errors() {
        // Three bad lines, one good line in between; all three errors
        // surface from a single run.
        let errs = parse_program("ADD R1,\n@\nNOP\n.org -4\n").unwrap_err();
        assert_eq!(errs.len(), 3);
        assert!(matches!(
            &errs[0].kind,
            ParseErrKind::Syntax(SyntaxErr::UnexpectedEol { expected: "an operand" })
        ));
        assert!(matches!(&errs[1].kind, ParseErrKind::Lex(LexErr::InvalidCharacter)));
        assert!(matches!(
            &errs[2].kind,
            ParseErrKind::Syntax(SyntaxErr::NegativeOrigin(-4))
        ));
    }

    #[test]
    fn test_unknown_directive() {
        let errs = parse_program(".external foo\n").unwrap_err();
        assert!(matches!(
            &errs[0].kind,
            ParseErrKind::Syntax(SyntaxErr::UnknownDirective(name)) if name == "external"
        ));
    }

    #[test]
    fn test_unclosed_memory_reference() {
        let errs = parse_program("LD R1, [buf\n").unwrap_err();
        assert!(matches!(
            &errs[0].kind,
            ParseErrKind::Syntax(SyntaxErr::UnexpectedEol { expected: "']'" })
        ));
    }

    #[test]
    fn test_stray_colon() {
        let errs = parse_program(": NOP\n").unwrap_err();
        assert!(matches!(&errs[0].kind, ParseErrKind::Syntax(SyntaxErr::Unexpected { .. })));
    }
}
