//! The syntax tree produced by parsing assembly source.
//!
//! A parsed program is an ordered `Vec<`[`Stmt`]`>`. Each statement is a
//! label definition, an instruction, or a directive, and carries the span
//! of the source text it came from so that diagnostics can point back at
//! the offending line.
//!
//! Operands are classified purely lexically here (register syntax, numeric
//! literal, bare identifier, bracketed memory reference); checking them
//! against the ISA's operand patterns is the encoder's job.

use logos::Span;

/// A label occurrence: its name plus where it starts in source.
///
/// # Examples
/// ```text
/// loop:  ADD R1, R2
/// ~~~~
///        JMP loop
///            ~~~~
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct Label {
    /// The label's identifier.
    pub name: String,

    /// The start of the label in source.
    ///
    /// The name's length recovers the full span,
    /// so only the start needs storing.
    start: usize,
}
impl Label {
    /// Creates a new label.
    pub fn new(name: String, span: Span) -> Self {
        debug_assert_eq!(span.start + name.len(), span.end, "span should have the same length as name");
        Label { name, start: span.start }
    }

    /// The span of this label occurrence in source.
    pub fn span(&self) -> Span {
        self.start..(self.start + self.name.len())
    }
}
impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.name.fmt(f)
    }
}

/// The lexical shape of one operand.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum OperandArg {
    /// A register reference (`R3`).
    Reg(u8),
    /// A numeric literal.
    Imm(i64),
    /// A bare identifier, treated as a label reference.
    Label(String),
    /// A bracketed memory reference wrapping an inner operand
    /// (`[0x40]`, `[buffer]`).
    Mem(Box<Operand>),
}
impl std::fmt::Display for OperandArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperandArg::Reg(r) => write!(f, "R{r}"),
            OperandArg::Imm(v) => v.fmt(f),
            OperandArg::Label(name) => f.write_str(name),
            OperandArg::Mem(inner) => write!(f, "[{}]", inner.arg),
        }
    }
}

/// One operand of an instruction, with its source span.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Operand {
    /// The operand's lexical shape.
    pub arg: OperandArg,
    /// The span in source.
    pub span: Span,
}

/// An instruction statement: a mnemonic and its operand list.
///
/// The mnemonic is not validated against the ISA at parse time;
/// encoding resolves it (or reports it unknown).
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct AsmInstr {
    /// The instruction's symbolic name, as written.
    pub mnemonic: String,
    /// The comma-separated operands, in order.
    pub operands: Vec<Operand>,
}
impl std::fmt::Display for AsmInstr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.mnemonic)?;
        for (i, op) in self.operands.iter().enumerate() {
            match i {
                0 => write!(f, " {}", op.arg)?,
                _ => write!(f, ", {}", op.arg)?,
            }
        }
        Ok(())
    }
}

/// A value in a raw-data directive.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum DataValue {
    /// A numeric literal.
    Imm(i64),
    /// A label, resolved to its absolute address in pass 2.
    Label(Label),
    /// A string literal, emitted byte by byte.
    Str(String),
}

/// An assembler directive.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Directive {
    /// `.org addr`: sets the address counter.
    Org(u64),
    /// `.byte v, ..`: emits raw bytes.
    Byte(Vec<DataValue>),
    /// `.word v, ..`: emits word-sized values in the ISA's byte order.
    Word(Vec<DataValue>),
}
impl Directive {
    /// How many bytes this directive occupies in the output.
    pub(crate) fn byte_len(&self, word_bytes: u64) -> u64 {
        fn value_len(v: &DataValue, unit: u64) -> u64 {
            match v {
                DataValue::Imm(_) | DataValue::Label(_) => unit,
                DataValue::Str(s) => s.len() as u64 * unit,
            }
        }

        match self {
            Directive::Org(_) => 0,
            Directive::Byte(vals) => vals.iter().map(|v| value_len(v, 1)).sum(),
            Directive::Word(vals) => vals.iter().map(|v| value_len(v, word_bytes)).sum(),
        }
    }
}

/// What a statement is.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum StmtKind {
    /// A label definition (`loop:`).
    Label(Label),
    /// An instruction.
    Instr(AsmInstr),
    /// A directive.
    Directive(Directive),
}

/// A single statement of the program, with its source span.
///
/// A source line can produce several statements: `loop: ADD R1, R2`
/// parses to a [`StmtKind::Label`] followed by a [`StmtKind::Instr`].
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Stmt {
    /// What the statement is.
    pub kind: StmtKind,
    /// The span in source.
    pub span: Span,
}
