//! Assembling statement sequences into binary images.
//!
//! This module is used to convert parsed programs (`Vec<`[`Stmt`]`>`) into
//! memory images, using a loaded [`Isa`] table to encode each instruction.
//!
//! The assembler module notably consists of:
//! - [`assemble`] and [`assemble_debug`]: the main functions which assemble
//!   the statements into an image
//! - [`SymbolTable`]: the label-to-address mapping computed by the first
//!   assembler pass
//! - [`ObjectImage`]: the assembled image, which can be serialized through
//!   the formats in [`encoding`]
//!
//! Assembly is two passes over the statement sequence: pass 1 assigns an
//! address to every label (so forward references work), pass 2 encodes
//! every instruction and data directive against the frozen symbol table.
//! Diagnostics are collected across both passes; an image is only produced
//! if the collected set is empty.
//!
//! [`Stmt`]: crate::ast::Stmt

pub mod encoding;

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::ops::Range;

use logos::Span;

use crate::ast::{AsmInstr, DataValue, Directive, Operand, OperandArg, Stmt, StmtKind};
use crate::err::ErrSpan;
use crate::spec::{Endian, FieldSource, InstructionSpec, Isa, OperandKind, OperandPattern};

/// Assembles a program against an ISA table.
///
/// # Example
/// ```
/// use genasm::spec::Isa;
/// use genasm::parse::parse_program;
/// use genasm::asm::{assemble, GapPolicy};
///
/// let isa = Isa::from_json(r#"{
///     "wordWidth": 8,
///     "endianness": "big",
///     "instructions": [
///         {
///             "mnemonic": "ADD",
///             "operands": [
///                 { "kind": "register", "width": 2 },
///                 { "kind": "register", "width": 2 }
///             ],
///             "opcode": 1,
///             "fields": [
///                 { "name": "opcode", "width": 4, "source": "opcode" },
///                 { "name": "ra", "width": 2, "source": 0 },
///                 { "name": "rb", "width": 2, "source": 1 }
///             ]
///         }
///     ]
/// }"#).unwrap();
///
/// let stmts = parse_program("ADD R1, R2\n").unwrap();
/// let image = assemble(&isa, &stmts).unwrap();
/// assert_eq!(image.binary(GapPolicy::ZeroFill).unwrap(), vec![0b0001_0110]);
/// ```
pub fn assemble(isa: &Isa, stmts: &[Stmt]) -> Result<ObjectImage, Vec<AsmErr>> {
    build_image(isa, stmts, None)
}

/// Assembles a program against an ISA table, keeping the source text so
/// that the image can render a listing ([`ObjectImage::listing`]).
pub fn assemble_debug(isa: &Isa, stmts: &[Stmt], src: &str) -> Result<ObjectImage, Vec<AsmErr>> {
    build_image(isa, stmts, Some(src))
}

/// Kinds of errors that can occur from assembling a parsed program.
///
/// See [`AsmErr`] for this error type with span information included.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum AsmErrKind {
    /// A label was defined more than once (pass 1).
    DuplicateSymbol(String),
    /// A referenced label is defined nowhere (pass 2).
    UndefinedSymbol(String),
    /// No instruction form matches the mnemonic and operand shape (pass 2).
    UnknownMnemonicOrShape(String),
    /// More than one instruction form matches (pass 2).
    AmbiguousMatch(String),
    /// A resolved value does not fit its field (pass 2).
    OperandOutOfRange {
        /// Name of the field the value was bound for.
        field: String,
        /// Smallest representable value.
        lo: i128,
        /// Largest representable value.
        hi: i128,
        /// The offending value.
        value: i128,
    },
    /// The image has an address gap and gaps are configured fatal (emission).
    UnsupportedGap(u64),
    /// Two regions of the image overlap (pass 2).
    OverlappingChunks,
}
impl std::fmt::Display for AsmErrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateSymbol(name) => write!(f, "label '{name}' was defined multiple times"),
            Self::UndefinedSymbol(name) => write!(f, "label '{name}' could not be found"),
            Self::UnknownMnemonicOrShape(instr) => {
                write!(f, "no encoding matches '{instr}'")
            }
            Self::AmbiguousMatch(instr) => {
                write!(f, "more than one encoding matches '{instr}'")
            }
            Self::OperandOutOfRange { field, lo, hi, value } => {
                write!(f, "value {value} does not fit field '{field}' (allowed range [{lo}, {hi}])")
            }
            Self::UnsupportedGap(addr) => {
                write!(f, "output has an address gap before {addr:#x}")
            }
            Self::OverlappingChunks => f.write_str("regions overlap in memory"),
        }
    }
}

/// Error from assembling a parsed program.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct AsmErr {
    /// The value with a span.
    pub kind: AsmErrKind,
    /// The span in the source associated with this value.
    pub span: ErrSpan,
}
impl AsmErr {
    /// Creates a new [`AsmErr`].
    pub fn new<E: Into<ErrSpan>>(kind: AsmErrKind, span: E) -> Self {
        AsmErr { kind, span: span.into() }
    }
}
impl std::fmt::Display for AsmErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind.fmt(f)
    }
}
impl std::error::Error for AsmErr {}
impl crate::err::Error for AsmErr {
    fn span(&self) -> Option<ErrSpan> {
        Some(self.span.clone())
    }

    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match &self.kind {
            AsmErrKind::DuplicateSymbol(_) => {
                Some("labels must be unique within a program; the first definition wins".into())
            }
            AsmErrKind::UndefinedSymbol(_) => {
                Some("try defining this label before an instruction or directive".into())
            }
            AsmErrKind::UnknownMnemonicOrShape(_) => {
                Some("check the mnemonic and the count and kinds of its operands against the ISA".into())
            }
            AsmErrKind::AmbiguousMatch(_) => {
                Some("the ISA declares overlapping forms for this mnemonic; disambiguate the operands".into())
            }
            AsmErrKind::OperandOutOfRange { .. } => None,
            AsmErrKind::UnsupportedGap(_) => {
                Some("use the zero-fill gap policy, or remove the .org jump".into())
            }
            AsmErrKind::OverlappingChunks => {
                Some("try moving the starting address of one of these regions".into())
            }
        }
    }
}

/// Struct holding the source string and helpers to index lines and
/// to query position information from a source string.
#[derive(PartialEq, Eq, Clone)]
pub struct SourceInfo {
    /// The source code.
    src: String,
    /// The index of each new line in source code.
    nl_indices: Vec<usize>,
}
impl std::fmt::Debug for SourceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceInfo")
            .field("nl_indices", &self.nl_indices)
            .finish_non_exhaustive()
    }
}
impl SourceInfo {
    /// Computes the source info from a given string.
    pub fn new(src: &str) -> Self {
        let nl_indices: Vec<_> = src
            .match_indices('\n')
            .map(|(i, _)| i)
            .chain([src.len()])
            .collect();

        Self { src: src.to_string(), nl_indices }
    }

    /// Returns the entire source.
    pub fn source(&self) -> &str {
        &self.src
    }

    /// Counts the number of lines in the source string.
    pub fn count_lines(&self) -> usize {
        self.nl_indices.len()
    }

    /// Gets the character range for the provided line, including any
    /// whitespace and the newline character.
    fn raw_line_span(&self, line: usize) -> Option<Range<usize>> {
        if !(0..self.count_lines()).contains(&line) {
            return None;
        }

        let start = match line {
            0 => 0,
            _ => self.nl_indices[line - 1] + 1,
        };

        let eof = self.src.len();
        let end = match self.nl_indices.get(line) {
            Some(i) => (i + 1).min(eof),
            None => eof,
        };

        Some(start..end)
    }

    /// Gets the character range for the provided line, excluding any
    /// surrounding whitespace.
    pub fn line_span(&self, line: usize) -> Option<Range<usize>> {
        let Range { mut start, mut end } = self.raw_line_span(line)?;

        // shift line span by trim
        let text = &self.src[start..end];
        let end_trimmed = text.trim_end();
        end -= text.len() - end_trimmed.len();

        let text = end_trimmed;
        start += text.len() - text.trim_start().len();

        Some(start..end)
    }

    /// Reads a line from source.
    pub fn read_line(&self, line: usize) -> Option<&str> {
        self.line_span(line).map(|r| &self.src[r])
    }

    /// Gets the line number of the given character index.
    fn get_line(&self, index: usize) -> usize {
        self.nl_indices.partition_point(|&start| start < index)
    }

    /// Calculates the (line, column) pair for a given character index.
    pub fn get_pos_pair(&self, index: usize) -> (usize, usize) {
        let lno = self.get_line(index);

        let Range { start: lstart, .. } = self
            .raw_line_span(lno)
            .or_else(|| self.raw_line_span(self.nl_indices.len().saturating_sub(1)))
            .unwrap_or(0..0);
        let cno = index.saturating_sub(lstart);
        (lno, cno)
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
struct SymbolData {
    addr: u64,
    src_start: usize,
}
impl SymbolData {
    /// The source range of this symbol, given the name of the label.
    fn span(&self, label: &str) -> Range<usize> {
        self.src_start..(self.src_start + label.len())
    }
}

/// The symbol table created in the first assembler pass.
///
/// It maps labels (case-insensitively) to the addresses their definitions
/// fell on. The table is populated monotonically during pass 1 and frozen
/// before pass 2 begins: there is no mutation API, and encoding reads it
/// only through [`SymbolTable::lookup`].
///
/// Insertion order is preserved, so [`SymbolTable::iter`] and
/// [`SymbolTable::dump`] list symbols in definition order.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SymbolTable {
    /// Label data, keyed by uppercased name.
    map: HashMap<String, SymbolData>,
    /// First-seen spellings, in insertion order.
    order: Vec<String>,
}

impl SymbolTable {
    /// Performs the first assembler pass.
    ///
    /// Walks the statement sequence with a running byte-address counter
    /// (origin 0 unless `.org` says otherwise) and records the address of
    /// every label definition. Duplicate definitions are returned as
    /// diagnostics; the first binding wins and the walk continues, so the
    /// addresses of later labels are still assigned.
    ///
    /// # Example
    /// ```
    /// use genasm::spec::Isa;
    /// use genasm::parse::parse_program;
    /// use genasm::asm::SymbolTable;
    ///
    /// let isa = Isa::from_json(r#"{
    ///     "wordWidth": 16,
    ///     "endianness": "little",
    ///     "instructions": []
    /// }"#).unwrap();
    /// let stmts = parse_program("
    ///     a: .word 0, 0
    ///     b: .byte 5
    ///     c:
    /// ").unwrap();
    ///
    /// let (sym, errs) = SymbolTable::build(&isa, &stmts);
    /// assert!(errs.is_empty());
    /// assert_eq!(sym.lookup("a"), Some(0));
    /// assert_eq!(sym.lookup("b"), Some(4));
    /// assert_eq!(sym.lookup("c"), Some(5));
    /// assert_eq!(sym.lookup("d"), None);
    /// ```
    pub fn build(isa: &Isa, stmts: &[Stmt]) -> (Self, Vec<AsmErr>) {
        let mut map: HashMap<String, SymbolData> = HashMap::new();
        let mut order = vec![];
        let mut errs = vec![];
        let mut lc: u64 = 0;

        for stmt in stmts {
            match &stmt.kind {
                StmtKind::Label(label) => match map.entry(label.name.to_uppercase()) {
                    Entry::Occupied(e) => {
                        let span1 = e.get().span(&label.name);
                        let span2 = label.span();
                        errs.push(AsmErr::new(
                            AsmErrKind::DuplicateSymbol(label.name.clone()),
                            [span1, span2],
                        ));
                    }
                    Entry::Vacant(e) => {
                        e.insert(SymbolData { addr: lc, src_start: label.span().start });
                        order.push(label.name.clone());
                    }
                },
                StmtKind::Instr(_) => lc += isa.word_bytes(),
                StmtKind::Directive(Directive::Org(addr)) => lc = *addr,
                StmtKind::Directive(d) => lc += d.byte_len(isa.word_bytes()),
            }
        }

        (SymbolTable { map, order }, errs)
    }

    /// Gets the address of a given label (case-insensitive), if it exists.
    pub fn lookup(&self, label: &str) -> Option<u64> {
        self.map.get(&label.to_uppercase()).map(|data| data.addr)
    }

    /// Gets the source span of a given label's definition, if it exists.
    pub fn get_label_source(&self, label: &str) -> Option<Range<usize>> {
        self.map
            .get(&label.to_uppercase())
            .map(|data| data.span(label))
    }

    /// Iterates over `(name, address)` pairs in definition order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.order.iter().map(|name| {
            let data = &self.map[&name.to_uppercase()];
            (name.as_str(), data.addr)
        })
    }

    /// Renders the symbol table as a `name = address` dump,
    /// in definition order.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (name, addr) in self.iter() {
            let _ = writeln!(out, "{name} = {addr:#06X}");
        }
        out
    }
}

/// The result of matching an instruction against an ISA's forms.
///
/// Selection is an explicit match over the closed set of operand-kind
/// tuples registered for a mnemonic; there is no implicit coercion.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Match<'a> {
    /// Exactly one form matches.
    Matched(&'a InstructionSpec),
    /// No form matches the mnemonic and operand shape.
    NoMatch,
    /// More than one form matches.
    ///
    /// Load-time validation rejects duplicate shapes, but kind
    /// compatibility (a label can stand for an immediate) can still make
    /// two distinct shapes match the same source operands.
    Ambiguous,
}

/// Selects the instruction form matching a source instruction's mnemonic
/// and operand shape.
pub fn select_spec<'a>(isa: &'a Isa, instr: &AsmInstr) -> Match<'a> {
    let mut it = isa
        .lookup(&instr.mnemonic)
        .iter()
        .filter(|spec| shape_matches(spec, &instr.operands));

    match (it.next(), it.next()) {
        (None, _) => Match::NoMatch,
        (Some(spec), None) => Match::Matched(spec),
        (Some(_), Some(_)) => Match::Ambiguous,
    }
}

fn shape_matches(spec: &InstructionSpec, operands: &[Operand]) -> bool {
    spec.operands.len() == operands.len()
        && spec
            .operands
            .iter()
            .zip(operands)
            .all(|(pat, op)| kind_compatible(pat.kind, &op.arg))
}

fn kind_compatible(kind: OperandKind, arg: &OperandArg) -> bool {
    match (kind, arg) {
        (OperandKind::Register, OperandArg::Reg(_)) => true,
        // An immediate slot accepts a label, resolved as an absolute value.
        (OperandKind::Immediate, OperandArg::Imm(_) | OperandArg::Label(_)) => true,
        // A label slot accepts a numeric offset written directly.
        (OperandKind::Label, OperandArg::Label(_) | OperandArg::Imm(_)) => true,
        (OperandKind::Memory, OperandArg::Mem(_)) => true,
        _ => false,
    }
}

fn mask(width: u32) -> u64 {
    match width >= 64 {
        true => u64::MAX,
        false => (1u64 << width) - 1,
    }
}

/// Checks that a value is representable in `width` bits with the given
/// signedness, returning the allowed range on failure.
fn check_range(value: i128, width: u32, signed: bool) -> Result<(), (i128, i128)> {
    let (lo, hi) = match signed {
        true => (-(1i128 << (width - 1)), (1i128 << (width - 1)) - 1),
        false => (0, (1i128 << width) - 1),
    };
    match (lo..=hi).contains(&value) {
        true => Ok(()),
        false => Err((lo, hi)),
    }
}

/// Resolves an operand to the integer that will be packed.
///
/// Labels resolve through the symbol table: to a relative offset when
/// bound for a signed `label` slot, to their absolute address otherwise.
/// Memory references resolve to their inner value.
fn resolve_arg(
    arg: &OperandArg,
    span: &Span,
    pat: &OperandPattern,
    addr: u64,
    sym: &SymbolTable,
) -> Result<i128, AsmErr> {
    match arg {
        OperandArg::Reg(r) => Ok(i128::from(*r)),
        OperandArg::Imm(v) => Ok(i128::from(*v)),
        OperandArg::Label(name) => {
            let target = sym.lookup(name).ok_or_else(|| {
                AsmErr::new(AsmErrKind::UndefinedSymbol(name.clone()), span.clone())
            })?;
            match pat.kind == OperandKind::Label && pat.signed {
                true => Ok(i128::from(target) - i128::from(addr)),
                false => Ok(i128::from(target)),
            }
        }
        OperandArg::Mem(inner) => resolve_arg(&inner.arg, &inner.span, pat, addr, sym),
    }
}

/// Encodes one instruction at the given address into its word bytes.
fn encode_instr(
    isa: &Isa,
    sym: &SymbolTable,
    instr: &AsmInstr,
    addr: u64,
    span: &Span,
) -> Result<Vec<u8>, AsmErr> {
    let spec = match select_spec(isa, instr) {
        Match::Matched(spec) => spec,
        Match::NoMatch => {
            return Err(AsmErr::new(
                AsmErrKind::UnknownMnemonicOrShape(instr.to_string()),
                span.clone(),
            ))
        }
        Match::Ambiguous => {
            return Err(AsmErr::new(
                AsmErrKind::AmbiguousMatch(instr.to_string()),
                span.clone(),
            ))
        }
    };

    let mut values = Vec::with_capacity(spec.operands.len());
    for (pat, op) in spec.operands.iter().zip(&instr.operands) {
        values.push(resolve_arg(&op.arg, &op.span, pat, addr, sym)?);
    }

    // Pack fields in declared order, first field into the most
    // significant bits. The opcode constant is distributed across the
    // opcode-sourced fields, also in declared order.
    let mut op_left = spec.opcode_bits();
    let mut word: u64 = 0;
    for field in &spec.fields {
        let bits = match field.source {
            FieldSource::Opcode => {
                op_left -= field.width;
                (spec.opcode >> op_left) & mask(field.width)
            }
            FieldSource::Operand(i) => {
                let value = values[i];
                check_range(value, field.width, spec.operands[i].signed).map_err(|(lo, hi)| {
                    AsmErr::new(
                        AsmErrKind::OperandOutOfRange {
                            field: field.name.clone(),
                            lo,
                            hi,
                            value,
                        },
                        instr.operands[i].span.clone(),
                    )
                })?;
                (value as u64) & mask(field.width)
            }
        };
        word = match field.width >= 64 {
            true => bits,
            false => (word << field.width) | bits,
        };
    }

    Ok(word_to_bytes(word, isa))
}

fn word_to_bytes(word: u64, isa: &Isa) -> Vec<u8> {
    let n = isa.word_bytes() as usize;
    match isa.endianness() {
        Endian::Big => (0..n).rev().map(|i| (word >> (8 * i)) as u8).collect(),
        Endian::Little => (0..n).map(|i| (word >> (8 * i)) as u8).collect(),
    }
}

/// Writes the bytes of a data directive, substituting zeros for values
/// that error so that the region keeps its declared length.
fn encode_data(
    dir: &Directive,
    isa: &Isa,
    sym: &SymbolTable,
    stmt_span: &Span,
    out: &mut Vec<u8>,
    errs: &mut Vec<AsmErr>,
) {
    // (unit size in bytes, field name for diagnostics)
    let (unit, field, values) = match dir {
        Directive::Org(_) => return,
        Directive::Byte(vals) => (1usize, ".byte", vals),
        Directive::Word(vals) => (isa.word_bytes() as usize, ".word", vals),
    };
    let unit_bits = unit as u32 * 8;

    let write_value = |value: i128, span: &Span, out: &mut Vec<u8>, errs: &mut Vec<AsmErr>| {
        // Accept the union of the signed and unsigned ranges, like a
        // byte accepting both -128 and 255.
        let lo = -(1i128 << (unit_bits - 1));
        let hi = (1i128 << unit_bits) - 1;
        if !(lo..=hi).contains(&value) {
            errs.push(AsmErr::new(
                AsmErrKind::OperandOutOfRange { field: field.to_string(), lo, hi, value },
                span.clone(),
            ));
            out.extend(std::iter::repeat(0).take(unit));
            return;
        }
        let word = (value as u64) & mask(unit_bits);
        match isa.endianness() {
            Endian::Big => out.extend((0..unit).rev().map(|i| (word >> (8 * i)) as u8)),
            Endian::Little => out.extend((0..unit).map(|i| (word >> (8 * i)) as u8)),
        }
    };

    for value in values {
        match value {
            DataValue::Imm(v) => write_value(i128::from(*v), stmt_span, out, errs),
            DataValue::Label(label) => match sym.lookup(&label.name) {
                Some(addr) => write_value(i128::from(addr), &label.span(), out, errs),
                None => {
                    errs.push(AsmErr::new(
                        AsmErrKind::UndefinedSymbol(label.name.clone()),
                        label.span(),
                    ));
                    out.extend(std::iter::repeat(0).take(unit));
                }
            },
            DataValue::Str(s) => {
                for b in s.bytes() {
                    write_value(i128::from(b), stmt_span, out, errs);
                }
            }
        }
    }
}

/// A contiguous region of the output image.
#[derive(Debug, PartialEq, Eq, Clone)]
pub(crate) struct Chunk {
    pub(crate) bytes: Vec<u8>,
    /// Span of the `.org` (or program start) that opened this region,
    /// used for gap and overlap diagnostics.
    org_span: Range<usize>,
}

/// One listing record: an output address, its bytes, and where in the
/// source they came from.
#[derive(Debug, PartialEq, Eq, Clone)]
struct ListingLine {
    addr: u64,
    bytes: Vec<u8>,
    span: Range<usize>,
}

/// How [`ObjectImage::binary`] treats address gaps left by `.org` jumps.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum GapPolicy {
    /// Fill gaps with zero bytes.
    #[default]
    ZeroFill,
    /// Treat any gap as fatal ([`AsmErrKind::UnsupportedGap`]).
    Deny,
}

/// An assembled image.
///
/// This is the final product after source code is fully assembled:
/// the encoded regions in address order, the symbol table, and (if
/// assembled with [`assemble_debug`]) enough source information to
/// render a listing.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ObjectImage {
    /// Regions of the image, keyed by starting address.
    ///
    /// Invariants: regions are non-empty and do not overlap.
    pub(crate) chunks: BTreeMap<u64, Chunk>,
    listing: Vec<ListingLine>,
    sym: SymbolTable,
    src_info: Option<SourceInfo>,
}

impl ObjectImage {
    /// Serializes the image to its flat byte sequence, starting at
    /// address zero.
    ///
    /// Gaps between regions (introduced by `.org` jumps) are zero-filled
    /// or rejected per `gaps`.
    pub fn binary(&self, gaps: GapPolicy) -> Result<Vec<u8>, AsmErr> {
        let mut out = vec![];
        for (&start, chunk) in &self.chunks {
            if start as usize > out.len() {
                match gaps {
                    GapPolicy::ZeroFill => out.resize(start as usize, 0),
                    GapPolicy::Deny => {
                        return Err(AsmErr::new(
                            AsmErrKind::UnsupportedGap(start),
                            chunk.org_span.clone(),
                        ))
                    }
                }
            }
            out.extend_from_slice(&chunk.bytes);
        }
        Ok(out)
    }

    /// Iterates over `(address, byte)` pairs defined in the image.
    pub fn addr_iter(&self) -> impl Iterator<Item = (u64, u8)> + '_ {
        self.chunks.iter().flat_map(|(&start, chunk)| {
            chunk
                .bytes
                .iter()
                .enumerate()
                .map(move |(i, &b)| (start + i as u64, b))
        })
    }

    /// The symbol table computed during assembly.
    pub fn symbol_table(&self) -> &SymbolTable {
        &self.sym
    }

    /// Renders a listing pairing each output address with its encoded
    /// bytes and the originating source line.
    ///
    /// Returns `None` unless the image was produced by [`assemble_debug`].
    pub fn listing(&self) -> Option<String> {
        let src = self.src_info.as_ref()?;
        let mut out = String::new();
        for line in &self.listing {
            let (lno, col) = src.get_pos_pair(line.span.start);
            let hex = line
                .bytes
                .iter()
                .map(|b| format!("{b:02X}"))
                .collect::<Vec<_>>()
                .join(" ");
            let text = src.read_line(lno).unwrap_or("");
            let _ = writeln!(
                out,
                "{:08X}  {:<23} {:>4}:{:<4} {}",
                line.addr,
                hex,
                lno + 1,
                col + 1,
                text
            );
        }
        Some(out)
    }
}

/// PASS 2: walks the statement sequence again, encoding against the
/// frozen symbol table and laying bytes out into regions.
fn build_image(isa: &Isa, stmts: &[Stmt], src: Option<&str>) -> Result<ObjectImage, Vec<AsmErr>> {
    let (sym, mut errs) = SymbolTable::build(isa, stmts);

    struct OpenChunk {
        start: u64,
        bytes: Vec<u8>,
        org_span: Range<usize>,
    }

    let mut done: Vec<(u64, Chunk)> = vec![];
    let close = |chunk: OpenChunk, done: &mut Vec<(u64, Chunk)>| {
        if !chunk.bytes.is_empty() {
            done.push((chunk.start, Chunk { bytes: chunk.bytes, org_span: chunk.org_span }));
        }
    };

    let mut cur = OpenChunk { start: 0, bytes: vec![], org_span: 0..0 };
    let mut listing = vec![];
    let mut lc: u64 = 0;

    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Label(_) => {}
            StmtKind::Directive(Directive::Org(addr)) => {
                let prev = std::mem::replace(
                    &mut cur,
                    OpenChunk { start: *addr, bytes: vec![], org_span: stmt.span.clone() },
                );
                close(prev, &mut done);
                lc = *addr;
            }
            StmtKind::Directive(dir) => {
                let before = cur.bytes.len();
                encode_data(dir, isa, &sym, &stmt.span, &mut cur.bytes, &mut errs);
                listing.push(ListingLine {
                    addr: lc,
                    bytes: cur.bytes[before..].to_vec(),
                    span: stmt.span.clone(),
                });
                lc += dir.byte_len(isa.word_bytes());
            }
            StmtKind::Instr(instr) => {
                match encode_instr(isa, &sym, instr, lc, &stmt.span) {
                    Ok(bytes) => {
                        listing.push(ListingLine {
                            addr: lc,
                            bytes: bytes.clone(),
                            span: stmt.span.clone(),
                        });
                        cur.bytes.extend(bytes);
                    }
                    Err(e) => {
                        errs.push(e);
                        // Keep region lengths canonical; the image is
                        // discarded when any diagnostic exists.
                        cur.bytes.extend(std::iter::repeat(0).take(isa.word_bytes() as usize));
                    }
                }
                lc += isa.word_bytes();
            }
        }
    }
    close(cur, &mut done);

    // Check regions do not overlap.
    done.sort_by_key(|&(start, _)| start);
    for window in done.windows(2) {
        let [(a_start, a), (b_start, b)] = window else { unreachable!() };
        if a_start + a.bytes.len() as u64 > *b_start {
            errs.push(AsmErr::new(
                AsmErrKind::OverlappingChunks,
                [a.org_span.clone(), b.org_span.clone()],
            ));
        }
    }

    match errs.is_empty() {
        true => Ok(ObjectImage {
            chunks: done.into_iter().collect(),
            listing,
            sym,
            src_info: src.map(SourceInfo::new),
        }),
        false => Err(errs),
    }
}
