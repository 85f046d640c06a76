//! Loading declarative ISA descriptions into validated instruction tables.
//!
//! The assembler does not hard-code a target architecture. Instead, a JSON
//! document describes the machine: its word width, its byte order, and the
//! encoding of every instruction. This module deserializes that document
//! and validates it eagerly, so that the encoder can assume every
//! [`InstructionSpec`] it reads is internally consistent.
//!
//! The top-level document looks like:
//! ```json
//! {
//!     "wordWidth": 16,
//!     "endianness": "little",
//!     "instructions": [
//!         {
//!             "mnemonic": "ADD",
//!             "operands": [
//!                 { "kind": "register", "width": 3 },
//!                 { "kind": "immediate", "width": 9, "signed": true }
//!             ],
//!             "opcode": 9,
//!             "fields": [
//!                 { "name": "opcode", "width": 4, "source": "opcode" },
//!                 { "name": "dr", "width": 3, "source": 0 },
//!                 { "name": "imm", "width": 9, "source": 1 }
//!             ]
//!         }
//!     ]
//! }
//! ```
//!
//! A load failure ([`SpecError`]) is fatal: the pipeline does not proceed
//! to lexing without a valid table.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

/// Byte order of multi-byte words in the output image.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
}

/// The syntactic class an operand slot accepts.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperandKind {
    /// A register reference (`R3`).
    Register,
    /// A numeric literal. Also accepts a label, resolved to its
    /// absolute address.
    Immediate,
    /// A label reference, resolved to an absolute address or a
    /// PC-relative offset depending on the pattern's signedness.
    Label,
    /// A bracketed memory reference (`[0x20]`, `[buf]`).
    #[serde(rename = "memory-reference", alias = "memory")]
    Memory,
}

/// The declared kind, width, and signedness of one operand slot.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperandPattern {
    /// The syntactic class this slot accepts.
    pub kind: OperandKind,
    /// Bit width of the encoded value.
    pub width: u32,
    /// Whether the encoded value is two's complement signed.
    ///
    /// For `label` operands this also selects the resolution mode:
    /// signed label slots encode a relative offset from the instruction's
    /// address, unsigned ones encode the absolute address.
    #[serde(default)]
    pub signed: bool,
}

/// Where a field's bits come from.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum FieldSource {
    /// The instruction's constant opcode bits.
    Opcode,
    /// The resolved value of the operand at this index.
    Operand(usize),
}

// `source` is either the string "opcode" or an operand index,
// so the derive can't express it.
impl<'de> Deserialize<'de> for FieldSource {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct V;
        impl<'de> serde::de::Visitor<'de> for V {
            type Value = FieldSource;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("\"opcode\" or an operand index")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<FieldSource, E> {
                match v {
                    "opcode" => Ok(FieldSource::Opcode),
                    _ => Err(E::invalid_value(serde::de::Unexpected::Str(v), &self)),
                }
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<FieldSource, E> {
                usize::try_from(v)
                    .map(FieldSource::Operand)
                    .map_err(|_| E::invalid_value(serde::de::Unexpected::Unsigned(v), &self))
            }
        }
        deserializer.deserialize_any(V)
    }
}

/// One bit-range of an encoded word.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Field {
    /// Name of the field, used in diagnostics.
    pub name: String,
    /// Bit width of the field.
    pub width: u32,
    /// Where the field's bits come from.
    pub source: FieldSource,
}

/// The encoding of one instruction form.
///
/// A mnemonic may have several `InstructionSpec`s, distinguished by their
/// operand shapes; the encoder selects among them by matching a source
/// instruction's operand kinds and count.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstructionSpec {
    /// The instruction's symbolic name.
    pub mnemonic: String,
    /// The ordered operand slots this form expects.
    #[serde(default)]
    pub operands: Vec<OperandPattern>,
    /// The constant bits identifying this form, distributed across the
    /// opcode-sourced fields in declaration order.
    pub opcode: u64,
    /// The ordered bit-ranges composing the encoded word,
    /// first field in the most significant bits.
    pub fields: Vec<Field>,
}
impl InstructionSpec {
    /// The operand-kind tuple that identifies this form under its mnemonic.
    pub(crate) fn shape(&self) -> Vec<OperandKind> {
        self.operands.iter().map(|p| p.kind).collect()
    }

    /// Total width of the opcode-sourced fields.
    pub(crate) fn opcode_bits(&self) -> u32 {
        self.fields
            .iter()
            .filter(|f| f.source == FieldSource::Opcode)
            .map(|f| f.width)
            .sum()
    }
}

/// Errors raised while loading an ISA description.
#[derive(Debug)]
pub enum SpecError {
    /// The document is not well-formed JSON or fails the schema.
    Malformed(serde_json::Error),
    /// The word width is zero, exceeds 64 bits, or is not a whole
    /// number of bytes.
    InvalidWordWidth(u32),
    /// An instruction's field widths do not sum to the word width.
    FieldWidthMismatch {
        /// Mnemonic of the offending instruction.
        mnemonic: String,
        /// Sum of the declared field widths.
        sum: u32,
        /// The ISA's word width.
        word_width: u32,
    },
    /// Two instruction forms share a mnemonic and operand-kind shape.
    DuplicateEncoding {
        /// The shared mnemonic.
        mnemonic: String,
    },
    /// An operand pattern's width is zero or exceeds the word width.
    InvalidOperandWidth {
        /// Mnemonic of the offending instruction.
        mnemonic: String,
        /// The offending width.
        width: u32,
    },
    /// A field's width is zero.
    InvalidFieldWidth {
        /// Mnemonic of the offending instruction.
        mnemonic: String,
        /// Name of the offending field.
        field: String,
    },
    /// A field names an operand index that does not exist.
    UnknownFieldOperand {
        /// Mnemonic of the offending instruction.
        mnemonic: String,
        /// Name of the offending field.
        field: String,
        /// The out-of-bounds operand index.
        index: usize,
    },
    /// An opcode value does not fit in the opcode-sourced fields.
    OpcodeTooWide {
        /// Mnemonic of the offending instruction.
        mnemonic: String,
    },
}
impl std::fmt::Display for SpecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpecError::Malformed(e) => write!(f, "malformed ISA description: {e}"),
            SpecError::InvalidWordWidth(w) => {
                write!(f, "word width {w} is not a positive multiple of 8 bits (at most 64)")
            }
            SpecError::FieldWidthMismatch { mnemonic, sum, word_width } => {
                write!(f, "fields of '{mnemonic}' sum to {sum} bits, expected word width {word_width}")
            }
            SpecError::DuplicateEncoding { mnemonic } => {
                write!(f, "'{mnemonic}' declares two encodings with the same operand shape")
            }
            SpecError::InvalidOperandWidth { mnemonic, width } => {
                write!(f, "operand width {width} of '{mnemonic}' is not between 1 and the word width")
            }
            SpecError::InvalidFieldWidth { mnemonic, field } => {
                write!(f, "field '{field}' of '{mnemonic}' has zero width")
            }
            SpecError::UnknownFieldOperand { mnemonic, field, index } => {
                write!(f, "field '{field}' of '{mnemonic}' names operand {index}, which does not exist")
            }
            SpecError::OpcodeTooWide { mnemonic } => {
                write!(f, "opcode of '{mnemonic}' does not fit its opcode field(s)")
            }
        }
    }
}
impl std::error::Error for SpecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SpecError::Malformed(e) => Some(e),
            _ => None,
        }
    }
}
impl crate::err::Error for SpecError {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            SpecError::Malformed(_) => None,
            SpecError::InvalidWordWidth(_) => {
                Some("the address counter advances in bytes, so words must be 8, 16, .., 64 bits".into())
            }
            SpecError::FieldWidthMismatch { .. } => {
                Some("every bit of the encoded word must be covered by exactly one field".into())
            }
            SpecError::DuplicateEncoding { .. } => {
                Some("two forms of one mnemonic must differ in operand count or kinds".into())
            }
            SpecError::InvalidOperandWidth { .. } => None,
            SpecError::InvalidFieldWidth { .. } => None,
            SpecError::UnknownFieldOperand { .. } => {
                Some("operand indices are zero-based positions in the instruction's operand list".into())
            }
            SpecError::OpcodeTooWide { .. } => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawIsa {
    word_width: u32,
    endianness: Endian,
    instructions: Vec<InstructionSpec>,
}

/// A validated, immutable instruction set description.
///
/// Built once per assembler invocation via [`Isa::from_json`] and shared
/// read-only by the encoder. The table holds no interior mutability, so it
/// can be shared across threads assembling independent programs.
#[derive(Debug, Clone)]
pub struct Isa {
    word_width: u32,
    endianness: Endian,
    /// Instruction forms grouped by uppercased mnemonic.
    table: HashMap<String, Vec<InstructionSpec>>,
}

impl Isa {
    /// Loads and validates an ISA description from its JSON text.
    pub fn from_json(text: &str) -> Result<Self, SpecError> {
        let raw: RawIsa = serde_json::from_str(text).map_err(SpecError::Malformed)?;
        Self::validate(raw)
    }

    fn validate(raw: RawIsa) -> Result<Self, SpecError> {
        let RawIsa { word_width, endianness, instructions } = raw;

        if word_width == 0 || word_width > 64 || word_width % 8 != 0 {
            return Err(SpecError::InvalidWordWidth(word_width));
        }

        let mut table: HashMap<String, Vec<InstructionSpec>> = HashMap::new();
        let mut shapes: HashSet<(String, Vec<OperandKind>)> = HashSet::new();

        for instr in instructions {
            let mnemonic = instr.mnemonic.to_uppercase();

            for pat in &instr.operands {
                if pat.width == 0 || pat.width > word_width {
                    return Err(SpecError::InvalidOperandWidth {
                        mnemonic: instr.mnemonic.clone(),
                        width: pat.width,
                    });
                }
            }

            let sum: u32 = instr.fields.iter().map(|f| f.width).sum();
            if sum != word_width {
                return Err(SpecError::FieldWidthMismatch {
                    mnemonic: instr.mnemonic.clone(),
                    sum,
                    word_width,
                });
            }

            for field in &instr.fields {
                if field.width == 0 {
                    return Err(SpecError::InvalidFieldWidth {
                        mnemonic: instr.mnemonic.clone(),
                        field: field.name.clone(),
                    });
                }
                if let FieldSource::Operand(i) = field.source {
                    if i >= instr.operands.len() {
                        return Err(SpecError::UnknownFieldOperand {
                            mnemonic: instr.mnemonic.clone(),
                            field: field.name.clone(),
                            index: i,
                        });
                    }
                }
            }

            let op_bits = instr.opcode_bits();
            if op_bits < 64 && instr.opcode >> op_bits != 0 {
                return Err(SpecError::OpcodeTooWide { mnemonic: instr.mnemonic.clone() });
            }

            if !shapes.insert((mnemonic.clone(), instr.shape())) {
                return Err(SpecError::DuplicateEncoding { mnemonic: instr.mnemonic.clone() });
            }

            table.entry(mnemonic).or_default().push(instr);
        }

        Ok(Isa { word_width, endianness, table })
    }

    /// The machine's word width, in bits.
    pub fn word_width(&self) -> u32 {
        self.word_width
    }

    /// The machine's word width, in bytes.
    pub fn word_bytes(&self) -> u64 {
        u64::from(self.word_width / 8)
    }

    /// The machine's byte order.
    pub fn endianness(&self) -> Endian {
        self.endianness
    }

    /// All instruction forms registered under a mnemonic
    /// (case-insensitive). Empty if the mnemonic is unknown.
    pub fn lookup(&self, mnemonic: &str) -> &[InstructionSpec] {
        self.table
            .get(&mnemonic.to_uppercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::{Endian, FieldSource, Isa, OperandKind, SpecError};

    fn load(text: &str) -> Result<Isa, SpecError> {
        Isa::from_json(text)
    }

    #[test]
    fn test_load_basic() {
        let isa = load(r#"{
            "wordWidth": 8,
            "endianness": "big",
            "instructions": [
                {
                    "mnemonic": "add",
                    "operands": [
                        { "kind": "register", "width": 2 },
                        { "kind": "register", "width": 2 }
                    ],
                    "opcode": 1,
                    "fields": [
                        { "name": "opcode", "width": 4, "source": "opcode" },
                        { "name": "ra", "width": 2, "source": 0 },
                        { "name": "rb", "width": 2, "source": 1 }
                    ]
                }
            ]
        }"#).unwrap();

        assert_eq!(isa.word_width(), 8);
        assert_eq!(isa.word_bytes(), 1);
        assert_eq!(isa.endianness(), Endian::Big);

        // Mnemonic lookup is case-insensitive.
        let specs = isa.lookup("ADD");
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].opcode, 1);
        assert_eq!(specs[0].shape(), vec![OperandKind::Register, OperandKind::Register]);
        assert_eq!(specs[0].fields[0].source, FieldSource::Opcode);
        assert_eq!(specs[0].fields[1].source, FieldSource::Operand(0));
        assert!(isa.lookup("SUB").is_empty());
    }

    #[test]
    fn test_overloaded_mnemonic() {
        let isa = load(r#"{
            "wordWidth": 8,
            "endianness": "big",
            "instructions": [
                {
                    "mnemonic": "MOV",
                    "operands": [
                        { "kind": "register", "width": 2 },
                        { "kind": "register", "width": 2 }
                    ],
                    "opcode": 2,
                    "fields": [
                        { "name": "opcode", "width": 4, "source": "opcode" },
                        { "name": "ra", "width": 2, "source": 0 },
                        { "name": "rb", "width": 2, "source": 1 }
                    ]
                },
                {
                    "mnemonic": "MOV",
                    "operands": [
                        { "kind": "register", "width": 2 },
                        { "kind": "immediate", "width": 2 }
                    ],
                    "opcode": 3,
                    "fields": [
                        { "name": "opcode", "width": 4, "source": "opcode" },
                        { "name": "ra", "width": 2, "source": 0 },
                        { "name": "imm", "width": 2, "source": 1 }
                    ]
                }
            ]
        }"#).unwrap();

        assert_eq!(isa.lookup("MOV").len(), 2);
    }

    #[test]
    fn test_field_width_mismatch() {
        let r = load(r#"{
            "wordWidth": 8,
            "endianness": "big",
            "instructions": [
                {
                    "mnemonic": "NOP",
                    "opcode": 0,
                    "fields": [ { "name": "opcode", "width": 6, "source": "opcode" } ]
                }
            ]
        }"#);
        assert!(matches!(r, Err(SpecError::FieldWidthMismatch { sum: 6, word_width: 8, .. })));
    }

    #[test]
    fn test_duplicate_encoding() {
        let r = load(r#"{
            "wordWidth": 8,
            "endianness": "big",
            "instructions": [
                {
                    "mnemonic": "NOP",
                    "opcode": 0,
                    "fields": [ { "name": "opcode", "width": 8, "source": "opcode" } ]
                },
                {
                    "mnemonic": "nop",
                    "opcode": 1,
                    "fields": [ { "name": "opcode", "width": 8, "source": "opcode" } ]
                }
            ]
        }"#);
        assert!(matches!(r, Err(SpecError::DuplicateEncoding { .. })));
    }

    #[test]
    fn test_invalid_operand_width() {
        let r = load(r#"{
            "wordWidth": 8,
            "endianness": "big",
            "instructions": [
                {
                    "mnemonic": "LD",
                    "operands": [ { "kind": "immediate", "width": 9 } ],
                    "opcode": 0,
                    "fields": [ { "name": "imm", "width": 8, "source": 0 } ]
                }
            ]
        }"#);
        assert!(matches!(r, Err(SpecError::InvalidOperandWidth { width: 9, .. })));
    }

    #[test]
    fn test_invalid_word_width() {
        for w in [0, 12, 72] {
            let r = load(&format!(r#"{{
                "wordWidth": {w},
                "endianness": "little",
                "instructions": []
            }}"#));
            assert!(matches!(r, Err(SpecError::InvalidWordWidth(_))), "width {w} should fail");
        }
    }

    #[test]
    fn test_invalid_field_width() {
        let r = load(r#"{
            "wordWidth": 8,
            "endianness": "big",
            "instructions": [
                {
                    "mnemonic": "NOP",
                    "opcode": 0,
                    "fields": [
                        { "name": "pad", "width": 0, "source": "opcode" },
                        { "name": "opcode", "width": 8, "source": "opcode" }
                    ]
                }
            ]
        }"#);
        assert!(matches!(r, Err(SpecError::InvalidFieldWidth { .. })));
    }

    #[test]
    fn test_unknown_field_operand() {
        let r = load(r#"{
            "wordWidth": 8,
            "endianness": "big",
            "instructions": [
                {
                    "mnemonic": "JMP",
                    "operands": [ { "kind": "label", "width": 4 } ],
                    "opcode": 4,
                    "fields": [
                        { "name": "opcode", "width": 4, "source": "opcode" },
                        { "name": "target", "width": 4, "source": 1 }
                    ]
                }
            ]
        }"#);
        assert!(matches!(r, Err(SpecError::UnknownFieldOperand { index: 1, .. })));
    }

    #[test]
    fn test_opcode_too_wide() {
        let r = load(r#"{
            "wordWidth": 8,
            "endianness": "big",
            "instructions": [
                {
                    "mnemonic": "HALT",
                    "operands": [ { "kind": "immediate", "width": 4 } ],
                    "opcode": 31,
                    "fields": [
                        { "name": "opcode", "width": 4, "source": "opcode" },
                        { "name": "imm", "width": 4, "source": 0 }
                    ]
                }
            ]
        }"#);
        assert!(matches!(r, Err(SpecError::OpcodeTooWide { .. })));
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(load("not json"), Err(SpecError::Malformed(_))));
        assert!(matches!(
            load(r#"{ "wordWidth": 8, "instructions": [] }"#),
            Err(SpecError::Malformed(_))
        ));
        // `source` must be "opcode" or an index.
        assert!(matches!(
            load(r#"{
                "wordWidth": 8,
                "endianness": "big",
                "instructions": [
                    {
                        "mnemonic": "NOP",
                        "opcode": 0,
                        "fields": [ { "name": "x", "width": 8, "source": "operand" } ]
                    }
                ]
            }"#),
            Err(SpecError::Malformed(_))
        ));
    }
}
