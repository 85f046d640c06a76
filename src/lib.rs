//! An ISA-agnostic assembler.
//!
//! This crate translates symbolic assembly source into binary machine code.
//! The target instruction set is not hard-coded: it is loaded from a
//! declarative description ([`spec::Isa`]) which defines the word width,
//! byte order, and the encoding of every instruction.
//!
//! # Usage
//!
//! An assembly run consists of loading an ISA, parsing source code, and
//! assembling the resulting statements:
//! ```
//! use genasm::spec::Isa;
//! use genasm::parse::parse_program;
//! use genasm::asm::{assemble, GapPolicy};
//!
//! let isa = Isa::from_json(r#"{
//!     "wordWidth": 8,
//!     "endianness": "big",
//!     "instructions": [
//!         {
//!             "mnemonic": "ADD",
//!             "operands": [
//!                 { "kind": "register", "width": 2 },
//!                 { "kind": "register", "width": 2 }
//!             ],
//!             "opcode": 1,
//!             "fields": [
//!                 { "name": "opcode", "width": 4, "source": "opcode" },
//!                 { "name": "ra", "width": 2, "source": 0 },
//!                 { "name": "rb", "width": 2, "source": 1 }
//!             ]
//!         }
//!     ]
//! }"#).unwrap();
//!
//! let stmts = parse_program("ADD R1, R2\n").unwrap();
//! let image = assemble(&isa, &stmts).unwrap();
//! assert_eq!(image.binary(GapPolicy::ZeroFill).unwrap(), vec![0x16]);
//! ```
//!
//! The pipeline is strictly sequential per program (lex, parse, pass 1,
//! pass 2, emission), but the [`spec::Isa`] table is immutable after
//! loading, so independent programs can be assembled against the same
//! table from separate threads.
#![warn(missing_docs)]

pub mod spec;
pub mod parse;
pub mod ast;
pub mod asm;
pub mod err;
