//! Serializing [`ObjectImage`]s into interchange formats.
//!
//! This module provides the [`ImageFormat`] trait and two implementations:
//! - [`BinaryFormat`]: the flat byte image, starting at address zero
//! - [`HexTextFormat`]: a plain-text hex dump of the same image
//!
//! Both formats flatten the image first, so the chosen [`GapPolicy`]
//! decides whether `.org` gaps are zero-filled or fatal.

use std::fmt::Write as _;

use crate::asm::{AsmErr, GapPolicy, ObjectImage};

/// A serialization format for assembled images.
pub trait ImageFormat {
    /// The stream type this format serializes to.
    type Stream: ToOwned + ?Sized;

    /// Serializes the image into this format's stream type.
    fn serialize(
        img: &ObjectImage,
        gaps: GapPolicy,
    ) -> Result<<Self::Stream as ToOwned>::Owned, AsmErr>;
}

/// The flat binary image.
///
/// Bytes appear at their assembled addresses, starting from address zero.
pub struct BinaryFormat;
impl ImageFormat for BinaryFormat {
    type Stream = [u8];

    fn serialize(img: &ObjectImage, gaps: GapPolicy) -> Result<Vec<u8>, AsmErr> {
        img.binary(gaps)
    }
}

/// A plain-text hex dump of the flat image.
///
/// Each byte renders as two uppercase hex digits; bytes are separated by
/// spaces, sixteen to a line.
pub struct HexTextFormat;
impl ImageFormat for HexTextFormat {
    type Stream = str;

    fn serialize(img: &ObjectImage, gaps: GapPolicy) -> Result<String, AsmErr> {
        let bytes = img.binary(gaps)?;
        let mut out = String::new();
        for line in bytes.chunks(16) {
            for (i, b) in line.iter().enumerate() {
                let _ = match i {
                    0 => write!(out, "{b:02X}"),
                    _ => write!(out, " {b:02X}"),
                };
            }
            out.push('\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use crate::asm::encoding::{BinaryFormat, HexTextFormat, ImageFormat};
    use crate::asm::{assemble, GapPolicy};
    use crate::parse::parse_program;
    use crate::spec::Isa;

    fn byte_isa() -> Isa {
        Isa::from_json(r#"{
            "wordWidth": 8,
            "endianness": "big",
            "instructions": []
        }"#)
        .unwrap()
    }

    #[test]
    fn test_binary_format() {
        let stmts = parse_program(".byte 1, 2, 3\n").unwrap();
        let img = assemble(&byte_isa(), &stmts).unwrap();
        assert_eq!(
            BinaryFormat::serialize(&img, GapPolicy::ZeroFill).unwrap(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_hex_text_format() {
        let stmts = parse_program(".byte 0, 22, 255\n").unwrap();
        let img = assemble(&byte_isa(), &stmts).unwrap();
        assert_eq!(
            HexTextFormat::serialize(&img, GapPolicy::ZeroFill).unwrap(),
            "00 16 FF\n"
        );
    }

    #[test]
    fn test_hex_text_wraps_lines() {
        let src = format!(".byte {}\n", vec!["1"; 20].join(", "));
        let stmts = parse_program(&src).unwrap();
        let img = assemble(&byte_isa(), &stmts).unwrap();
        let text = HexTextFormat::serialize(&img, GapPolicy::ZeroFill).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].split(' ').count(), 16);
        assert_eq!(lines[1].split(' ').count(), 4);
    }

    #[test]
    fn test_hex_text_respects_gap_policy() {
        let stmts = parse_program(".org 4\n.byte 9\n").unwrap();
        let img = assemble(&byte_isa(), &stmts).unwrap();
        assert_eq!(
            HexTextFormat::serialize(&img, GapPolicy::ZeroFill).unwrap(),
            "00 00 00 00 09\n"
        );
        assert!(HexTextFormat::serialize(&img, GapPolicy::Deny).is_err());
    }
}
