//! Numeric literal classification.
//!
//! The lexer only decides *what kind* of number a lexeme is and whether it is
//! well formed; the text is kept verbatim. Turning it into bits is left to
//! whoever consumes the literal, via the `to_*_bits` helpers, so that the
//! parser never has to pick a rounding or NaN policy.
//!
//! ```
//! use wastfront::wat::{classify, LiteralKind};
//!
//! let lit = classify("0x1.8p3").unwrap();
//! assert_eq!(lit.kind, LiteralKind::HexFloat);
//! assert_eq!(lit.text, "0x1.8p3");
//! assert_eq!(lit.to_f64_bits().unwrap(), 12.0f64.to_bits());
//! ```

use crate::opcode::Type;
use fhex::FromHex;
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LiteralKind {
    Int,
    Float,
    HexFloat,
    Infinity,
    Nan,
}

impl fmt::Display for LiteralKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LiteralKind::Int => "integer",
            LiteralKind::Float => "float",
            LiteralKind::HexFloat => "hex float",
            LiteralKind::Infinity => "infinity",
            LiteralKind::Nan => "nan",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LiteralError {
    #[error("malformed number \"{0}\"")]
    Malformed(String),
    #[error("invalid NaN payload in \"{0}\"")]
    NanPayload(String),
    #[error("constant out of range for {ty}: \"{text}\"")]
    OutOfRange { text: String, ty: Type },
    #[error("expected an integer, found {kind} \"{text}\"")]
    NotInteger { text: String, kind: LiteralKind },
}

/// A classified numeric literal and its exact source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Literal<'a> {
    pub kind: LiteralKind,
    pub text: Cow<'a, str>,
}

/// Classifies a numeric lexeme without converting it.
///
/// Accepts an optional sign followed by a decimal or `0x` hex integer, a
/// decimal float (`1.5`, `1e10`), a hex float (`0x1.8p3`), `inf`, `nan` or
/// `nan:0x<hex>`. Underscores are allowed only between two digits.
pub fn classify(text: &str) -> Result<Literal<'_>, LiteralError> {
    let kind = classify_kind(text).ok_or_else(|| LiteralError::Malformed(text.to_string()))?;
    Ok(Literal {
        kind,
        text: Cow::Borrowed(text),
    })
}

fn classify_kind(text: &str) -> Option<LiteralKind> {
    let body = strip_sign(text).1;
    match body {
        "inf" => return Some(LiteralKind::Infinity),
        "nan" => return Some(LiteralKind::Nan),
        _ => {}
    }
    if let Some(payload) = body.strip_prefix("nan:0x") {
        return (digits_end(payload.as_bytes(), 0, 16) == Some(payload.len())).then_some(LiteralKind::Nan);
    }

    let (digits, radix) = match body.strip_prefix("0x") {
        Some(rest) => (rest, 16),
        None => (body, 10),
    };
    let bytes = digits.as_bytes();
    let mut pos = digits_end(bytes, 0, radix)?;
    let mut is_float = false;

    if bytes.get(pos) == Some(&b'.') {
        is_float = true;
        pos += 1;
        if bytes.get(pos).is_some_and(|&b| is_digit(b, radix)) {
            pos = digits_end(bytes, pos, radix)?;
        }
    }

    let exponent_markers: &[u8] = if radix == 16 { b"pP" } else { b"eE" };
    if let Some(b) = bytes.get(pos)
        && exponent_markers.contains(b)
    {
        is_float = true;
        pos += 1;
        if matches!(bytes.get(pos), Some(b'+' | b'-')) {
            pos += 1;
        }
        pos = digits_end(bytes, pos, 10)?;
    }

    if pos != bytes.len() {
        return None;
    }
    Some(match (is_float, radix) {
        (false, _) => LiteralKind::Int,
        (true, 16) => LiteralKind::HexFloat,
        (true, _) => LiteralKind::Float,
    })
}

/// End of a `digit ('_'? digit)*` run starting at `start`, if there is one.
fn digits_end(bytes: &[u8], start: usize, radix: u32) -> Option<usize> {
    if !bytes.get(start).is_some_and(|&b| is_digit(b, radix)) {
        return None;
    }
    let mut pos = start + 1;
    loop {
        match bytes.get(pos) {
            Some(&b) if is_digit(b, radix) => pos += 1,
            Some(b'_') if bytes.get(pos + 1).is_some_and(|&b| is_digit(b, radix)) => pos += 2,
            _ => return Some(pos),
        }
    }
}

fn is_digit(b: u8, radix: u32) -> bool {
    (b as char).is_digit(radix)
}

/// Splits off a leading sign: `(negative, rest)`.
fn strip_sign(text: &str) -> (bool, &str) {
    if let Some(rest) = text.strip_prefix('-') {
        (true, rest)
    } else {
        (false, text.strip_prefix('+').unwrap_or(text))
    }
}

fn without_underscores(text: &str) -> Cow<'_, str> {
    if text.contains('_') {
        Cow::Owned(text.chars().filter(|&c| c != '_').collect())
    } else {
        Cow::Borrowed(text)
    }
}

// ============================================================================
// Consumer-side conversions
// ============================================================================

impl<'a> Literal<'a> {
    /// Copies the text so the literal can outlive the source buffer.
    pub fn into_owned(self) -> Literal<'static> {
        Literal {
            kind: self.kind,
            text: Cow::Owned(self.text.into_owned()),
        }
    }

    pub fn is_negative(&self) -> bool {
        self.text.starts_with('-')
    }

    fn out_of_range(&self, ty: Type) -> LiteralError {
        LiteralError::OutOfRange {
            text: self.text.to_string(),
            ty,
        }
    }

    /// Magnitude and sign of an integer literal.
    fn integer_parts(&self, ty: Type) -> Result<(bool, u64), LiteralError> {
        if self.kind != LiteralKind::Int {
            return Err(LiteralError::NotInteger {
                text: self.text.to_string(),
                kind: self.kind,
            });
        }
        let (negative, body) = strip_sign(&self.text);
        let clean = without_underscores(body);
        let magnitude = match clean.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => clean.parse::<u64>(),
        }
        .map_err(|_| self.out_of_range(ty))?;
        Ok((negative, magnitude))
    }

    /// The 32-bit two's-complement pattern of an integer literal. Accepts the
    /// union of the signed and unsigned ranges.
    pub fn to_u32_bits(&self) -> Result<u32, LiteralError> {
        let (negative, magnitude) = self.integer_parts(Type::I32)?;
        if negative {
            if magnitude > 1 << 31 {
                return Err(self.out_of_range(Type::I32));
            }
            Ok((magnitude as u32).wrapping_neg())
        } else {
            u32::try_from(magnitude).map_err(|_| self.out_of_range(Type::I32))
        }
    }

    /// The 64-bit two's-complement pattern of an integer literal.
    pub fn to_u64_bits(&self) -> Result<u64, LiteralError> {
        let (negative, magnitude) = self.integer_parts(Type::I64)?;
        if negative {
            if magnitude > 1 << 63 {
                return Err(self.out_of_range(Type::I64));
            }
            Ok(magnitude.wrapping_neg())
        } else {
            Ok(magnitude)
        }
    }

    /// IEEE 754 single-precision bits, rounded to nearest.
    ///
    /// `nan` becomes the canonical quiet NaN; `nan:0xP` keeps payload `P`,
    /// which must be non-zero and fit the 23-bit mantissa.
    pub fn to_f32_bits(&self) -> Result<u32, LiteralError> {
        const SIGN: u32 = 1 << 31;
        const EXPONENT: u32 = 0x7f80_0000;
        const MANTISSA: u64 = 0x007f_ffff;

        let (negative, body) = strip_sign(&self.text);
        let sign = if negative { SIGN } else { 0 };
        match self.kind {
            LiteralKind::Infinity => Ok(sign | EXPONENT),
            LiteralKind::Nan => match self.nan_payload(body, MANTISSA)? {
                None => Ok(sign | EXPONENT | 0x0040_0000),
                Some(payload) => Ok(sign | EXPONENT | payload as u32),
            },
            LiteralKind::Int | LiteralKind::Float | LiteralKind::HexFloat => {
                let clean = without_underscores(body);
                let value = match clean.strip_prefix("0x") {
                    Some(_) => f32::from_hex(&hex_float_text(&clean)).unwrap_or(f32::NAN),
                    None => clean.parse::<f32>().unwrap_or(f32::NAN),
                };
                if !value.is_finite() {
                    return Err(self.out_of_range(Type::F32));
                }
                Ok(sign | value.to_bits())
            }
        }
    }

    /// IEEE 754 double-precision bits. NaN handling as for [`Self::to_f32_bits`]
    /// with a 52-bit mantissa.
    pub fn to_f64_bits(&self) -> Result<u64, LiteralError> {
        const SIGN: u64 = 1 << 63;
        const EXPONENT: u64 = 0x7ff0_0000_0000_0000;
        const MANTISSA: u64 = 0x000f_ffff_ffff_ffff;

        let (negative, body) = strip_sign(&self.text);
        let sign = if negative { SIGN } else { 0 };
        match self.kind {
            LiteralKind::Infinity => Ok(sign | EXPONENT),
            LiteralKind::Nan => match self.nan_payload(body, MANTISSA)? {
                None => Ok(sign | EXPONENT | 0x0008_0000_0000_0000),
                Some(payload) => Ok(sign | EXPONENT | payload),
            },
            LiteralKind::Int | LiteralKind::Float | LiteralKind::HexFloat => {
                let clean = without_underscores(body);
                let value = match clean.strip_prefix("0x") {
                    Some(_) => f64::from_hex(&hex_float_text(&clean)).unwrap_or(f64::NAN),
                    None => clean.parse::<f64>().unwrap_or(f64::NAN),
                };
                if !value.is_finite() {
                    return Err(self.out_of_range(Type::F64));
                }
                Ok(sign | value.to_bits())
            }
        }
    }

    /// `None` for a bare `nan`, otherwise the validated explicit payload.
    fn nan_payload(&self, body: &str, mantissa: u64) -> Result<Option<u64>, LiteralError> {
        let Some(hex) = body.strip_prefix("nan:0x") else {
            return Ok(None);
        };
        let payload = u64::from_str_radix(&without_underscores(hex), 16)
            .map_err(|_| LiteralError::NanPayload(self.text.to_string()))?;
        if payload == 0 || payload > mantissa {
            return Err(LiteralError::NanPayload(self.text.to_string()));
        }
        Ok(Some(payload))
    }
}

/// Hex float text with an explicit binary exponent.
fn hex_float_text(clean: &str) -> String {
    if clean.contains(['p', 'P']) {
        clean.to_string()
    } else {
        format!("{clean}p0")
    }
}

impl fmt::Display for Literal<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(text: &str) -> Option<LiteralKind> {
        classify(text).ok().map(|l| l.kind)
    }

    #[test]
    fn classifies_each_kind() {
        assert_eq!(kind("42"), Some(LiteralKind::Int));
        assert_eq!(kind("-0x1F"), Some(LiteralKind::Int));
        assert_eq!(kind("1_000"), Some(LiteralKind::Int));
        assert_eq!(kind("1.5"), Some(LiteralKind::Float));
        assert_eq!(kind("1."), Some(LiteralKind::Float));
        assert_eq!(kind("+1e-10"), Some(LiteralKind::Float));
        assert_eq!(kind("0x1.8p3"), Some(LiteralKind::HexFloat));
        assert_eq!(kind("0x1p-2"), Some(LiteralKind::HexFloat));
        assert_eq!(kind("-inf"), Some(LiteralKind::Infinity));
        assert_eq!(kind("nan"), Some(LiteralKind::Nan));
        assert_eq!(kind("-nan:0x7f_ffff"), Some(LiteralKind::Nan));
    }

    #[test]
    fn rejects_malformed_numbers() {
        for text in ["1_", "_1", "1__0", "0x", "1e", "1.e+", "0x1.8e3z", "12abc", "nan:0x", "nan:0xg", "--1"] {
            assert!(classify(text).is_err(), "{text} should be rejected");
        }
    }

    #[test]
    fn hex_float_text_is_preserved() {
        let lit = classify("0x1.8p3").unwrap();
        assert_eq!(lit.kind, LiteralKind::HexFloat);
        assert_eq!(lit.text, "0x1.8p3");
        let owned = lit.into_owned();
        assert_eq!(owned.to_string(), "0x1.8p3");
    }

    #[test]
    fn integer_bits() {
        assert_eq!(classify("-1").unwrap().to_u32_bits(), Ok(0xffff_ffff));
        assert_eq!(classify("0xffffffff").unwrap().to_u32_bits(), Ok(0xffff_ffff));
        assert_eq!(classify("-2147483648").unwrap().to_u32_bits(), Ok(0x8000_0000));
        assert!(classify("4294967296").unwrap().to_u32_bits().is_err());
        assert!(classify("-2147483649").unwrap().to_u32_bits().is_err());
        assert_eq!(
            classify("-9223372036854775808").unwrap().to_u64_bits(),
            Ok(0x8000_0000_0000_0000)
        );
        assert!(matches!(
            classify("1.5").unwrap().to_u32_bits(),
            Err(LiteralError::NotInteger { .. })
        ));
    }

    #[test]
    fn float_bits() {
        assert_eq!(classify("1.5").unwrap().to_f32_bits(), Ok(1.5f32.to_bits()));
        assert_eq!(classify("-0x1p-1").unwrap().to_f32_bits(), Ok((-0.5f32).to_bits()));
        assert_eq!(classify("0x10").unwrap().to_f64_bits(), Ok(16.0f64.to_bits()));
        assert_eq!(classify("-inf").unwrap().to_f32_bits(), Ok(0xff80_0000));
        assert!(classify("1e40").unwrap().to_f32_bits().is_err());
    }

    #[test]
    fn nan_bits() {
        assert_eq!(classify("nan").unwrap().to_f32_bits(), Ok(0x7fc0_0000));
        assert_eq!(classify("-nan").unwrap().to_f64_bits(), Ok(0xfff8_0000_0000_0000));
        assert_eq!(classify("nan:0x1").unwrap().to_f32_bits(), Ok(0x7f80_0001));
        assert!(classify("nan:0x0").unwrap().to_f32_bits().is_err());
        assert!(classify("nan:0x800000").unwrap().to_f32_bits().is_err());
        assert!(classify("nan:0x800000").unwrap().to_f64_bits().is_ok());
    }
}
