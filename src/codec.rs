//! Raw register words <-> typed engineering values.
//!
//! Multi-word integers are big-endian by word: the first register holds the
//! high 16 bits. Strings are big-endian byte pairs padded with NULs.

use crate::error::{Error, Result};
use crate::register::{RegisterDescriptor, Scale, WireType};
use crate::snapshot::Value;

pub fn decode_u16(word: u16) -> u16 {
    word
}

pub fn decode_i16(word: u16) -> i16 {
    word as i16
}

pub fn decode_u32(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

pub fn decode_i32(high: u16, low: u16) -> i32 {
    decode_u32(high, low) as i32
}

pub fn decode_string(words: &[u16]) -> String {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

pub fn decode_bitfield16(word: u16, bit: Option<u8>) -> Value {
    bitfield(u32::from(word), 16, bit)
}

pub fn decode_bitfield32(words: [u16; 2], bit: Option<u8>) -> Value {
    bitfield(decode_u32(words[0], words[1]), 32, bit)
}

fn bitfield(raw: u32, width: u32, bit: Option<u8>) -> Value {
    match bit {
        Some(bit) => Value::Flag(u32::from(bit) < width && raw & (1 << bit) != 0),
        None => Value::Bitfield(raw),
    }
}

pub fn apply_scale(raw: i64, scale: Scale) -> f64 {
    match scale {
        Scale::Divide(1) | Scale::Multiply(1) => raw as f64,
        Scale::Divide(by) => raw as f64 / f64::from(by),
        Scale::Multiply(by) => raw as f64 * f64::from(by),
    }
}

/// Inverse of [`apply_scale`]: engineering value -> raw integer (unclamped).
pub fn remove_scale(value: f64, scale: Scale) -> f64 {
    let raw = match scale {
        Scale::Divide(by) => value * f64::from(by),
        Scale::Multiply(by) => value / f64::from(by),
    };
    raw.round()
}

/// Representable raw range of a numeric wire type.
pub fn raw_range(wire_type: WireType) -> (i64, i64) {
    match wire_type {
        WireType::U16 | WireType::Bitfield16 => (0, i64::from(u16::MAX)),
        WireType::I16 => (i64::from(i16::MIN), i64::from(i16::MAX)),
        WireType::U32 | WireType::Bitfield32 => (0, i64::from(u32::MAX)),
        WireType::I32 => (i64::from(i32::MIN), i64::from(i32::MAX)),
        WireType::String(_) => (0, 0),
    }
}

/// Clamps an engineering value to what the register can carry.
pub fn clamp(value: f64, descriptor: &RegisterDescriptor) -> f64 {
    let (min, max) = raw_range(descriptor.wire_type);
    let raw = remove_scale(value, descriptor.scale).clamp(min as f64, max as f64);
    apply_scale(raw as i64, descriptor.scale)
}

/// Decodes the words of one register into its engineering value.
///
/// `words` must be exactly the register's words.
pub fn decode(descriptor: &RegisterDescriptor, words: &[u16]) -> Result<Value> {
    let expected = usize::from(descriptor.word_count());
    if words.len() != expected {
        return Err(Error::Decode {
            register: descriptor.name.to_string(),
            reason: format!("expected {} words, got {}", expected, words.len()),
        });
    }

    if let Some(bit) = descriptor.bit {
        let flag = match descriptor.wire_type {
            WireType::U16 | WireType::I16 | WireType::Bitfield16 => {
                decode_bitfield16(words[0], Some(bit))
            }
            WireType::U32 | WireType::I32 | WireType::Bitfield32 => {
                decode_bitfield32([words[0], words[1]], Some(bit))
            }
            WireType::String(_) => {
                return Err(Error::Decode {
                    register: descriptor.name.to_string(),
                    reason: "bit alias over a string register".to_string(),
                })
            }
        };
        return Ok(match flag {
            Value::Flag(on) => Value::Flag(on != descriptor.invert),
            other => other,
        });
    }

    let raw = match descriptor.wire_type {
        WireType::U16 => i64::from(decode_u16(words[0])),
        WireType::I16 => i64::from(decode_i16(words[0])),
        WireType::U32 => i64::from(decode_u32(words[0], words[1])),
        WireType::I32 => i64::from(decode_i32(words[0], words[1])),
        WireType::Bitfield16 => return Ok(decode_bitfield16(words[0], None)),
        WireType::Bitfield32 => return Ok(decode_bitfield32([words[0], words[1]], None)),
        WireType::String(_) => return Ok(Value::Text(decode_string(words))),
    };

    Ok(Value::Number(apply_scale(raw, descriptor.scale)))
}

/// Encodes an engineering value for writing to `descriptor`.
///
/// Values outside the register's range are clamped rather than rejected,
/// so writing -5 to an unsigned register stores 0. Negative 32-bit values
/// are sent as two's complement, high word first.
pub fn encode_for_write(value: f64, descriptor: &RegisterDescriptor) -> Result<Vec<u16>> {
    if !value.is_finite() {
        return Err(Error::validation(format!(
            "{} is not a number that {} can hold",
            value, descriptor.name
        )));
    }
    if descriptor.bit.is_some() {
        return Err(Error::validation(format!(
            "{} is a single-bit view and cannot be written on its own",
            descriptor.name
        )));
    }
    if let WireType::String(_) = descriptor.wire_type {
        return Err(Error::validation(format!(
            "{} is a text register",
            descriptor.name
        )));
    }

    let (min, max) = raw_range(descriptor.wire_type);
    let raw = (remove_scale(value, descriptor.scale) as i64).clamp(min, max);

    Ok(encode_raw(raw, descriptor.wire_type))
}

/// Splits an already clamped raw integer into register words.
pub fn encode_raw(raw: i64, wire_type: WireType) -> Vec<u16> {
    match wire_type.word_count() {
        1 => vec![raw as u16],
        _ => {
            let bits = raw as u32;
            vec![(bits >> 16) as u16, bits as u16]
        }
    }
}
