//! Check-in code codec
//!
//! Encodes a (person, instance) pair into a short code an operator can read
//! off a label and type back in at pickup.
//!
//! Layout:
//! - packed = [instance:15][person:15] (30 bits, both ids reduced mod 32768)
//! - 6 symbols: packed in the alphabet radix, most significant first
//! - 1 symbol: checksum (sum of nibbles of packed, mod radix)
//! - Display: XXX-XXXX
//!
//! The alphabet drops the visually ambiguous 0/O and 1/I/L. Codes printed on
//! existing labels depend on the exact alphabet, radix and checksum below.

use crate::domain::types::{DecodedCode, InstanceId, PersonId};

/// Symbols in value order. Digits 2-9, then A-Z without I, L and O.
pub const ALPHABET: &[u8; 31] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZ";

/// Radix of the code (alphabet length)
pub const BASE: u32 = ALPHABET.len() as u32;

/// Number of data symbols before the checksum
pub const DATA_SYMBOLS: usize = 6;

/// Total symbols in a normalized code
pub const CODE_LEN: usize = DATA_SYMBOLS + 1;

/// Mask for the 15 significant bits of each identifier
pub const ID_MASK: u64 = 0x7FFF;

/// Packed values below this bound survive the 6-symbol encoding (31^6)
pub const CODE_WINDOW: u32 = BASE.pow(DATA_SYMBOLS as u32);

#[inline]
fn pack(person_id: u64, instance_id: u64) -> u32 {
    (((instance_id & ID_MASK) << 15) | (person_id & ID_MASK)) as u32
}

/// Alphabet index of a normalized (uppercase) symbol
#[inline]
fn symbol_index(c: u8) -> Option<u32> {
    ALPHABET.iter().position(|&s| s == c).map(|i| i as u32)
}

/// Sum of base-16 nibbles, reduced modulo the radix
pub fn checksum(value: u32) -> u32 {
    let mut total = 0u32;
    let mut rest = value;
    while rest != 0 {
        total += rest & 0xF;
        rest >>= 4;
    }
    total % BASE
}

/// True when the pair round-trips through generate/decode
///
/// Pairs whose 15-bit instance is above 27083 can overflow the six data
/// symbols; generate still returns a well-formed code for them but decode
/// usually rejects it.
pub fn is_representable(person_id: u64, instance_id: u64) -> bool {
    pack(person_id, instance_id) < CODE_WINDOW
}

/// Generate the display code (`XXX-XXXX`) for a person at an event instance
pub fn generate(person_id: u64, instance_id: u64) -> String {
    let packed = pack(person_id, instance_id);

    let mut symbols = [0u8; CODE_LEN];
    let mut rest = packed;
    for slot in symbols[..DATA_SYMBOLS].iter_mut().rev() {
        *slot = ALPHABET[(rest % BASE) as usize];
        rest /= BASE;
    }
    symbols[DATA_SYMBOLS] = ALPHABET[checksum(packed) as usize];

    // Alphabet is ASCII, so the byte slice is valid UTF-8
    let raw: String = symbols.iter().map(|&b| b as char).collect();
    format_code(&raw)
}

/// Typed convenience wrapper around [`generate`]
pub fn generate_for(person_id: PersonId, instance_id: InstanceId) -> String {
    generate(person_id.0, instance_id.0)
}

/// Uppercase and strip dashes and spaces
pub fn normalize(code: &str) -> String {
    code.chars().filter(|c| *c != '-' && *c != ' ').flat_map(char::to_uppercase).collect()
}

/// Insert the display dash after the third symbol of a normalized code
pub fn format_code(normalized: &str) -> String {
    match normalized.char_indices().nth(3) {
        Some((split, _)) => format!("{}-{}", &normalized[..split], &normalized[split..]),
        None => normalized.to_string(),
    }
}

/// Decode a code back to its (person, instance) pair
///
/// Returns `None` for wrong length, characters outside the alphabet, or a
/// checksum mismatch. Case, dashes and spaces are ignored.
pub fn decode(code: &str) -> Option<DecodedCode> {
    let normalized = normalize(code);
    let bytes = normalized.as_bytes();
    if bytes.len() != CODE_LEN {
        return None;
    }

    let mut packed = 0u32;
    for &b in &bytes[..DATA_SYMBOLS] {
        packed = packed * BASE + symbol_index(b)?;
    }
    let check = symbol_index(bytes[DATA_SYMBOLS])?;

    if checksum(packed) != check {
        return None;
    }

    let packed = u64::from(packed);
    Some(DecodedCode {
        person_id: PersonId(packed & ID_MASK),
        instance_id: InstanceId((packed >> 15) & ID_MASK),
    })
}

/// Decode and optionally require a matching instance and/or person
///
/// Expected ids are compared after the same 15-bit reduction the code applies.
pub fn validate(
    code: &str,
    expected_instance: Option<InstanceId>,
    expected_person: Option<PersonId>,
) -> Option<DecodedCode> {
    let decoded = decode(code)?;

    if let Some(instance) = expected_instance {
        if instance.0 & ID_MASK != decoded.instance_id.0 {
            return None;
        }
    }
    if let Some(person) = expected_person {
        if person.0 & ID_MASK != decoded.person_id.0 {
            return None;
        }
    }

    Some(decoded)
}
