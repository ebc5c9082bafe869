//! Minimal Ethereum ABI encoding (`abi.encode`) for the handful of types the
//! registry and attestation payloads use.

use crate::types::{Address, Hash32};

const WORD: usize = 32;

/// A value to encode. Dynamic types (`String`, `Bytes`) go to the tail.
#[derive(Debug, Clone, Copy)]
pub enum Token<'a> {
    String(&'a str),
    Bytes(&'a [u8]),
    FixedBytes(Hash32),
    Address(Address),
    Int(i64),
    Uint(u64),
    Bool(bool),
}

impl<'a> Token<'a> {
    /// Tail bytes for dynamic tokens, `None` for static ones.
    fn dynamic_data(&self) -> Option<&'a [u8]> {
        match *self {
            Token::String(s) => Some(s.as_bytes()),
            Token::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// Head/tail encoding identical to Solidity's `abi.encode(...)`.
pub fn encode(tokens: &[Token<'_>]) -> Vec<u8> {
    let head_len = WORD * tokens.len();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        match token.dynamic_data() {
            Some(data) => {
                head.extend_from_slice(&uint_word((head_len + tail.len()) as u64));
                encode_dynamic(&mut tail, data);
            }
            None => head.extend_from_slice(&static_word(token)),
        }
    }

    head.extend_from_slice(&tail);
    head
}

fn encode_dynamic(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&uint_word(data.len() as u64));
    out.extend_from_slice(data);
    let rem = data.len() % WORD;
    if rem != 0 {
        out.resize(out.len() + WORD - rem, 0);
    }
}

fn static_word(token: &Token<'_>) -> [u8; WORD] {
    match token {
        Token::FixedBytes(b) => *b,
        Token::Address(a) => {
            let mut w = [0u8; WORD];
            w[12..].copy_from_slice(a);
            w
        }
        Token::Int(v) => int_word(*v),
        Token::Uint(v) => uint_word(*v),
        Token::Bool(b) => uint_word(u64::from(*b)),
        Token::String(_) | Token::Bytes(_) => [0u8; WORD],
    }
}

pub fn uint_word(value: u64) -> [u8; WORD] {
    let mut w = [0u8; WORD];
    w[24..].copy_from_slice(&value.to_be_bytes());
    w
}

/// Two's complement, sign-extended to 256 bits.
pub fn int_word(value: i64) -> [u8; WORD] {
    let mut w = if value < 0 { [0xffu8; WORD] } else { [0u8; WORD] };
    w[24..].copy_from_slice(&value.to_be_bytes());
    w
}

/// The `index`-th head word. `None` past the end of `data`.
pub fn word_at(data: &[u8], index: usize) -> Option<[u8; WORD]> {
    let start = index.checked_mul(WORD)?;
    let slice = data.get(start..start.checked_add(WORD)?)?;
    let mut w = [0u8; WORD];
    w.copy_from_slice(slice);
    Some(w)
}

/// Inverse of [`int_word`]; `None` if the value does not fit an `i64`.
pub fn word_to_i64(word: &[u8; WORD]) -> Option<i64> {
    let fill = if word[24] & 0x80 != 0 { 0xff } else { 0x00 };
    if word[..24].iter().any(|b| *b != fill) {
        return None;
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&word[24..]);
    Some(i64::from_be_bytes(tail))
}

fn word_to_usize(word: &[u8; WORD]) -> Option<usize> {
    if word[..24].iter().any(|b| *b != 0) {
        return None;
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&word[24..]);
    usize::try_from(u64::from_be_bytes(tail)).ok()
}

/// Dynamic `string` whose offset sits in head word `index`.
pub fn string_at(data: &[u8], index: usize) -> Option<String> {
    let offset = word_to_usize(&word_at(data, index)?)?;
    let len_word = data.get(offset..offset.checked_add(WORD)?)?;
    let mut w = [0u8; WORD];
    w.copy_from_slice(len_word);
    let len = word_to_usize(&w)?;
    let start = offset + WORD;
    let bytes = data.get(start..start.checked_add(len)?)?;
    String::from_utf8(bytes.to_vec()).ok()
}
