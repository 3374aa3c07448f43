//! XTEA block cipher as used to obscure credentials during the Ultravox2
//! handshake.
//!
//! Blocks are enciphered independently (ECB). That is what the server expects;
//! it offers no confidentiality beyond keeping credentials out of plain sight.

use std::fmt::Write;

const DELTA: u32 = 0x9E37_79B9;
const ROUNDS: u32 = 32;

/// 64-bit block, as two big-endian 32-bit halves.
pub type Block = [u32; 2];

/// 128-bit key, as four big-endian 32-bit words.
pub type Key = [u32; 4];

/// Build a key from raw bytes, truncating or zero-extending to 16 bytes.
pub fn key_from_bytes(raw: &[u8]) -> Key {
    let mut padded = [0u8; 16];
    let n = raw.len().min(16);
    padded[..n].copy_from_slice(&raw[..n]);

    let mut key = [0u32; 4];
    for (word, chunk) in key.iter_mut().zip(padded.chunks_exact(4)) {
        *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    key
}

pub fn encipher_block(block: Block, key: &Key) -> Block {
    let [mut v0, mut v1] = block;
    let mut sum: u32 = 0;

    for _ in 0..ROUNDS {
        v0 = v0.wrapping_add(
            ((v1 << 4) ^ (v1 >> 5)).wrapping_add(v1) ^ sum.wrapping_add(key[(sum & 3) as usize]),
        );
        sum = sum.wrapping_add(DELTA);
        v1 = v1.wrapping_add(
            ((v0 << 4) ^ (v0 >> 5)).wrapping_add(v0)
                ^ sum.wrapping_add(key[((sum >> 11) & 3) as usize]),
        );
    }

    [v0, v1]
}

pub fn decipher_block(block: Block, key: &Key) -> Block {
    let [mut v0, mut v1] = block;
    let mut sum: u32 = DELTA.wrapping_mul(ROUNDS);

    for _ in 0..ROUNDS {
        v1 = v1.wrapping_sub(
            ((v0 << 4) ^ (v0 >> 5)).wrapping_add(v0)
                ^ sum.wrapping_add(key[((sum >> 11) & 3) as usize]),
        );
        sum = sum.wrapping_sub(DELTA);
        v0 = v0.wrapping_sub(
            ((v1 << 4) ^ (v1 >> 5)).wrapping_add(v1) ^ sum.wrapping_add(key[(sum & 3) as usize]),
        );
    }

    [v0, v1]
}

/// Encipher `data` under `key` and render it as lowercase hex.
///
/// Data is zero-padded to a multiple of 8 bytes, so the output is always
/// `16 * ceil(len / 8)` characters long.
pub fn encipher_to_hex(data: &[u8], key: &[u8]) -> String {
    let key = key_from_bytes(key);
    let mut out = String::with_capacity(data.len().div_ceil(8) * 16);

    for chunk in data.chunks(8) {
        let [v0, v1] = encipher_block(block_from_bytes(chunk), &key);
        // Writing to a String cannot fail.
        let _ = write!(out, "{v0:08x}{v1:08x}");
    }

    out
}

/// Reverse of [`encipher_to_hex`]. Returns the padded plaintext, or `None`
/// if `hex` is not a whole number of hex-encoded blocks.
pub fn decipher_hex(hex: &str, key: &[u8]) -> Option<Vec<u8>> {
    if hex.len() % 16 != 0 || !hex.is_ascii() {
        return None;
    }

    let key = key_from_bytes(key);
    let mut out = Vec::with_capacity(hex.len() / 2);

    for chunk in hex.as_bytes().chunks(16) {
        let text = std::str::from_utf8(chunk).ok()?;
        let v0 = u32::from_str_radix(&text[..8], 16).ok()?;
        let v1 = u32::from_str_radix(&text[8..], 16).ok()?;
        let [p0, p1] = decipher_block([v0, v1], &key);
        out.extend_from_slice(&p0.to_be_bytes());
        out.extend_from_slice(&p1.to_be_bytes());
    }

    Some(out)
}

fn block_from_bytes(chunk: &[u8]) -> Block {
    let mut padded = [0u8; 8];
    padded[..chunk.len()].copy_from_slice(chunk);
    [
        u32::from_be_bytes([padded[0], padded[1], padded[2], padded[3]]),
        u32::from_be_bytes([padded[4], padded[5], padded[6], padded[7]]),
    ]
}
