//! 64-bit Hash Accumulator
//!
//! Keys append their identifying fields as 64-bit words; the fingerprint is a
//! CRC-64/ECMA-182 over the little-endian bytes of those words, in append order.

/// CRC-64/ECMA-182 generator polynomial
const POLY: u64 = 0x42F0_E1EB_A9EA_3693;

const fn build_table() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u64) << 56;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & (1 << 63) != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u64; 256] = build_table();

/// Table-driven CRC-64 (non-reflected, zero init, no final xor)
#[inline]
pub fn crc64(bytes: &[u8]) -> u64 {
    let mut crc = 0u64;
    for &byte in bytes {
        let idx = ((crc >> 56) as u8 ^ byte) as usize;
        crc = CRC_TABLE[idx] ^ (crc << 8);
    }
    crc
}

/// Order-sensitive accumulator of 64-bit words
#[derive(Debug, Clone, Default)]
pub struct Hash64 {
    words: Vec<u64>,
    value: u64,
}

impl Hash64 {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw word
    #[inline]
    pub fn append(&mut self, word: u64) {
        self.words.push(word);
    }

    pub fn append_bool(&mut self, value: bool) {
        self.append(value as u64);
    }

    /// Signed values are sign-extended so -1 and u64::MAX agree
    pub fn append_i32(&mut self, value: i32) {
        self.append(value as i64 as u64);
    }

    pub fn append_u32(&mut self, value: u32) {
        self.append(value as u64);
    }

    /// Appends the IEEE-754 bit pattern
    pub fn append_f64(&mut self, value: f64) {
        self.append(value.to_bits());
    }

    /// Appends the byte length, then the bytes packed 8 per word
    pub fn append_str(&mut self, value: &str) {
        let bytes = value.as_bytes();
        self.append(bytes.len() as u64);
        for chunk in bytes.chunks(8) {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            self.append(u64::from_le_bytes(word));
        }
    }

    /// Number of appended words
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Fold every appended word into the fingerprint
    pub fn compute_hash(&mut self) {
        let mut bytes = Vec::with_capacity(self.words.len() * 8);
        for word in &self.words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        self.value = crc64(&bytes);
    }

    /// Last computed fingerprint (0 before the first `compute_hash`)
    #[inline]
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Forget every appended word and the computed value
    pub fn reset(&mut self) {
        self.words.clear();
        self.value = 0;
    }
}

// =============================================================================
// Tests
// =============================================================================
