use super::*;

/// Compact form of the difficulty-1 target, the dividend for pool targets.
pub const MAX_TARGET_BITS: u32 = 0x1d00ffff;

/// The difficulty-1 target as a float, for share-difficulty accounting.
pub const MAX_TARGET_FLOAT: f64 =
    26959535291011309493156476344723991336010898738574164086137773096960.0;

const LIMB_BASE: f64 = 18446744073709551616.0;

/// A 256-bit unsigned integer stored little-endian: byte 31 is the most
/// significant. Digests from the hash engine share the layout, so meeting a
/// target is a single byte-wise scan from the top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Target([u8; 32]);

impl Target {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Expands compact `nbits`: exponent in the top byte, 24-bit mantissa
    /// below it. A set 0x00800000 bit folds into the mantissa; Bitcoin
    /// rejects negative targets before they ever reach a miner.
    pub fn from_nbits(nbits: u32) -> Self {
        let exponent = nbits >> 24;
        let mut mantissa = nbits & 0x007f_ffff;
        if nbits & 0x0080_0000 != 0 {
            mantissa |= 0x0080_0000;
        }

        let mut bytes = [0u8; 32];

        if exponent <= 3 {
            mantissa >>= 8 * (3 - exponent);
            bytes[..4].copy_from_slice(&mantissa.to_le_bytes());
        } else {
            let shift = exponent as usize - 3;
            for (i, byte) in mantissa.to_le_bytes().into_iter().enumerate() {
                if let Some(slot) = bytes.get_mut(shift + i) {
                    *slot = byte;
                }
            }
        }

        Self(bytes)
    }

    pub fn difficulty_one() -> Self {
        Self::from_nbits(MAX_TARGET_BITS)
    }

    /// Divides by a positive difficulty, four u64 limbs at a time from the
    /// most significant down, carrying the remainder as a float. Limbs that
    /// would overflow (sub-unity difficulties near the top of the range)
    /// clamp to `u64::MAX`.
    pub fn divide_by(self, difficulty: f64) -> Self {
        let mut limbs = [0u64; 4];
        for (i, chunk) in self.0.chunks_exact(8).enumerate() {
            limbs[i] = u64::from_le_bytes(chunk.try_into().unwrap());
        }

        let mut result = [0u64; 4];
        let mut remainder = 0.0;

        for i in (0..4).rev() {
            let value = limbs[i] as f64 + remainder * LIMB_BASE;
            let quotient = value / difficulty;

            result[i] = if quotient >= u64::MAX as f64 {
                u64::MAX
            } else {
                quotient as u64
            };

            remainder = value - result[i] as f64 * difficulty;
        }

        let mut bytes = [0u8; 32];
        for (i, limb) in result.iter().enumerate() {
            bytes[i * 8..i * 8 + 8].copy_from_slice(&limb.to_le_bytes());
        }

        Self(bytes)
    }

    /// Full 256-bit comparison from the most significant byte down; a digest
    /// equal to the target meets it.
    pub fn is_met_by(&self, digest: &[u8; 32]) -> bool {
        for i in (0..32).rev() {
            if digest[i] < self.0[i] {
                return true;
            }
            if digest[i] > self.0[i] {
                return false;
            }
        }
        true
    }

    pub fn to_le_bytes(self) -> [u8; 32] {
        self.0
    }

    pub fn from_le_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Ord for Target {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.iter().rev().cmp(other.0.iter().rev())
    }
}

impl PartialOrd for Target {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut bytes = self.0;
        bytes.reverse();
        write!(f, "{}", hex::encode(bytes))
    }
}

/// `max_target / digest`, the conventional share-difficulty figure. NaN and
/// infinity collapse to 0.0 so they can never poison the high-watermark.
pub fn share_difficulty(digest: &[u8; 32]) -> f64 {
    let mut value = 0.0f64;
    for i in (0..32).rev() {
        value = value * 256.0 + digest[i] as f64;
    }

    let difficulty = MAX_TARGET_FLOAT / value;
    if difficulty.is_nan() || difficulty.is_infinite() {
        0.0
    } else {
        difficulty
    }
}
