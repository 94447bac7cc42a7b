//! Utility Functions - Hash Primitives and Bit Tricks

/// Rolling 64-bit string hash: 8-byte big-endian chunks folded with a
/// large multiplier modulo a Mersenne prime, then 4/2/1-byte tails.
/// Stable across platforms; used for type-key hashes and `Str` hashing.
pub fn str_hash(bytes: &[u8]) -> u64 {
    const MULTIPLIER: u64 = 1099511628211;
    const MOD: u64 = 2147483647;
    let mut result: u64 = 0;
    let mut chunks = bytes.chunks_exact(8);
    for chunk in &mut chunks {
        let b = u64::from_be_bytes(chunk.try_into().unwrap());
        result = (result.wrapping_mul(MULTIPLIER).wrapping_add(b)) % MOD;
    }
    let mut rest = chunks.remainder();
    if !rest.is_empty() {
        let mut b: u64 = 0;
        if rest.len() >= 4 {
            b = u64::from(u32::from_be_bytes(rest[..4].try_into().unwrap()));
            rest = &rest[4..];
        }
        if rest.len() >= 2 {
            b = (b << 16) | u64::from(u16::from_be_bytes(rest[..2].try_into().unwrap()));
            rest = &rest[2..];
        }
        if let [tail] = rest {
            b = (b << 8) | u64::from(*tail);
        }
        result = (result.wrapping_mul(MULTIPLIER).wrapping_add(b)) % MOD;
    }
    result
}

/// Golden-ratio mixing of two 64-bit hashes.
#[inline]
pub fn hash_combine(seed: u64, value: u64) -> u64 {
    seed ^ (value
        .wrapping_add(0x9e3779b9)
        .wrapping_add(seed << 6)
        .wrapping_add(seed >> 2))
}

/// Mix a typed scalar into a type-tag hash by its raw bit pattern.
#[inline]
pub fn hash_typed_bits(type_hash: u64, bits: u64) -> u64 {
    hash_combine(type_hash, bits)
}

/// Smallest power of two >= `x` (and >= 1).
#[inline]
pub fn bit_ceil(x: u64) -> u64 {
    x.max(1).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_str_hash_stability() {
        // Same bytes, same hash; the function must not depend on chunk
        // alignment of the allocation.
        let a = str_hash(b"object.Str");
        let b = str_hash(&b"xobject.Str"[1..]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_str_hash_tail_sizes() {
        // Exercise the 8/4/2/1 tail combinations.
        for len in 0..=17 {
            let data: Vec<u8> = (0..len as u8).collect();
            let h1 = str_hash(&data);
            let h2 = str_hash(&data.clone());
            assert_eq!(h1, h2);
            if len > 0 {
                assert_ne!(h1, str_hash(&data[..len - 1]), "prefix collision at {len}");
            }
        }
    }

    #[test]
    fn test_hash_combine_asymmetry() {
        assert_ne!(hash_combine(1, 2), hash_combine(2, 1));
    }

    #[test]
    fn test_bit_ceil() {
        assert_eq!(bit_ceil(0), 1);
        assert_eq!(bit_ceil(1), 1);
        assert_eq!(bit_ceil(17), 32);
        assert_eq!(bit_ceil(1024), 1024);
    }
}
