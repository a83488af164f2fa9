//! CPython-compatible hash functions.
//!
//! Hashes are deterministic, equivalent to running CPython with
//! `PYTHONHASHSEED=0`. All functions return the signed `Py_hash_t` value;
//! `-1` is never returned because CPython reserves it as an error sentinel.
//!
//! Equal numbers hash equal across types: `hash(1) == hash(1.0) == hash(True)`.

/// Mersenne prime used for numeric hashing: `2^61 - 1`.
const MODULUS: u64 = (1 << 61) - 1;
const MODULUS_BITS: i32 = 61;

/// Hash of `+inf`; `-inf` hashes to its negation.
const HASH_INF: i64 = 314_159;

#[inline]
fn fix_sentinel(hash: i64) -> i64 {
    if hash == -1 { -2 } else { hash }
}

/// Hashes an integer: `n mod (2^61 - 1)`, sign-preserving.
#[must_use]
pub(crate) fn hash_int(value: i64) -> i64 {
    let reduced = (value.unsigned_abs() % MODULUS) as i64;
    fix_sentinel(if value < 0 { -reduced } else { reduced })
}

/// Hashes a float the way `_Py_HashDouble` does.
///
/// Integral values reduce to [`hash_int`]; other values are folded into the
/// numeric modulus from their binary mantissa, 28 bits at a time.
#[must_use]
pub(crate) fn hash_float(value: f64) -> i64 {
    if value.is_nan() {
        return 0;
    }
    if value.is_infinite() {
        return if value > 0.0 { HASH_INF } else { -HASH_INF };
    }
    if value.fract() == 0.0 && value.abs() < 9.2e18 {
        return hash_int(value as i64);
    }

    let (mut mantissa, mut exponent) = frexp(value.abs());
    let mut acc: u64 = 0;
    while mantissa != 0.0 {
        acc = ((acc << 28) & MODULUS) | (acc >> (MODULUS_BITS - 28));
        mantissa *= 268_435_456.0;
        exponent -= 28;
        let chunk = mantissa as u64;
        mantissa -= chunk as f64;
        acc += chunk;
        if acc >= MODULUS {
            acc -= MODULUS;
        }
    }

    let shift = exponent.rem_euclid(MODULUS_BITS) as u32;
    acc = ((acc << shift) & MODULUS) | (acc >> (MODULUS_BITS as u32 - shift));
    let signed = acc as i64;
    fix_sentinel(if value < 0.0 { -signed } else { signed })
}

/// Splits a finite, positive, non-zero `value` into `(m, e)` with
/// `value == m * 2^e` and `0.5 <= m < 1`.
fn frexp(value: f64) -> (f64, i32) {
    let bits = value.to_bits();
    let biased = ((bits >> 52) & 0x7ff) as i32;
    if biased == 0 {
        // subnormal
        let (m, e) = frexp(value * f64::from_bits(0x43f0_0000_0000_0000));
        return (m, e - 64);
    }
    let m = f64::from_bits((bits & 0x800f_ffff_ffff_ffff) | 0x3fe0_0000_0000_0000);
    (m, biased - 1022)
}

/// Hashes a string with SipHash-1-3 under a zero key.
#[must_use]
pub(crate) fn hash_str(value: &str) -> i64 {
    let bytes = value.as_bytes();
    if bytes.is_empty() {
        return 0;
    }
    fix_sentinel(siphash13_zero_key(bytes) as i64)
}

/// Combines element hashes the way CPython's tuple hash (xxHash-based) does.
#[must_use]
pub(crate) fn hash_tuple(element_hashes: impl ExactSizeIterator<Item = i64>) -> i64 {
    const PRIME_1: u64 = 11_400_714_785_074_694_791;
    const PRIME_2: u64 = 14_029_467_366_897_019_727;
    const PRIME_5: u64 = 2_870_177_450_012_600_261;

    let len = element_hashes.len() as u64;
    let mut acc = PRIME_5;
    for lane in element_hashes {
        acc = acc.wrapping_add((lane as u64).wrapping_mul(PRIME_2));
        acc = acc.rotate_left(31);
        acc = acc.wrapping_mul(PRIME_1);
    }
    acc = acc.wrapping_add(len ^ (PRIME_5 ^ 3_527_539));
    if acc == u64::MAX {
        return 1_546_275_796;
    }
    acc as i64
}

/// Combines element hashes the way CPython's `frozenset.__hash__` does.
///
/// Order-independent: each element hash is bit-shuffled and xor-ed in.
#[must_use]
pub(crate) fn hash_frozenset(element_hashes: impl ExactSizeIterator<Item = i64>) -> i64 {
    fn shuffle(h: u64) -> u64 {
        ((h ^ 89_869_747) ^ (h << 16)).wrapping_mul(3_644_798_167)
    }

    let len = element_hashes.len() as u64;
    let mut acc: u64 = 0;
    for h in element_hashes {
        acc ^= shuffle(h as u64);
    }
    acc ^= (len + 1).wrapping_mul(1_927_868_237);
    acc ^= (acc >> 11) ^ (acc >> 25);
    acc = acc.wrapping_mul(69_069).wrapping_add(907_133_923);
    if acc == u64::MAX {
        return 590_923_713;
    }
    acc as i64
}

fn siphash13_zero_key(bytes: &[u8]) -> u64 {
    let mut v = [
        0x736f_6d65_7073_6575_u64,
        0x646f_7261_6e64_6f6d,
        0x6c79_6765_6e65_7261,
        0x7465_6462_7974_6573,
    ];

    let mut chunks = bytes.chunks_exact(8);
    for chunk in &mut chunks {
        let mut block = [0_u8; 8];
        block.copy_from_slice(chunk);
        let m = u64::from_le_bytes(block);
        v[3] ^= m;
        sip_round(&mut v);
        v[0] ^= m;
    }

    let mut tail = (bytes.len() as u64) << 56;
    for (i, &byte) in chunks.remainder().iter().enumerate() {
        tail |= u64::from(byte) << (8 * i);
    }
    v[3] ^= tail;
    sip_round(&mut v);
    v[0] ^= tail;

    v[2] ^= 0xff;
    for _ in 0..3 {
        sip_round(&mut v);
    }
    v[0] ^ v[1] ^ v[2] ^ v[3]
}

#[inline]
fn sip_round(v: &mut [u64; 4]) {
    v[0] = v[0].wrapping_add(v[1]);
    v[1] = v[1].rotate_left(13) ^ v[0];
    v[0] = v[0].rotate_left(32);
    v[2] = v[2].wrapping_add(v[3]);
    v[3] = v[3].rotate_left(16) ^ v[2];
    v[0] = v[0].wrapping_add(v[3]);
    v[3] = v[3].rotate_left(21) ^ v[0];
    v[2] = v[2].wrapping_add(v[1]);
    v[1] = v[1].rotate_left(17) ^ v[2];
    v[2] = v[2].rotate_left(32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_hash_matches_cpython() {
        assert_eq!(hash_int(0), 0);
        assert_eq!(hash_int(42), 42);
        assert_eq!(hash_int(-1), -2);
        assert_eq!(hash_int(-5), -5);
        assert_eq!(hash_int((1 << 61) - 1), 0);
        assert_eq!(hash_int(i64::MAX), 3);
    }

    #[test]
    fn float_hash_agrees_with_int_for_integral_values() {
        assert_eq!(hash_float(1.0), hash_int(1));
        assert_eq!(hash_float(-7.0), hash_int(-7));
        assert_eq!(hash_float(0.0), 0);
        assert_eq!(hash_float(f64::INFINITY), 314_159);
        assert_eq!(hash_float(f64::NEG_INFINITY), -314_159);
    }

    #[test]
    fn float_hash_of_fractions_matches_cpython() {
        // values from CPython 3.12: hash(0.5), hash(1.5), hash(-0.5)
        assert_eq!(hash_float(0.5), 1_152_921_504_606_846_976);
        assert_eq!(hash_float(1.5), 1_152_921_504_606_846_977);
        assert_eq!(hash_float(-0.5), -1_152_921_504_606_846_976);
    }

    #[test]
    fn empty_str_hashes_to_zero() {
        assert_eq!(hash_str(""), 0);
        assert_ne!(hash_str("a"), hash_str("b"));
    }

    #[test]
    fn tuple_hash_matches_cpython() {
        // hash(()) and hash((1, 2)) on 64-bit CPython
        assert_eq!(hash_tuple(std::iter::empty()), 5_740_354_900_026_072_187);
        assert_eq!(hash_tuple([1_i64, 2].into_iter()), -3_550_055_125_485_641_917);
    }

    #[test]
    fn frozenset_hash_ignores_order() {
        let a = hash_frozenset([1_i64, 2, 3].into_iter());
        let b = hash_frozenset([3_i64, 1, 2].into_iter());
        assert_eq!(a, b);
        // hash(frozenset()) on 64-bit CPython
        assert_eq!(hash_frozenset(std::iter::empty()), 133_146_708_735_736);
    }
}
