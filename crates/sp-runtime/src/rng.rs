pub(crate) fn next_random_u32(state: &mut u32) -> u32 {
    let mut next = state.wrapping_add(0x6d2b79f5);
    *state = next;
    next = (next ^ (next >> 15)).wrapping_mul(next | 1);
    next ^= next.wrapping_add((next ^ (next >> 7)).wrapping_mul(next | 61));
    next ^ (next >> 14)
}

/// Stable seed for a command kind, so jitter is reproducible per kind.
pub(crate) fn seed_for(kind: &str, attempt: u32) -> u32 {
    kind.bytes().fold(attempt.wrapping_mul(0x9e37_79b9), |seed, byte| {
        seed.rotate_left(5) ^ u32::from(byte)
    })
}

/// Uniform value in `0.0..1.0`.
pub(crate) fn unit_interval(state: &mut u32) -> f64 {
    f64::from(next_random_u32(state)) / (f64::from(u32::MAX) + 1.0)
}

#[cfg(test)]
mod rng_tests {
    use super::*;

    #[test]
    fn unit_interval_stays_in_range_and_repeats_per_seed() {
        let mut first = seed_for("wait", 1);
        let mut second = seed_for("wait", 1);
        for _ in 0..100 {
            let value = unit_interval(&mut first);
            assert!((0.0..1.0).contains(&value));
            assert_eq!(value, unit_interval(&mut second));
        }
        assert_ne!(seed_for("wait", 1), seed_for("wait", 2));
    }
}
