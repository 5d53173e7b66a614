use std::hash::Hasher;

/// Initial state of the cdb checksum.
const START: u32 = 5381;

/// Streaming accumulator for the cdb checksum.
///
/// Each input byte `b` is folded as `h = ((h << 5) + h) ^ b` with wrapping
/// 32-bit arithmetic. The builder keeps one instance and calls
/// [`reset`](Self::reset) between keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CdbHasher {
    state: u32,
}

impl Default for CdbHasher {
    fn default() -> Self {
        Self { state: START }
    }
}

impl CdbHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores the initial state so a new digest can be computed.
    pub fn reset(&mut self) {
        self.state = START;
    }

    /// Folds `data` into the running state.
    pub fn update(&mut self, data: &[u8]) {
        self.state = fold(self.state, data);
    }

    /// Returns the digest of everything folded in since the last reset.
    pub fn value(&self) -> u32 {
        self.state
    }
}

impl Hasher for CdbHasher {
    fn finish(&self) -> u64 {
        u64::from(self.state)
    }

    fn write(&mut self, bytes: &[u8]) {
        self.update(bytes);
    }
}

/// Computes the cdb checksum of `data` in one call.
pub fn checksum(data: &[u8]) -> u32 {
    fold(START, data)
}

fn fold(mut h: u32, data: &[u8]) -> u32 {
    for &b in data {
        h = (h << 5).wrapping_add(h) ^ u32::from(b);
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        assert_eq!(checksum(b""), 5381);
        // 5381 * 33 ^ 'a'
        assert_eq!(checksum(b"a"), (5381u32 * 33) ^ 0x61);
        assert_eq!(checksum(b"one"), 193_420_161);
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let mut hasher = CdbHasher::new();
        hasher.update(b"thr");
        hasher.update(b"ee");
        assert_eq!(hasher.value(), checksum(b"three"));

        hasher.reset();
        assert_eq!(hasher.value(), checksum(b""));
        hasher.write(b"two");
        assert_eq!(hasher.finish(), u64::from(checksum(b"two")));
    }

    #[test]
    fn test_wrapping() {
        let data = vec![0xffu8; 4096];
        let mut hasher = CdbHasher::new();
        for chunk in data.chunks(7) {
            hasher.update(chunk);
        }
        assert_eq!(hasher.value(), checksum(&data));
    }
}
