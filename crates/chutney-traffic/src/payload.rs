//! Test data: a random chunk repeated up to the configured size.

use bytes::Bytes;
use rand::RngCore;

/// Largest random chunk generated; bigger payloads repeat it.
pub const MAX_RANDOM_CHUNK: usize = 128 * 1024;

/// What every stream of a round sends and expects back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    chunk: Bytes,
    repetitions: u64,
}

impl Payload {
    /// Random payload of at least `data_bytes` bytes, rounded up to a whole
    /// number of chunks.
    pub fn random(data_bytes: u64, rng: &mut impl RngCore) -> Self {
        let len = data_bytes.min(MAX_RANDOM_CHUNK as u64) as usize;
        let mut chunk = vec![0u8; len];
        rng.fill_bytes(&mut chunk);
        Self::repeated(Bytes::from(chunk), data_bytes)
    }

    /// `chunk` repeated until at least `data_bytes` bytes are covered.
    pub fn repeated(chunk: Bytes, data_bytes: u64) -> Self {
        let repetitions = match chunk.len() as u64 {
            0 => 0,
            n => data_bytes.div_ceil(n),
        };
        Self { chunk, repetitions }
    }

    pub fn chunk(&self) -> &Bytes {
        &self.chunk
    }

    pub fn repetitions(&self) -> u64 {
        self.repetitions
    }

    /// Total bytes sent per stream.
    pub fn len(&self) -> u64 {
        self.chunk.len() as u64 * self.repetitions
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compare `received`, which starts at stream offset `offset`, against
    /// the payload. Returns the offset of the first differing byte.
    pub fn first_mismatch(&self, offset: u64, received: &[u8]) -> Option<u64> {
        let n = self.chunk.len() as u64;
        received.iter().enumerate().find_map(|(i, b)| {
            let pos = offset + i as u64;
            let expected = (pos < self.len()).then(|| self.chunk[(pos % n) as usize]);
            (expected != Some(*b)).then_some(pos)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn large_payloads_repeat_a_capped_chunk() {
        let mut rng = StdRng::seed_from_u64(7);
        let p = Payload::random(300 * 1024, &mut rng);
        assert_eq!(p.chunk().len(), MAX_RANDOM_CHUNK);
        assert_eq!(p.repetitions(), 3);
        assert_eq!(p.len(), 3 * MAX_RANDOM_CHUNK as u64);

        let small = Payload::random(10 * 1024, &mut rng);
        assert_eq!(small.repetitions(), 1);
        assert_eq!(small.len(), 10 * 1024);

        assert!(Payload::random(0, &mut rng).is_empty());
    }

    #[test]
    fn mismatch_points_at_first_bad_byte() {
        let p = Payload::repeated(Bytes::from_static(b"abcd"), 8);
        assert_eq!(p.first_mismatch(0, b"abcdab"), None);
        assert_eq!(p.first_mismatch(6, b"cd"), None);
        assert_eq!(p.first_mismatch(2, b"cdXb"), Some(4));
        assert_eq!(p.first_mismatch(7, b"dE"), Some(8));
    }
}
