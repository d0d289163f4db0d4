use std::hash::Hasher;

/// A deterministic FNV-1a 64-bit hasher.
///
/// `DefaultHasher` is randomized per process, which would make event seeds
/// (and therefore interception and mission rolls) unreproducible. Every
/// per-event RNG seed is derived through this instead.
#[derive(Debug, Default)]
pub struct FnvHasher {
    state: u64,
}

impl FnvHasher {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self {
            state: Self::OFFSET_BASIS,
        }
    }
}

impl Hasher for FnvHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= byte as u64;
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }
}

/// Seed for the RNG that resolves one due event: stable for a given
/// (stream seed, entity id, due time) triple so a replayed event re-rolls
/// identically.
pub fn event_seed(stream_seed: u64, entity: u64, due_at: u64) -> u64 {
    let mut hasher = FnvHasher::new();
    hasher.write(&stream_seed.to_le_bytes());
    hasher.write(&entity.to_le_bytes());
    hasher.write(&due_at.to_le_bytes());
    hasher.finish()
}

/// Seed derived from a string identifier (catalog entries).
pub fn hash_identifier(identifier: &str) -> u64 {
    let mut hasher = FnvHasher::new();
    hasher.write(identifier.as_bytes());
    hasher.finish()
}
