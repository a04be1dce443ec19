use std::hash::{BuildHasherDefault, Hasher};

const OFFSET64: u64 = 14695981039346656037;
const PRIME64: u64 = 1099511628211;

/// 64-bit FNV-1a, used for the label-value and bucket-index maps.
#[derive(Debug, Clone, Copy)]
pub struct FnvHasher(u64);

impl Default for FnvHasher {
    fn default() -> Self {
        FnvHasher(hash_new())
    }
}

impl Hasher for FnvHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 = hash_add_byte(self.0, b);
        }
    }
}

pub type FnvBuildHasher = BuildHasherDefault<FnvHasher>;

const fn hash_new() -> u64 {
    OFFSET64
}

const fn hash_add_byte(mut h: u64, b: u8) -> u64 {
    h ^= b as u64;
    h = h.wrapping_mul(PRIME64);
    h
}
