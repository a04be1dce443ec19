use crossbeam_utils::Backoff;
use std::sync::atomic::{AtomicU64, Ordering};

/// An `f64` stored as its bit pattern in an `AtomicU64`.
#[derive(Debug, Default)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    pub fn new(v: f64) -> Self {
        AtomicF64 {
            bits: AtomicU64::new(v.to_bits()),
        }
    }

    pub fn load(&self, order: Ordering) -> f64 {
        f64::from_bits(self.bits.load(order))
    }

    pub fn store(&self, v: f64, order: Ordering) {
        self.bits.store(v.to_bits(), order);
    }

    /// Adds `v` and returns the new value.
    pub fn add(&self, v: f64) -> f64 {
        atomic_update_float(&self.bits, |old| old + v)
    }
}

/// Compare-and-swap loop over the bit pattern of a float. Contended retries
/// spin with exponential backoff; the caller is never parked.
fn atomic_update_float(bits: &AtomicU64, update_func: impl Fn(f64) -> f64) -> f64 {
    let backoff = Backoff::new();
    let mut loaded_bits = bits.load(Ordering::Relaxed);
    loop {
        let new_float = update_func(f64::from_bits(loaded_bits));
        match bits.compare_exchange_weak(
            loaded_bits,
            new_float.to_bits(),
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => return new_float,
            Err(actual) => {
                loaded_bits = actual;
                backoff.spin();
            }
        }
    }
}
