use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::SeedableRng;
use rand::rngs::StdRng;

pub fn stable_hash_with(f: impl FnOnce(&mut DefaultHasher)) -> u64 {
    let mut hasher = DefaultHasher::new();
    f(&mut hasher);
    hasher.finish()
}

/// Derive a per-purpose RNG seed so sampling and noise never share a stream.
pub fn derive_seed(seed: u64, job_id: &str, purpose: &str) -> u64 {
    stable_hash_with(|hasher| {
        seed.hash(hasher);
        job_id.hash(hasher);
        purpose.hash(hasher);
    })
}

/// RNG for one `(job, purpose)` pair; entropy-seeded when `seed` is `None`.
pub fn job_rng(seed: Option<u64>, job_id: &str, purpose: &str) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(derive_seed(seed, job_id, purpose)),
        None => StdRng::from_os_rng(),
    }
}
