//! Deterministic job id derivation.

/// Derives the platform-scheduler job id for a population requested by a
/// calling package.
///
/// The id only depends on its inputs, so repeated `start` calls map to the
/// same platform job and a restart of the service re-derives the same ids.
pub fn derive_job_id(population_name: &str, calling_package: &str) -> i32 {
    let key = format!("{}#{}", calling_package, population_name);
    key.bytes()
        .fold(0i32, |hash, byte| hash.wrapping_mul(31).wrapping_add(byte as i32))
}
