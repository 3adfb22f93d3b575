// src/utils/system.rs: System functions

use sysinfo::System;

/// Caps the requested sample concurrency to the machine's physical cores.
///
/// # Arguments
///
/// * `requested` - Value of --jobs from the CLI.
///
/// # Returns
///
/// usize: number of samples allowed to run at once, at least 1.
pub fn effective_jobs(requested: usize) -> usize {
    let physical_cores = System::physical_core_count().unwrap_or(1);
    requested.max(1).min(physical_cores.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_jobs_floor_is_one() {
        assert_eq!(effective_jobs(0), 1);
        assert_eq!(effective_jobs(1), 1);
    }

    #[test]
    fn test_effective_jobs_is_capped() {
        let jobs = effective_jobs(usize::MAX);
        assert!(jobs >= 1);
        assert!(jobs <= System::physical_core_count().unwrap_or(1).max(1));
    }
}
