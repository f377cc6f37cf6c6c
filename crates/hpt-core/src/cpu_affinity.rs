//! CPU affinity utilities for binding threads to specific cores.
//!
//! The spin-wait timer occupies one logical processor for its whole lifetime.
//! Pinning it keeps the busy loop off the scheduler's migration path, which
//! would otherwise show up as jitter. This module wraps the `core_affinity`
//! crate with a small API.

use tracing::{info, warn};

/// Number of logical processors visible to this process.
///
/// Falls back to `std::thread::available_parallelism` when the affinity
/// backend cannot enumerate cores, and to 1 if neither source answers.
pub fn processor_count() -> usize {
    match core_affinity::get_core_ids() {
        Some(ids) if !ids.is_empty() => ids.len(),
        _ => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
    }
}

/// Single-bit affinity mask selecting `core_id`, or `0` if it cannot be
/// represented in 64 bits.
#[inline]
pub fn core_mask(core_id: usize) -> u64 {
    1u64.checked_shl(core_id as u32).unwrap_or(0)
}

/// Bind the current thread to the specified CPU core.
///
/// Returns `true` if the binding succeeded, `false` if the core ID is invalid
/// or the OS rejected the request.
///
/// # Example
///
/// ```ignore
/// std::thread::spawn(move || {
///     hpt_core::cpu_affinity::bind_to_core(2);
///     // This thread now runs exclusively on core 2
///     hot_loop();
/// });
/// ```
pub fn bind_to_core(core_id: usize) -> bool {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    if let Some(core) = core_ids.iter().find(|c| c.id == core_id) {
        let ok = core_affinity::set_for_current(*core);
        if ok {
            info!("bound thread to CPU core {core_id} (mask {:#x})", core_mask(core_id));
        } else {
            warn!("failed to bind thread to CPU core {core_id}");
        }
        ok
    } else {
        warn!(
            "CPU core {core_id} not available (system has {} cores)",
            core_ids.len()
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_is_single_bit() {
        assert_eq!(core_mask(0), 0b1);
        assert_eq!(core_mask(1), 0b10);
        assert_eq!(core_mask(5), 0b10_0000);
        assert_eq!(core_mask(63), 1u64 << 63);
    }

    #[test]
    fn mask_out_of_range_is_zero() {
        assert_eq!(core_mask(64), 0);
        assert_eq!(core_mask(1000), 0);
    }

    #[test]
    fn at_least_one_processor() {
        assert!(processor_count() >= 1);
    }

    #[test]
    fn nonexistent_core_is_rejected() {
        assert!(!bind_to_core(usize::MAX));
    }
}
