//! Region-mode control entry points.
//!
//! `region_begin` flips the calling thread's allocation routing into the
//! configured region discipline; `region_end` flips it back and releases
//! everything the region held. Application code is expected to pair the
//! two like a scoped resource acquisition (`fleetalloc_core::RegionScope`
//! is the safe-Rust spelling); a thread that exits without `region_end`
//! keeps its region memory until process exit.

use fleetalloc_core::policy::RegionConfig;
use fleetalloc_core::telemetry::{self, LogLevel};
use fleetalloc_core::with_mode;

/// Activates region mode for the calling thread.
///
/// Flags mirror the historical interposition surface: `disable_free`
/// selects the bump discipline (frees become no-ops); otherwise
/// `same_size` must be set and selects the same-size freelist, with
/// `one_size` as the fixed object size. `all_aligned`/`all_non_zero` are
/// caller promises that skip the size-adjustment policy, and
/// `size_taken` declares that `malloc_usable_size` will be used.
///
/// A configuration that selects no discipline is a programming error:
/// it asserts in debug builds and leaves region mode untouched in
/// release builds. Calling this while a region is already active
/// replaces it (the prior region's memory is released first); nesting is
/// not supported.
///
/// # Safety
///
/// Callers must uphold whatever promises the flags make (alignment,
/// nonzero sizes, same-size requests).
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn region_begin(
    all_aligned: bool,
    all_non_zero: bool,
    size_taken: bool,
    same_size: bool,
    disable_free: bool,
    one_size: usize,
) {
    match RegionConfig::from_abi_flags(
        all_aligned,
        all_non_zero,
        size_taken,
        same_size,
        disable_free,
        one_size,
    ) {
        Ok(config) => {
            with_mode(|mode| mode.begin(config));
            telemetry::record(
                LogLevel::Info,
                "region_begin",
                "begin",
                "active",
                config.one_size,
            );
        }
        Err(err) => {
            debug_assert!(false, "invalid region configuration: {err}");
            telemetry::record(
                LogLevel::Error,
                "region_begin",
                "policy_rejected",
                "ignored",
                None,
            );
        }
    }
}

/// Deactivates region mode for the calling thread, releasing all memory
/// held by its region sub-allocators. A no-op if no region is active.
///
/// # Safety
///
/// Every pointer obtained from the region becomes dead; the caller must
/// not touch region pointers afterwards.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn region_end() {
    with_mode(|mode| mode.end());
    telemetry::record(LogLevel::Info, "region_end", "end", "inactive", None);
}
