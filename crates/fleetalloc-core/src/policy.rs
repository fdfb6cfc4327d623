//! Region-mode configuration.
//!
//! The ABI surface takes the historical six-flag form of `region_begin`;
//! internally exactly one allocation discipline is active, so the
//! configuration is a sum type and the "at least one discipline" rule is
//! checked once, at the boundary, instead of on every call.

use fleetalloc_layers::MIN_ALIGNMENT;
use fleetalloc_layers::size_class::align_up;
use thiserror::Error;

/// The allocation discipline serving a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionDiscipline {
    /// Bump allocation out of arenas; frees are no-ops and everything is
    /// reclaimed at once when the region ends.
    Bump,
    /// A single freelist of same-size blocks; frees recycle blocks.
    SameSizeFreelist,
}

/// Rejected `region_begin` configurations.
///
/// These are programming errors in the caller, not runtime conditions:
/// the ABI asserts on them in debug builds and refuses to activate the
/// region in release builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("no allocation discipline selected: set disable_free or same_size")]
    NoDiscipline,
    #[error("same_size region configured with a zero object size")]
    ZeroOneSize,
}

/// Validated region-mode configuration for one `region_begin`/`region_end`
/// lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionConfig {
    /// Caller promises every request size is already aligned; skip the
    /// alignment/zero-floor adjustment entirely.
    pub assume_aligned: bool,
    /// Caller promises no zero-byte requests; skip the zero floor.
    pub assume_nonzero: bool,
    /// `malloc_usable_size` will be called on region pointers, so size
    /// metadata must be recoverable.
    pub size_taken: bool,
    /// All requests share this exact size. Answers size queries without
    /// headers and drives the same-size freelist's block size.
    pub one_size: Option<usize>,
    pub discipline: RegionDiscipline,
}

impl RegionConfig {
    /// The historical interposition defaults: bump discipline with size
    /// support, no caller promises.
    pub const DEFAULT: RegionConfig = RegionConfig {
        assume_aligned: false,
        assume_nonzero: false,
        size_taken: true,
        one_size: None,
        discipline: RegionDiscipline::Bump,
    };

    /// Builds a configuration from the raw ABI flag set.
    ///
    /// `disable_free` selects the bump discipline; otherwise `same_size`
    /// must be set and selects the freelist discipline. `one_size` is
    /// meaningful only with `same_size`.
    pub fn from_abi_flags(
        all_aligned: bool,
        all_non_zero: bool,
        size_taken: bool,
        same_size: bool,
        disable_free: bool,
        one_size: usize,
    ) -> Result<RegionConfig, PolicyError> {
        if !disable_free && !same_size {
            return Err(PolicyError::NoDiscipline);
        }
        if same_size && one_size == 0 {
            return Err(PolicyError::ZeroOneSize);
        }
        let discipline = if disable_free {
            RegionDiscipline::Bump
        } else {
            RegionDiscipline::SameSizeFreelist
        };
        Ok(RegionConfig {
            assume_aligned: all_aligned,
            assume_nonzero: all_non_zero,
            size_taken,
            one_size: if same_size { Some(one_size) } else { None },
            discipline,
        })
    }

    /// Applies the alignment/zero-floor policy to a requested size.
    #[inline]
    #[must_use]
    pub fn effective_size(&self, req: usize) -> usize {
        if self.assume_aligned {
            return req;
        }
        let mut size = req;
        if !self.assume_nonzero && size < MIN_ALIGNMENT {
            size = MIN_ALIGNMENT;
        }
        align_up(size, MIN_ALIGNMENT)
    }

    /// Whether allocations must be wrapped with an object header.
    ///
    /// Only the bump discipline with size support needs one; a same-size
    /// region answers every size query with `one_size`, so the header is
    /// statically skipped.
    #[inline]
    #[must_use]
    pub fn needs_header(&self) -> bool {
        self.size_taken && self.one_size.is_none() && self.discipline == RegionDiscipline::Bump
    }
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
