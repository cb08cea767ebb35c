//! Engine configuration: the option table from spec §6, validated once at
//! construction time and never consulted for runtime error handling.

use serde::{Deserialize, Serialize};

use crate::consts::SLABCLASS_MAX_ID;
use crate::error::{CacheError, Result};

/// Tunables recognized by the engine. Mirrors `CacheConfig` in the teacher's
/// query cache: a plain struct with a `validate()` gate, never re-checked
/// after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Allocate the entire heap up front at start-up.
    pub prealloc: bool,
    /// LRU eviction when true, random sampling otherwise.
    pub evict_lru: bool,
    /// Allow allocation from per-class freelists (else always carve fresh
    /// chunks from the current slab).
    pub use_freeq: bool,
    /// Reserve 8 inline bytes per item for a CAS value.
    pub use_cas: bool,
    /// Heap capacity in bytes.
    pub maxbytes: u64,
    /// Slab size in bytes, header included.
    pub slab_size: u32,
    /// Hash bucket count is `2^hash_power`.
    pub hash_power: u8,
    /// Ordered, strictly increasing class chunk sizes (1-indexed by class
    /// id: `profile[0]` is class 1).
    pub profile: Vec<u32>,
    /// Highest valid class id in `profile` (`profile.len()` as a `u8`,
    /// carried separately because the original exposes it independently).
    pub profile_last_id: u8,
    /// Items last touched at or before this time are treated as expired,
    /// regardless of their own `exptime` (advisory flush watermark).
    pub oldest_live: u32,
    /// Run-time equivalent of the original's `CC_CHAINED` compile flag: permit
    /// values that span more than one node. See SPEC_FULL.md §6.
    pub chained: bool,
}

impl Config {
    /// The configuration implied by spec.md §8's seeded end-to-end
    /// scenarios: `profile = {128, 256, 512, 1024}`, `slab_size = 1056`
    /// (32-byte header + 1024 payload), `maxbytes = 8448` (~8 slabs).
    pub fn scenario_default() -> Self {
        Self {
            prealloc: true,
            evict_lru: true,
            use_freeq: true,
            use_cas: false,
            maxbytes: 8448,
            slab_size: 1056,
            hash_power: 4,
            profile: vec![128, 256, 512, 1024],
            profile_last_id: 4,
            oldest_live: 0,
            chained: true,
        }
    }

    /// Reject configurations the engine cannot safely start with. Mirrors
    /// `CacheConfig::validate` in the teacher: every check is a cheap
    /// up-front rejection, never deferred to a runtime path.
    pub fn validate(&self) -> Result<()> {
        if self.slab_size == 0 {
            return Err(CacheError::Config("slab_size must be non-zero".into()));
        }
        if self.maxbytes == 0 {
            return Err(CacheError::Config("maxbytes must be non-zero".into()));
        }
        if self.maxbytes < self.slab_size as u64 {
            return Err(CacheError::Config(
                "maxbytes must hold at least one slab".into(),
            ));
        }
        if self.hash_power == 0 || self.hash_power > 32 {
            return Err(CacheError::Config(format!(
                "hash_power must be in 1..=32, got {}",
                self.hash_power
            )));
        }
        if self.profile.is_empty() {
            return Err(CacheError::Config("profile must not be empty".into()));
        }
        if self.profile.len() > SLABCLASS_MAX_ID as usize {
            return Err(CacheError::Config(format!(
                "profile has {} classes, exceeds SLABCLASS_MAX_ID ({})",
                self.profile.len(),
                SLABCLASS_MAX_ID
            )));
        }
        if self.profile_last_id as usize != self.profile.len() {
            return Err(CacheError::Config(format!(
                "profile_last_id ({}) must equal profile.len() ({})",
                self.profile_last_id,
                self.profile.len()
            )));
        }
        for pair in self.profile.windows(2) {
            if pair[0] >= pair[1] {
                return Err(CacheError::Config(format!(
                    "profile must be strictly increasing, got {} then {}",
                    pair[0], pair[1]
                )));
            }
        }
        let payload = self
            .slab_size
            .checked_sub(crate::consts::SLAB_HDR_SIZE as u32)
            .ok_or_else(|| {
                CacheError::Config("slab_size smaller than slab header".into())
            })?;
        if let Some(&largest) = self.profile.last() {
            if largest > payload {
                return Err(CacheError::Config(format!(
                    "largest class ({largest}) does not fit a slab payload ({payload})"
                )));
            }
        }
        if self.prealloc {
            let max_slabs = self.maxbytes / self.slab_size as u64;
            if max_slabs < self.profile.len() as u64 {
                return Err(CacheError::Config(format!(
                    "prealloc requires at least one slab per class ({} classes, {} slabs fit in maxbytes)",
                    self.profile.len(),
                    max_slabs
                )));
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::scenario_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().expect("default config is valid");
    }

    #[test]
    fn rejects_zero_slab_size() {
        let mut cfg = Config::default();
        cfg.slab_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_increasing_profile() {
        let mut cfg = Config::default();
        cfg.profile = vec![128, 128, 512, 1024];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_profile_last_id_mismatch() {
        let mut cfg = Config::default();
        cfg.profile_last_id = 2;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_hash_power_out_of_range() {
        let mut cfg = Config::default();
        cfg.hash_power = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_class_too_large_for_slab() {
        let mut cfg = Config::default();
        cfg.profile = vec![128, 256, 512, 2048];
        cfg.profile_last_id = 4;
        assert!(cfg.validate().is_err());
    }
}
