//! Run seed synchronization and per-call sub-seed derivation.
//!
//! The host draws one seed per run and distributes it in `StartRun`. Every
//! participant stores it in a [`SeedSlot`] before generation begins, and
//! generation code asks the slot (through [`DeterminismHook`]) for a derived
//! seed per call site. Derivation is pure, so identical call sequences produce
//! identical seeds on every machine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use rand::Rng;

/// Sentinel for "no seed set".
pub const SEED_UNSET: i32 = i32::MIN;

const FNV_OFFSET: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;
const DERIVE_MULTIPLIER: i32 = 397;
const ZERO_FALLBACK_MIX: i32 = 0x5bd1_e995;

// ---------------------------------------------------------------------------
// Call sites
// ---------------------------------------------------------------------------

/// Identity of a seeded call in generation code, e.g. `Spawner::roll(int,float)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSite {
    pub declaring_type: String,
    pub method: String,
    pub params: Vec<String>,
}

impl CallSite {
    pub fn new(declaring_type: &str, method: &str, params: &[&str]) -> Self {
        Self {
            declaring_type: declaring_type.to_string(),
            method: method.to_string(),
            params: params.iter().map(|p| (*p).to_string()).collect(),
        }
    }

    /// `Type::method(P1,P2)`.
    pub fn signature(&self) -> String {
        format!(
            "{}::{}({})",
            self.declaring_type,
            self.method,
            self.params.join(",")
        )
    }

    /// FNV-1a over the UTF-8 signature. Never zero.
    pub fn stable_hash(&self) -> u32 {
        stable_hash(&self.signature())
    }
}

/// 32-bit FNV-1a. A zero result is replaced with the offset basis so the
/// hash never cancels out of the derivation.
pub fn stable_hash(text: &str) -> u32 {
    let hash = text.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    });
    if hash == 0 { FNV_OFFSET } else { hash }
}

/// Derive the seed for the `call_index`-th call of a site.
///
/// Never returns [`SEED_UNSET`]. A zero result is replaced by a fallback
/// mix of base and index, which is zero only when `base` equals
/// `0x5bd1e995 ^ call_index`.
pub fn derive_call_seed(base: i32, site_hash: u32, call_index: u32) -> i32 {
    let index = call_index as i32;
    let mut hash = base;
    hash = hash.wrapping_mul(DERIVE_MULTIPLIER) ^ site_hash as i32;
    hash = hash.wrapping_mul(DERIVE_MULTIPLIER) ^ index;
    if hash == i32::MIN {
        hash += 1;
    }
    if hash == 0 {
        hash = base ^ ZERO_FALLBACK_MIX ^ index;
        if hash == SEED_UNSET {
            hash += 1;
        }
    }
    hash
}

/// Draw a fresh run seed from the full `i32` range, excluding the sentinel.
pub fn draw_seed() -> i32 {
    let mut rng = rand::rng();
    loop {
        let seed: i32 = rng.random();
        if seed != SEED_UNSET {
            return seed;
        }
    }
}

// ---------------------------------------------------------------------------
// Seed slot
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CallCounters {
    /// Base seed the counters belong to.
    base: Option<i32>,
    next: HashMap<(u32, u64), u32>,
}

/// Holds the authoritative run seed and per-site call counters.
///
/// Written once per run by the network thread, read by generation code.
pub struct SeedSlot {
    base: AtomicI32,
    counters: Mutex<CallCounters>,
}

impl SeedSlot {
    pub fn new() -> Self {
        Self {
            base: AtomicI32::new(SEED_UNSET),
            counters: Mutex::new(CallCounters::default()),
        }
    }

    /// The process-wide slot.
    pub fn global() -> Arc<SeedSlot> {
        static GLOBAL: OnceLock<Arc<SeedSlot>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(SeedSlot::new())))
    }

    /// Store the run seed. Storing [`SEED_UNSET`] clears the slot.
    pub fn set_base(&self, seed: i32) {
        self.base.store(seed, Ordering::SeqCst);
        tracing::info!(seed, "Run seed set");
    }

    /// Forget the run seed.
    pub fn clear(&self) {
        self.base.store(SEED_UNSET, Ordering::SeqCst);
    }

    /// The run seed, if one is set.
    pub fn base(&self) -> Option<i32> {
        match self.base.load(Ordering::SeqCst) {
            SEED_UNSET => None,
            seed => Some(seed),
        }
    }

    /// Advance and return the call index for a site and instance. Counters
    /// restart whenever the base seed differs from the one they were built for.
    pub fn next_call_index(&self, site_hash: u32, instance: u64) -> u32 {
        let base = self.base();
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        if counters.base != base {
            counters.base = base;
            counters.next.clear();
        }
        let slot = counters.next.entry((site_hash, instance)).or_insert(0);
        let index = *slot;
        *slot = slot.wrapping_add(1);
        index
    }
}

impl Default for SeedSlot {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Determinism hook
// ---------------------------------------------------------------------------

/// Seed source consulted by generation code at each seeded call.
pub trait DeterminismHook: Send + Sync {
    /// The run seed, if a run has started.
    fn resolve_base_seed(&self) -> Option<i32>;

    /// Seed for the given call of `site`. `None` until a run seed is set.
    fn derive_call_seed(&self, site: &CallSite, call_index: u32) -> Option<i32>;

    /// Seed for the next call of `site` on `instance` (0 for static calls).
    fn next_call_seed(&self, site: &CallSite, instance: u64) -> Option<i32>;
}

impl DeterminismHook for SeedSlot {
    fn resolve_base_seed(&self) -> Option<i32> {
        self.base()
    }

    fn derive_call_seed(&self, site: &CallSite, call_index: u32) -> Option<i32> {
        let base = self.base()?;
        Some(derive_call_seed(base, site.stable_hash(), call_index))
    }

    fn next_call_seed(&self, site: &CallSite, instance: u64) -> Option<i32> {
        let base = self.base()?;
        let hash = site.stable_hash();
        let index = self.next_call_index(hash, instance);
        Some(derive_call_seed(base, hash, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_reference_values() {
        // Published FNV-1a 32-bit test vectors.
        assert_eq!(stable_hash(""), 0x811C_9DC5);
        assert_eq!(stable_hash("a"), 0xE40C_292C);
        assert_eq!(stable_hash("foobar"), 0xBF9C_F968);
    }

    #[test]
    fn test_signature_format() {
        let site = CallSite::new("MapGenerator", "Generate", &["Int32", "Single"]);
        assert_eq!(site.signature(), "MapGenerator::Generate(Int32,Single)");
        let bare = CallSite::new("Rng", "Next", &[]);
        assert_eq!(bare.signature(), "Rng::Next()");
    }

    #[test]
    fn test_derive_matches_hand_computation() {
        let base: i32 = 12345;
        let site = 0xDEAD_BEEF_u32;
        let mut expected = base.wrapping_mul(397) ^ site as i32;
        expected = expected.wrapping_mul(397) ^ 3;
        assert_eq!(derive_call_seed(base, site, 3), expected);
    }

    #[test]
    fn test_derive_is_pure() {
        let site = CallSite::new("Chest", "Roll", &["Int32"]).stable_hash();
        for i in 0..100 {
            assert_eq!(derive_call_seed(777, site, i), derive_call_seed(777, site, i));
        }
        assert_ne!(derive_call_seed(777, site, 0), derive_call_seed(777, site, 1));
        assert_ne!(derive_call_seed(777, site, 0), derive_call_seed(778, site, 0));
    }

    #[test]
    fn test_derive_never_returns_sentinel() {
        for base in [i32::MIN, -1, 0, 1, i32::MAX] {
            for index in 0..64 {
                assert_ne!(derive_call_seed(base, 0x811C_9DC5, index), SEED_UNSET);
            }
        }
    }

    #[test]
    fn test_fallback_never_yields_sentinel() {
        // Site hash chosen so the first stage collapses to zero; the fallback
        // mix then lands exactly on the sentinel.
        let base = i32::MIN ^ ZERO_FALLBACK_MIX;
        let site = base.wrapping_mul(DERIVE_MULTIPLIER) as u32;
        assert_eq!(derive_call_seed(base, site, 0), i32::MIN + 1);
    }

    #[test]
    fn test_zero_result_uses_fallback_mix() {
        // base 0 with site hash 0 and index 0 collapses to zero before the fallback.
        assert_eq!(derive_call_seed(0, 0, 0), ZERO_FALLBACK_MIX);
    }

    #[test]
    fn test_slot_starts_unset() {
        let slot = SeedSlot::new();
        assert_eq!(slot.base(), None);
        let site = CallSite::new("A", "b", &[]);
        assert_eq!(slot.next_call_seed(&site, 0), None);
        assert_eq!(slot.resolve_base_seed(), None);
    }

    #[test]
    fn test_call_indices_advance_per_site_and_instance() {
        let slot = SeedSlot::new();
        slot.set_base(42);
        let site = CallSite::new("Loot", "Roll", &[]);
        let hash = site.stable_hash();

        let first = slot.next_call_seed(&site, 0).unwrap();
        let second = slot.next_call_seed(&site, 0).unwrap();
        let other_instance = slot.next_call_seed(&site, 9).unwrap();

        assert_eq!(first, derive_call_seed(42, hash, 0));
        assert_eq!(second, derive_call_seed(42, hash, 1));
        assert_eq!(other_instance, derive_call_seed(42, hash, 0));
    }

    #[test]
    fn test_counters_reset_when_seed_changes() {
        let slot = SeedSlot::new();
        let site = CallSite::new("Loot", "Roll", &[]);
        slot.set_base(1);
        slot.next_call_seed(&site, 0);
        slot.next_call_seed(&site, 0);

        slot.set_base(2);
        assert_eq!(
            slot.next_call_seed(&site, 0),
            Some(derive_call_seed(2, site.stable_hash(), 0))
        );
    }

    #[test]
    fn test_two_slots_same_sequence() {
        let host = SeedSlot::new();
        let client = SeedSlot::new();
        host.set_base(-99_000);
        client.set_base(-99_000);
        let site = CallSite::new("Level", "Place", &["Vector3"]);
        let a: Vec<_> = (0..10).map(|_| host.next_call_seed(&site, 0)).collect();
        let b: Vec<_> = (0..10).map(|_| client.next_call_seed(&site, 0)).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_draw_seed_avoids_sentinel() {
        for _ in 0..1000 {
            assert_ne!(draw_seed(), SEED_UNSET);
        }
    }

    #[test]
    fn test_clear_unsets() {
        let slot = SeedSlot::new();
        slot.set_base(5);
        slot.clear();
        assert_eq!(slot.base(), None);
    }
}
