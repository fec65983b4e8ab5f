//! Field combiners for aggregate hashing
//!
//! A combiner folds the hashes of an aggregate's fields, in declaration
//! order, into one 64-bit value. Combiners must be non-commutative so that
//! permuted fields produce a different aggregate hash.
//!
//! Two combiners ship with the crate:
//!
//! - [`JodyCombiner`] (`"jody"`, the default): jodyhash over 64-bit words
//! - [`RotateXorCombiner`] (`"rotate_xor"`): `acc = rotl(acc, k) ^ acc * C ^ x`
//!
//! Both variants of a cross-checked program must use the same combiner for
//! a given type, otherwise every aggregate of that type diverges.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, XCheckError};

/// Additive constant of the jodyhash round
pub const JODY_HASH_CONSTANT: u64 = 0x1f3d_5b79;

/// Rotation of the jodyhash round
pub const JODY_HASH_SHIFT: u32 = 14;

/// One jodyhash round over a 64-bit word
pub const fn jody_step(acc: u64, word: u64) -> u64 {
    let mut h = acc.wrapping_add(word).wrapping_add(JODY_HASH_CONSTANT);
    h = h.rotate_left(JODY_HASH_SHIFT);
    h ^= word;
    h = h.rotate_left(JODY_HASH_SHIFT);
    h ^= JODY_HASH_CONSTANT;
    h.wrapping_add(word)
}

/// Strategy for folding field hashes into an aggregate hash
pub trait FieldCombiner: Send + Sync {
    /// Name the configuration refers to this combiner by
    fn name(&self) -> &str;

    /// Initial accumulator
    fn seed(&self) -> u64 {
        0
    }

    /// Fold one field hash into the accumulator
    fn combine(&self, acc: u64, field: u64) -> u64;

    /// Final transformation of the accumulator
    fn finish(&self, acc: u64) -> u64 {
        acc
    }
}

/// jodyhash combiner (seed 0, no finalization)
#[derive(Debug, Clone, Copy, Default)]
pub struct JodyCombiner;

impl FieldCombiner for JodyCombiner {
    fn name(&self) -> &str {
        "jody"
    }

    fn combine(&self, acc: u64, field: u64) -> u64 {
        jody_step(acc, field)
    }
}

/// Rotate/multiply/xor combiner
#[derive(Debug, Clone, Copy)]
pub struct RotateXorCombiner {
    pub rotation: u32,
    pub multiplier: u64,
    pub seed: u64,
}

impl Default for RotateXorCombiner {
    fn default() -> Self {
        Self {
            rotation: 27,
            multiplier: 0x9e37_79b9_7f4a_7c15,
            seed: 0x5851_f42d_4c95_7f2d,
        }
    }
}

impl FieldCombiner for RotateXorCombiner {
    fn name(&self) -> &str {
        "rotate_xor"
    }

    fn seed(&self) -> u64 {
        self.seed
    }

    fn combine(&self, acc: u64, field: u64) -> u64 {
        acc.rotate_left(self.rotation) ^ acc.wrapping_mul(self.multiplier) ^ field
    }
}

/// Read-mostly table of available combiners and per-type assignments
///
/// Built once while the registration table is validated; hashing only
/// performs lookups.
#[derive(Clone)]
pub struct CombinerTable {
    default: Arc<dyn FieldCombiner>,
    available: HashMap<String, Arc<dyn FieldCombiner>>,
    by_type: HashMap<String, Arc<dyn FieldCombiner>>,
}

impl std::fmt::Debug for CombinerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut available: Vec<_> = self.available.keys().collect();
        available.sort();
        f.debug_struct("CombinerTable")
            .field("default", &self.default.name())
            .field("available", &available)
            .field("assigned_types", &self.by_type.len())
            .finish()
    }
}

impl CombinerTable {
    /// Create a table with the built-in combiners and jodyhash as default
    pub fn new() -> Self {
        let mut table = Self {
            default: Arc::new(JodyCombiner),
            available: HashMap::new(),
            by_type: HashMap::new(),
        };
        table.register(Arc::new(JodyCombiner));
        table.register(Arc::new(RotateXorCombiner::default()));
        table
    }

    /// Make a combiner available under its name
    pub fn register(&mut self, combiner: Arc<dyn FieldCombiner>) {
        self.available
            .insert(combiner.name().to_string(), combiner);
    }

    /// Use the named combiner for every aggregate of `type_name`
    pub fn assign(&mut self, type_name: &str, combiner: &str) -> Result<()> {
        let resolved = self
            .available
            .get(combiner)
            .cloned()
            .ok_or_else(|| XCheckError::UnknownCombiner {
                type_name: type_name.to_string(),
                combiner: combiner.to_string(),
            })?;
        self.by_type.insert(type_name.to_string(), resolved);
        Ok(())
    }

    /// Replace the default combiner used by unassigned types
    pub fn set_default(&mut self, combiner: &str) -> Result<()> {
        self.default = self
            .available
            .get(combiner)
            .cloned()
            .ok_or_else(|| XCheckError::UnknownCombiner {
                type_name: "*".to_string(),
                combiner: combiner.to_string(),
            })?;
        Ok(())
    }

    /// Combiner for a type, falling back to the default
    pub fn for_type(&self, type_name: &str) -> &dyn FieldCombiner {
        self.by_type
            .get(type_name)
            .unwrap_or(&self.default)
            .as_ref()
    }

    /// Whether a combiner with this name is available
    pub fn contains(&self, combiner: &str) -> bool {
        self.available.contains_key(combiner)
    }
}

impl Default for CombinerTable {
    fn default() -> Self {
        Self::new()
    }
}
