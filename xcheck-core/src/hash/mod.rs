//! Structural hash engine
//!
//! Maps an in-memory value to a 64-bit checksum that is identical across
//! processes, builds and languages for logically equal values. This
//! determinism is what makes two program variants comparable: if the
//! variants hash an equal value differently, every later comparison reports
//! a false divergence.
//!
//! ## Primitive leaves
//!
//! ```text
//! hash(v) = bits(v) XOR (PRIMITIVE_SEED - type_code)
//! ```
//!
//! `bits` is the zero-extended bit pattern of the value at its own width
//! and `type_code` encodes signedness and width, so `1u8` and `1u32` hash
//! differently. `isize`/`usize` hash as `i64`/`u64`.
//!
//! ## Aggregates
//!
//! Field hashes are folded in declaration order by a
//! [`FieldCombiner`](combiner::FieldCombiner) (jodyhash by default):
//!
//! ```rust
//! use xcheck::hash::{hash_value, CrossCheckHash, HashContext};
//!
//! struct Foo { a: i32, b: i32 }
//! xcheck::cross_check_struct!(Foo { a, b });
//!
//! assert_eq!(hash_value(&Foo { a: 1000, b: 1337 }), 0x8eef_1fe2_e164_6370);
//! assert_ne!(hash_value(&Foo { a: 1000, b: 1337 }), hash_value(&Foo { a: 1337, b: 1000 }));
//! ```
//!
//! ## Pointers and sequences
//!
//! References, boxes and sequences consume one level of the depth budget
//! and hash their content. `None` hashes to [`NULL_POINTER_HASH`], empty
//! sequences to [`EMPTY_SEQUENCE_HASH`] and anything past the depth budget
//! to [`DEPTH_LIMIT_HASH`], which bounds cyclic and unbounded structures.

pub mod combiner;
mod impls;
mod macros;

use serde::{Deserialize, Serialize};

use self::combiner::{CombinerTable, FieldCombiner, JodyCombiner};

/// Base of every primitive hash
pub const PRIMITIVE_SEED: u64 = 0x7878_7878_7878_7878;

/// Reserved hash of a null pointer or `None` (ASCII "NullStar")
pub const NULL_POINTER_HASH: u64 = 0x7261_7453_6c6c_754e;

/// Reserved hash of a value beyond the depth budget (ASCII "LeafStar")
pub const DEPTH_LIMIT_HASH: u64 = 0x7261_7453_6661_654c;

/// Reserved hash of an empty sequence (ASCII "SeqEmpty")
pub const EMPTY_SEQUENCE_HASH: u64 = 0x7974_706d_4571_6553;

/// Type discriminant mixed into primitive hashes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PrimitiveKind {
    I8 = 0,
    I16 = 1,
    I32 = 2,
    I64 = 3,
    I128 = 4,
    U8 = 8,
    U16 = 9,
    U32 = 10,
    U64 = 11,
    U128 = 12,
    Bool = 16,
    Char = 17,
    F32 = 24,
    F64 = 25,
    Unit = 32,
}

impl PrimitiveKind {
    /// Discriminant subtracted from [`PRIMITIVE_SEED`]
    pub const fn code(self) -> u64 {
        self as u64
    }

    /// Type name used by the registration table
    pub const fn type_name(self) -> &'static str {
        match self {
            PrimitiveKind::I8 => "i8",
            PrimitiveKind::I16 => "i16",
            PrimitiveKind::I32 => "i32",
            PrimitiveKind::I64 => "i64",
            PrimitiveKind::I128 => "i128",
            PrimitiveKind::U8 => "u8",
            PrimitiveKind::U16 => "u16",
            PrimitiveKind::U32 => "u32",
            PrimitiveKind::U64 => "u64",
            PrimitiveKind::U128 => "u128",
            PrimitiveKind::Bool => "bool",
            PrimitiveKind::Char => "char",
            PrimitiveKind::F32 => "f32",
            PrimitiveKind::F64 => "f64",
            PrimitiveKind::Unit => "()",
        }
    }

    pub const ALL: [PrimitiveKind; 15] = [
        PrimitiveKind::I8,
        PrimitiveKind::I16,
        PrimitiveKind::I32,
        PrimitiveKind::I64,
        PrimitiveKind::I128,
        PrimitiveKind::U8,
        PrimitiveKind::U16,
        PrimitiveKind::U32,
        PrimitiveKind::U64,
        PrimitiveKind::U128,
        PrimitiveKind::Bool,
        PrimitiveKind::Char,
        PrimitiveKind::F32,
        PrimitiveKind::F64,
        PrimitiveKind::Unit,
    ];
}

/// Hash a primitive bit pattern of at most 64 bits
pub const fn hash_primitive(bits: u64, kind: PrimitiveKind) -> u64 {
    bits ^ PRIMITIVE_SEED.wrapping_sub(kind.code())
}

/// Hash a 128-bit primitive by folding its halves with jodyhash
pub const fn hash_primitive_wide(bits: u128, kind: PrimitiveKind) -> u64 {
    let folded = combiner::jody_step(combiner::jody_step(0, bits as u64), (bits >> 64) as u64);
    hash_primitive(folded, kind)
}

/// Traversal bounds for pointers, sequences and aggregates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashLimits {
    /// Levels of indirection/aggregation followed before returning
    /// [`DEPTH_LIMIT_HASH`]
    pub max_depth: usize,
    /// Elements of a sequence that contribute to its hash
    pub max_len: usize,
}

impl Default for HashLimits {
    fn default() -> Self {
        Self {
            max_depth: 8,
            max_len: 256,
        }
    }
}

impl HashLimits {
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_len(mut self, len: usize) -> Self {
        self.max_len = len;
        self
    }
}

static DEFAULT_COMBINER: JodyCombiner = JodyCombiner;

/// Per-traversal hashing state: remaining depth, length bound and the
/// per-type combiner table.
#[derive(Clone, Copy)]
pub struct HashContext<'a> {
    depth: usize,
    max_len: usize,
    combiners: Option<&'a CombinerTable>,
}

impl std::fmt::Debug for HashContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashContext")
            .field("depth", &self.depth)
            .field("max_len", &self.max_len)
            .field("custom_combiners", &self.combiners.is_some())
            .finish()
    }
}

impl HashContext<'static> {
    /// Context with the given limits and jodyhash for every aggregate
    pub fn new(limits: HashLimits) -> Self {
        Self {
            depth: limits.max_depth,
            max_len: limits.max_len,
            combiners: None,
        }
    }
}

impl Default for HashContext<'static> {
    fn default() -> Self {
        Self::new(HashLimits::default())
    }
}

impl<'a> HashContext<'a> {
    /// Context resolving per-type combiners from `table`
    pub fn with_combiners(limits: HashLimits, table: &'a CombinerTable) -> Self {
        Self {
            depth: limits.max_depth,
            max_len: limits.max_len,
            combiners: Some(table),
        }
    }

    /// Remaining depth budget
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Maximum number of sequence elements hashed
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Context one level deeper, or `None` when the budget is spent
    pub fn descend(&self) -> Option<HashContext<'a>> {
        if self.depth == 0 {
            return None;
        }
        Some(HashContext {
            depth: self.depth - 1,
            ..*self
        })
    }

    /// Combiner configured for `type_name`
    pub fn combiner_for(&self, type_name: &str) -> &'a dyn FieldCombiner {
        match self.combiners {
            Some(table) => table.for_type(type_name),
            None => &DEFAULT_COMBINER,
        }
    }

    /// Start hashing an aggregate of `type_name` field by field
    pub fn aggregate(&self, type_name: &str) -> AggregateHasher<'a> {
        let combiner = self.combiner_for(type_name);
        AggregateHasher {
            combiner,
            acc: combiner.seed(),
            child: self.descend(),
        }
    }

    /// Hash a sequence: first `max_len` elements, then the full length
    pub fn sequence<'t, T, I>(&self, len: usize, items: I) -> u64
    where
        T: CrossCheckHash + ?Sized + 't,
        I: IntoIterator<Item = &'t T>,
    {
        let child = match self.descend() {
            Some(child) => child,
            None => return DEPTH_LIMIT_HASH,
        };
        if len == 0 {
            return EMPTY_SEQUENCE_HASH;
        }
        let combiner = self.combiner_for("[]");
        let mut acc = combiner.seed();
        for item in items.into_iter().take(self.max_len) {
            acc = combiner.combine(acc, item.cross_check_hash(&child));
        }
        acc = combiner.combine(acc, hash_primitive(len as u64, PrimitiveKind::U64));
        combiner.finish(acc)
    }
}

/// Builder folding field hashes of one aggregate
pub struct AggregateHasher<'a> {
    combiner: &'a dyn FieldCombiner,
    acc: u64,
    child: Option<HashContext<'a>>,
}

impl<'a> AggregateHasher<'a> {
    /// Fold the next field, in declaration order
    pub fn field<T: CrossCheckHash + ?Sized>(mut self, value: &T) -> Self {
        if let Some(child) = self.child {
            self.acc = self.combiner.combine(self.acc, value.cross_check_hash(&child));
        }
        self
    }

    /// Fold a precomputed field hash (custom per-field strategies)
    pub fn field_hash(mut self, hash: u64) -> Self {
        if self.child.is_some() {
            self.acc = self.combiner.combine(self.acc, hash);
        }
        self
    }

    /// Context used for the fields of this aggregate
    pub fn child_context(&self) -> Option<HashContext<'a>> {
        self.child
    }

    pub fn finish(self) -> u64 {
        match self.child {
            Some(_) => self.combiner.finish(self.acc),
            None => DEPTH_LIMIT_HASH,
        }
    }
}

/// Capability of a value to produce its cross-check hash
///
/// Implemented for primitives, strings, references, boxes, options,
/// sequences and tuples. Structs implement it with
/// [`cross_check_struct!`](crate::cross_check_struct), C-like enums with
/// [`cross_check_enum!`](crate::cross_check_enum).
pub trait CrossCheckHash {
    fn cross_check_hash(&self, ctx: &HashContext<'_>) -> u64;
}

/// Hash a value with default limits and jodyhash for every aggregate
pub fn hash_value<T: CrossCheckHash + ?Sized>(value: &T) -> u64 {
    value.cross_check_hash(&HashContext::default())
}

/// Hash a value with explicit limits
pub fn hash_value_with<T: CrossCheckHash + ?Sized>(value: &T, limits: HashLimits) -> u64 {
    value.cross_check_hash(&HashContext::new(limits))
}
