//! Function identity tags
//!
//! Entry and Exit records carry a 32-bit tag derived from the function's
//! name with djb2 (`h = 5381; h = h * 33 + byte`). The tag depends only on
//! the name, so it is stable across calls, builds and languages.
//!
//! [`tag_of`] is a `const fn`, letting instrumented code compute tags at
//! compile time:
//!
//! ```rust
//! use xcheck::identity::tag_of;
//!
//! const MAIN: u32 = tag_of("main");
//! assert_eq!(MAIN, 0x7c9a_7f6a);
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, XCheckError};

/// Initial djb2 state
pub const DJB2_SEED: u32 = 5381;

/// Identity tag of a function name
pub const fn tag_of(name: &str) -> u32 {
    let bytes = name.as_bytes();
    let mut hash = DJB2_SEED;
    let mut i = 0;
    while i < bytes.len() {
        hash = hash.wrapping_mul(33).wrapping_add(bytes[i] as u32);
        i += 1;
    }
    hash
}

/// Tag → name mapping used to render diagnostics
///
/// Inserting a second name with an existing tag is a collision and is
/// rejected, because a collision would make Entry/Exit mismatches
/// indistinguishable from tag aliasing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolTable {
    names: HashMap<u32, String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from function names
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = Self::new();
        for name in names {
            table.insert(name.as_ref())?;
        }
        Ok(table)
    }

    /// Register a name and return its tag
    pub fn insert(&mut self, name: &str) -> Result<u32> {
        let tag = tag_of(name);
        match self.names.get(&tag) {
            Some(existing) if existing != name => Err(XCheckError::TagCollision {
                tag,
                first: existing.clone(),
                second: name.to_string(),
            }),
            Some(_) => Ok(tag),
            None => {
                self.names.insert(tag, name.to_string());
                Ok(tag)
            }
        }
    }

    /// Name registered for a tag
    pub fn resolve(&self, tag: u32) -> Option<&str> {
        self.names.get(&tag).map(|s| s.as_str())
    }

    /// Render a tag as `name (0x........)` when known
    pub fn describe(&self, tag: u32) -> String {
        match self.resolve(tag) {
            Some(name) => format!("{} ({:#010x})", name, tag),
            None => format!("{:#010x}", tag),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
