//! Interned, immutable byte strings.

use std::hash::{Hash, Hasher};

/// A single interned string. Content is immutable after creation; equality
/// between two `LuaValue::String`s is decided purely by `StringId` equality
/// because the string table guarantees at most one live `LuaStr` per
/// content, so "equal content" and "same id" coincide: two equal-content
/// strings returned by any API are pointer-equal.
#[derive(Debug, Clone)]
pub struct LuaStr {
    data: Box<str>,
    hash: u64,
    /// Reserved-keyword strings (and a handful of interned constants used by
    /// the GC itself, e.g. the out-of-memory message) are `fixed`: never
    /// considered for collection, so the lexer can hand out references to
    /// them without worrying about a GC cycle running mid-tokenize.
    pub fixed: bool,
}

impl LuaStr {
    pub fn new(data: impl Into<Box<str>>, hash: u64) -> Self {
        LuaStr {
            data: data.into(),
            hash,
            fixed: false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.data
    }

    #[inline(always)]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl PartialEq for LuaStr {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.data == other.data
    }
}
impl Eq for LuaStr {}

impl Hash for LuaStr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// Content hash used both by the intern table and cached on the object
/// itself, so re-hashing after a GC resurrection is never necessary.
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    use std::hash::Hasher;
    let mut h = ahash::AHasher::default();
    h.write(bytes);
    h.finish()
}
