//! VM-wide resource limits. Plain config struct, threaded into
//! [`super::LuaState`] at construction, generalizing a fixed set of
//! `lua_limits`-style constants into something an embedder can override.

#[derive(Debug, Clone, Copy)]
pub struct VmLimits {
    /// Hard cap on value-stack slots; growth doubles capacity up to this
    /// ceiling before raising a stack overflow error.
    pub max_stack_slots: usize,
    /// Hard cap on call-info depth.
    pub max_call_depth: usize,
    /// Extra stack slots kept free above a frame's declared top, so a C
    /// function always has room to push a handful of temporaries without an
    /// explicit growth check.
    pub extra_stack: usize,
    /// Maximum `__index`/`__newindex` chain hops before raising "loop in
    /// gettable".
    pub max_index_chain: usize,
}

impl Default for VmLimits {
    fn default() -> Self {
        VmLimits {
            max_stack_slots: 8000,
            max_call_depth: 20000,
            extra_stack: 5,
            max_index_chain: 100,
        }
    }
}
