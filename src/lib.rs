//! A minimal, embeddable Lua-like scripting language core: tagged values,
//! tables, closures with upvalues, metatables, an incremental tri-color
//! garbage collector, a single-pass register-based bytecode compiler and the
//! virtual machine that runs its output (see each module for the relevant
//! spec section).

pub mod compiler;
pub mod error;
pub mod gc;
pub mod lexer;
pub mod opcode;
pub mod stdlib;
pub mod value;
pub mod vm;

pub use error::{LuaError, LuaResult};
pub use value::LuaValue;
pub use vm::LuaState;

/// Compiles `source` under `chunk_name` and wraps the resulting top-level
/// [`value::Prototype`] in a closure with no upvalues, ready to
/// [`vm::LuaState::call_value`].
pub fn load(state: &mut LuaState, source: &[u8], chunk_name: &str) -> LuaResult<LuaValue> {
    let proto = compiler::Compiler::compile(source, chunk_name, &mut state.gc)?;
    let closure = value::Closure::Lua(value::LuaClosure {
        proto: std::rc::Rc::new(proto),
        upvalues: Vec::new(),
    });
    let id = state.gc.alloc_closure(closure);
    Ok(LuaValue::Closure(id))
}

/// Compiles and runs `source` as a new chunk, returning every value its
/// top-level `return` (if any) produced.
pub fn run(state: &mut LuaState, source: &[u8], chunk_name: &str) -> LuaResult<Vec<LuaValue>> {
    state.chunk_name = chunk_name.to_string();
    let f = load(state, source, chunk_name)?;
    let save = state.top();
    let n = state.call_value(f, 0, -1)?;
    let results = (0..n).map(|i| state.get_stack(save + i)).collect();
    state.set_top(save);
    Ok(results)
}
