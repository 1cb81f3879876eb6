//! The base library: the handful of globals the end-to-end language
//! scenarios actually call (`print`, `pairs`, `pcall`, ...).
//! String/table/io/os/coroutine/debug libraries are out of scope.

pub mod basic;

use crate::vm::LuaState;
use crate::LuaResult;

/// Installs the base library into `state`'s globals. The only collaborator
/// that touches the OS directly is `print`, via `std::io::stdout`.
pub fn open_libs(state: &mut LuaState) -> LuaResult<()> {
    basic::install(state)
}
