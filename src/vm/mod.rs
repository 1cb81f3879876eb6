//! The virtual machine: per-thread state, the call-info stack, metamethod
//! dispatch and the fetch-decode-execute loop.

mod api;
mod arith;
mod call;
mod call_info;
mod exec;
mod limits;
mod metamethods;
mod state;

pub use api::{upvalueindex, DebugInfo, ENVIRONINDEX, GLOBALSINDEX, REGISTRYINDEX};
pub use call_info::CallInfo;
pub use limits::VmLimits;
pub use metamethods::Metamethod;
pub use state::{format_lua_number, parse_lua_numeral, type_name, LuaState};
