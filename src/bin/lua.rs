//! The file-reader entry point. Intentionally thin: no flags, no REPL —
//! reads a script path (or stdin, lacking one) and runs it.

use std::io::Read;
use std::process::ExitCode;

use lua_core::vm::LuaState;
use lua_core::{stdlib, LuaError};

fn read_source(path: Option<&str>) -> Result<(Vec<u8>, String), String> {
    match path {
        Some(path) => {
            let bytes = std::fs::read(path).map_err(|e| format!("lua: cannot open {path}: {e}"))?;
            Ok((bytes, path.to_string()))
        }
        None => {
            let mut bytes = Vec::new();
            std::io::stdin()
                .read_to_end(&mut bytes)
                .map_err(|e| format!("lua: cannot read stdin: {e}"))?;
            Ok((bytes, "stdin".to_string()))
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let path = std::env::args().nth(1);
    let (source, chunk_name) = match read_source(path.as_deref()) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let mut state = LuaState::new();
    if let Err(e) = stdlib::open_libs(&mut state) {
        eprintln!("lua: {e}");
        return ExitCode::FAILURE;
    }

    match lua_core::run(&mut state, &source, &chunk_name) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn report(e: &LuaError) {
    eprintln!("lua: {e}");
}
