//! `_G` base functions: `print`, `type`, `tostring`, `tonumber`, `pairs`,
//! `ipairs`, `next`, `setmetatable`, `getmetatable`, `rawget`, `rawset`,
//! `rawequal`, `rawlen`, `pcall`, `xpcall`, `error`, `assert`, `select`,
//! `unpack`.

use crate::error::LuaError;
use crate::value::{LuaValue, TableId};
use crate::vm::{type_name, LuaState};
use crate::LuaResult;

pub fn install(state: &mut LuaState) -> LuaResult<()> {
    let entries: &[(&str, crate::value::CFunction)] = &[
        ("print", lua_print),
        ("type", lua_type),
        ("tostring", lua_tostring),
        ("tonumber", lua_tonumber),
        ("pairs", lua_pairs),
        ("ipairs", lua_ipairs),
        ("next", lua_next),
        ("setmetatable", lua_setmetatable),
        ("getmetatable", lua_getmetatable),
        ("rawget", lua_rawget),
        ("rawset", lua_rawset),
        ("rawequal", lua_rawequal),
        ("rawlen", lua_rawlen),
        ("pcall", lua_pcall),
        ("xpcall", lua_xpcall),
        ("error", lua_error),
        ("assert", lua_assert),
        ("select", lua_select),
        ("unpack", lua_unpack),
    ];
    for (name, f) in entries {
        state.set_global(name, LuaValue::CFunction(*f))?;
    }
    Ok(())
}

/// Re-pushes the `nargs` arguments already sitting at this frame's base as
/// results, the shape `assert` and a few others need ("return everything
/// you were given").
fn return_args(state: &mut LuaState, nargs: usize) -> usize {
    for i in 0..nargs {
        let v = state.reg(i as u32);
        state.push(v);
    }
    nargs
}

fn arg_error(state: &mut LuaState, n: usize, fname: &str, expected: &str, got: LuaValue) -> LuaError {
    state.raise_string(format!(
        "bad argument #{n} to '{fname}' ({expected} expected, got {})",
        type_name(got)
    ))
}

fn check_table(state: &mut LuaState, v: LuaValue, fname: &str, argn: usize) -> LuaResult<TableId> {
    v.as_table().ok_or_else(|| arg_error(state, argn, fname, "table", v))
}

fn lua_print(state: &mut LuaState, nargs: usize) -> LuaResult<usize> {
    let mut parts = Vec::with_capacity(nargs);
    for i in 0..nargs {
        let v = state.reg(i as u32);
        parts.push(state.tostring(v)?);
    }
    println!("{}", parts.join("\t"));
    Ok(0)
}

fn lua_type(state: &mut LuaState, nargs: usize) -> LuaResult<usize> {
    if nargs == 0 {
        return Err(state.raise_string("bad argument #1 to 'type' (value expected)"));
    }
    let v = state.reg(0);
    let name = state.intern_display(type_name(v).to_string());
    state.push(name);
    Ok(1)
}

fn lua_tostring(state: &mut LuaState, nargs: usize) -> LuaResult<usize> {
    if nargs == 0 {
        return Err(state.raise_string("bad argument #1 to 'tostring' (value expected)"));
    }
    let v = state.reg(0);
    let s = state.tostring(v)?;
    let sv = state.intern_display(s);
    state.push(sv);
    Ok(1)
}

fn lua_tonumber(state: &mut LuaState, nargs: usize) -> LuaResult<usize> {
    if nargs == 0 {
        return Err(state.raise_string("bad argument #1 to 'tonumber' (value expected)"));
    }
    let v = state.reg(0);
    if nargs > 1 {
        let base = state.reg(1).as_integer().unwrap_or(10);
        let result = match v.as_string() {
            Some(sid) if (2..=36).contains(&base) => {
                let s = state.gc.string(sid).as_str().trim();
                let (neg, digits) = match s.strip_prefix('-') {
                    Some(r) => (true, r),
                    None => (false, s.strip_prefix('+').unwrap_or(s)),
                };
                match i64::from_str_radix(digits, base as u32) {
                    Ok(i) => LuaValue::Integer(if neg { -i } else { i }),
                    Err(_) => LuaValue::Nil,
                }
            }
            _ => LuaValue::Nil,
        };
        state.push(result);
        return Ok(1);
    }
    let result = state.tonumber(v).unwrap_or(LuaValue::Nil);
    state.push(result);
    Ok(1)
}

fn lua_pairs(state: &mut LuaState, nargs: usize) -> LuaResult<usize> {
    if nargs == 0 {
        return Err(state.raise_string("bad argument #1 to 'pairs' (table expected)"));
    }
    let t = state.reg(0);
    check_table(state, t, "pairs", 1)?;
    state.push(LuaValue::CFunction(lua_next));
    state.push(t);
    state.push(LuaValue::Nil);
    Ok(3)
}

fn lua_ipairs(state: &mut LuaState, nargs: usize) -> LuaResult<usize> {
    if nargs == 0 {
        return Err(state.raise_string("bad argument #1 to 'ipairs' (table expected)"));
    }
    let t = state.reg(0);
    check_table(state, t, "ipairs", 1)?;
    state.push(LuaValue::CFunction(ipairs_iter));
    state.push(t);
    state.push(LuaValue::Integer(0));
    Ok(3)
}

fn ipairs_iter(state: &mut LuaState, nargs: usize) -> LuaResult<usize> {
    let t = state.reg(0);
    let tid = check_table(state, t, "ipairs iterator", 1)?;
    let idx = if nargs > 1 { state.reg(1).as_integer().unwrap_or(0) } else { 0 };
    let next_idx = idx + 1;
    let v = state.raw_get(tid, LuaValue::Integer(next_idx));
    if v.is_nil() {
        state.push(LuaValue::Nil);
        Ok(1)
    } else {
        state.push(LuaValue::Integer(next_idx));
        state.push(v);
        Ok(2)
    }
}

fn lua_next(state: &mut LuaState, nargs: usize) -> LuaResult<usize> {
    let t = state.reg(0);
    let tid = check_table(state, t, "next", 1)?;
    let key = if nargs > 1 { state.reg(1) } else { LuaValue::Nil };
    match state.gc.table(tid).next(&key) {
        Some((k, v)) => {
            state.push(k);
            state.push(v);
            Ok(2)
        }
        None => {
            state.push(LuaValue::Nil);
            Ok(1)
        }
    }
}

fn lua_setmetatable(state: &mut LuaState, nargs: usize) -> LuaResult<usize> {
    if nargs < 2 {
        return Err(state.raise_string("bad argument #2 to 'setmetatable' (nil or table expected)"));
    }
    let t = state.reg(0);
    let tid = check_table(state, t, "setmetatable", 1)?;
    let mt = state.reg(1);
    if let Some(old_mt) = state.gc.table(tid).metatable {
        let protected_key = state.gc.intern_string("__metatable");
        if !state.gc.table(old_mt).get_str(protected_key).is_nil() {
            return Err(state.raise_string("cannot change a protected metatable"));
        }
    }
    let new_mt = match mt {
        LuaValue::Nil => None,
        LuaValue::Table(mid) => Some(mid),
        other => return Err(arg_error(state, 2, "setmetatable", "nil or table", other)),
    };
    state.set_metatable_of(t, new_mt);
    state.push(t);
    Ok(1)
}

fn lua_getmetatable(state: &mut LuaState, nargs: usize) -> LuaResult<usize> {
    if nargs == 0 {
        return Err(state.raise_string("bad argument #1 to 'getmetatable' (value expected)"));
    }
    let v = state.reg(0);
    match state.metatable_of(v) {
        None => state.push(LuaValue::Nil),
        Some(mt) => {
            let protected_key = state.gc.intern_string("__metatable");
            let protected = state.gc.table(mt).get_str(protected_key);
            if !protected.is_nil() {
                state.push(protected);
            } else {
                state.push(LuaValue::Table(mt));
            }
        }
    }
    Ok(1)
}

fn lua_rawget(state: &mut LuaState, nargs: usize) -> LuaResult<usize> {
    if nargs < 2 {
        return Err(state.raise_string("bad argument #2 to 'rawget' (value expected)"));
    }
    let t = state.reg(0);
    let tid = check_table(state, t, "rawget", 1)?;
    let k = state.reg(1);
    state.push(state.raw_get(tid, k));
    Ok(1)
}

fn lua_rawset(state: &mut LuaState, nargs: usize) -> LuaResult<usize> {
    if nargs < 3 {
        return Err(state.raise_string("bad argument #3 to 'rawset' (value expected)"));
    }
    let t = state.reg(0);
    let tid = check_table(state, t, "rawset", 1)?;
    let k = state.reg(1);
    let v = state.reg(2);
    state.raw_set(tid, k, v)?;
    state.push(t);
    Ok(1)
}

fn lua_rawequal(state: &mut LuaState, nargs: usize) -> LuaResult<usize> {
    let a = if nargs > 0 { state.reg(0) } else { LuaValue::Nil };
    let b = if nargs > 1 { state.reg(1) } else { LuaValue::Nil };
    state.push(LuaValue::Boolean(a.raw_equals(&b)));
    Ok(1)
}

fn lua_rawlen(state: &mut LuaState, nargs: usize) -> LuaResult<usize> {
    if nargs == 0 {
        return Err(state.raise_string("bad argument #1 to 'rawlen' (table or string expected)"));
    }
    let v = state.reg(0);
    let len = match v {
        LuaValue::Table(t) => state.gc.table(t).length(),
        LuaValue::String(s) => state.gc.string(s).len() as i64,
        other => return Err(arg_error(state, 1, "rawlen", "table or string", other)),
    };
    state.push(LuaValue::Integer(len));
    Ok(1)
}

/// Calls `f(args)` protected, reporting failure as `(false, err)` rather than
/// propagating the `LuaError` — the one place in this library that talks to
/// [`LuaState::unwind_to`] directly.
fn lua_pcall(state: &mut LuaState, nargs: usize) -> LuaResult<usize> {
    if nargs == 0 {
        return Err(state.raise_string("bad argument #1 to 'pcall' (value expected)"));
    }
    let base = state.current_ci().base;
    let f = state.reg(0);
    let args: Vec<LuaValue> = (1..nargs).map(|i| state.reg(i as u32)).collect();
    let call_depth = state.call_depth();
    state.set_top(base);
    for a in &args {
        state.push(*a);
    }
    match state.call_value(f, args.len(), -1) {
        Ok(n) => {
            let results: Vec<LuaValue> = (0..n).map(|i| state.get_stack(base + i)).collect();
            state.set_top(base);
            state.push(LuaValue::Boolean(true));
            for r in results {
                state.push(r);
            }
            Ok(1 + n)
        }
        Err(e) => {
            state.unwind_to(call_depth, base);
            let payload = e.payload(&mut state.gc);
            state.push(LuaValue::Boolean(false));
            state.push(payload);
            Ok(2)
        }
    }
}

/// Like [`lua_pcall`] but a caught error is first handed to `msgh`, whose
/// single result becomes the second return value. A handler that itself
/// raises escalates to [`LuaError::ErrorInErrorHandler`].
fn lua_xpcall(state: &mut LuaState, nargs: usize) -> LuaResult<usize> {
    if nargs < 2 {
        return Err(state.raise_string("bad argument #2 to 'xpcall' (value expected)"));
    }
    let base = state.current_ci().base;
    let f = state.reg(0);
    let handler = state.reg(1);
    let args: Vec<LuaValue> = (2..nargs).map(|i| state.reg(i as u32)).collect();
    let call_depth = state.call_depth();
    state.set_top(base);
    for a in &args {
        state.push(*a);
    }
    match state.call_value(f, args.len(), -1) {
        Ok(n) => {
            let results: Vec<LuaValue> = (0..n).map(|i| state.get_stack(base + i)).collect();
            state.set_top(base);
            state.push(LuaValue::Boolean(true));
            for r in results {
                state.push(r);
            }
            Ok(1 + n)
        }
        Err(e) => {
            state.unwind_to(call_depth, base);
            let payload = e.payload(&mut state.gc);
            let save = state.top();
            state.push(payload);
            let hresult = match state.call_value(handler, 1, 1) {
                Ok(_) => state.get_stack(save),
                Err(_) => return Err(LuaError::ErrorInErrorHandler),
            };
            state.set_top(save);
            state.push(LuaValue::Boolean(false));
            state.push(hresult);
            Ok(2)
        }
    }
}

fn lua_error(state: &mut LuaState, nargs: usize) -> LuaResult<usize> {
    let msg = if nargs > 0 { state.reg(0) } else { LuaValue::Nil };
    let level = if nargs > 1 { state.reg(1).as_integer().unwrap_or(1) } else { 1 };
    if let LuaValue::String(sid) = msg {
        if level != 0 {
            let text = state.gc.string(sid).as_str().to_string();
            return Err(state.raise_string(text));
        }
    }
    Err(state.raise_value(msg))
}

fn lua_assert(state: &mut LuaState, nargs: usize) -> LuaResult<usize> {
    let cond = if nargs > 0 { state.reg(0) } else { LuaValue::Nil };
    if cond.is_truthy() {
        return Ok(return_args(state, nargs));
    }
    if nargs > 1 {
        let msg = state.reg(1);
        if let LuaValue::String(sid) = msg {
            let text = state.gc.string(sid).as_str().to_string();
            return Err(state.raise_string(text));
        }
        return Err(state.raise_value(msg));
    }
    Err(state.raise_string("assertion failed!"))
}

fn lua_select(state: &mut LuaState, nargs: usize) -> LuaResult<usize> {
    if nargs == 0 {
        return Err(state.raise_string("bad argument #1 to 'select' (value expected)"));
    }
    let selector = state.reg(0);
    let vararg_count = nargs - 1;
    if let Some(sid) = selector.as_string() {
        if state.gc.string(sid).as_str() == "#" {
            state.push(LuaValue::Integer(vararg_count as i64));
            return Ok(1);
        }
    }
    let index = selector
        .as_integer()
        .ok_or_else(|| arg_error(state, 1, "select", "number", selector))?;
    if index == 0 {
        return Err(state.raise_string("bad argument #1 to 'select' (index out of range)"));
    }
    let start_idx = if index > 0 {
        (index - 1) as usize
    } else {
        let back = (-index) as usize;
        if back > vararg_count {
            return Err(state.raise_string("bad argument #1 to 'select' (index out of range)"));
        }
        vararg_count - back
    };
    if start_idx >= vararg_count {
        return Ok(0);
    }
    for i in start_idx..vararg_count {
        let v = state.reg((1 + i) as u32);
        state.push(v);
    }
    Ok(vararg_count - start_idx)
}

fn lua_unpack(state: &mut LuaState, nargs: usize) -> LuaResult<usize> {
    if nargs == 0 {
        return Err(state.raise_string("bad argument #1 to 'unpack' (table expected)"));
    }
    let t = state.reg(0);
    let tid = check_table(state, t, "unpack", 1)?;
    let i = if nargs > 1 { state.reg(1).as_integer().unwrap_or(1) } else { 1 };
    let j = if nargs > 2 {
        state.reg(2).as_integer().unwrap_or(0)
    } else {
        state.length_of(t)?.as_integer().unwrap_or(0)
    };
    if j < i {
        return Ok(0);
    }
    let n = (j - i + 1) as usize;
    for k in 0..n {
        let v = state.raw_get(tid, LuaValue::Integer(i + k as i64));
        state.push(v);
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::LuaValue;

    fn eval(src: &str) -> (LuaState, Vec<LuaValue>) {
        let mut state = LuaState::new();
        install(&mut state).unwrap();
        let values = crate::run(&mut state, src.as_bytes(), "test").unwrap();
        (state, values)
    }

    #[test]
    fn select_count() {
        let (_, values) = eval("return select('#', 1,2,3)");
        assert_eq!(values[0], LuaValue::Integer(3));
    }

    #[test]
    fn select_positive_index() {
        let (state, values) = eval("return select(2, 'a','b','c')");
        assert_eq!(values.len(), 2);
        let first = values[0].as_string().unwrap();
        let second = values[1].as_string().unwrap();
        assert_eq!(state.gc.string(first).as_str(), "b");
        assert_eq!(state.gc.string(second).as_str(), "c");
    }

    #[test]
    fn select_negative_index() {
        let (state, values) = eval("return select(-1, 'a','b','c')");
        assert_eq!(values.len(), 1);
        let s = values[0].as_string().unwrap();
        assert_eq!(state.gc.string(s).as_str(), "c");
    }

    #[test]
    fn unpack_default_range() {
        let (_, values) = eval("return unpack({10,20,30})");
        assert_eq!(values, vec![LuaValue::Integer(10), LuaValue::Integer(20), LuaValue::Integer(30)]);
    }

    #[test]
    fn unpack_explicit_range() {
        let (_, values) = eval("return unpack({10,20,30,40}, 2, 3)");
        assert_eq!(values, vec![LuaValue::Integer(20), LuaValue::Integer(30)]);
    }

    #[test]
    fn setmetatable_honors_protection() {
        let (_, values) = eval(
            "local t=setmetatable({}, {__metatable='locked'}); \
             local ok = pcall(setmetatable, t, {}); return ok",
        );
        assert_eq!(values[0], LuaValue::Boolean(false));
    }

    #[test]
    fn getmetatable_honors_override() {
        let (state, values) = eval("local t=setmetatable({}, {__metatable='locked'}); return getmetatable(t)");
        let s = values[0].as_string().unwrap();
        assert_eq!(state.gc.string(s).as_str(), "locked");
    }

    #[test]
    fn xpcall_escalates_handler_error() {
        let (_, values) = eval(
            "local ok = xpcall(function() error('boom') end, function() error('handler broke') end); return ok",
        );
        assert_eq!(values[0], LuaValue::Boolean(false));
    }

    #[test]
    fn assert_passes_through_extra_values() {
        let (_, values) = eval("return assert(1, 2, 3)");
        assert_eq!(values, vec![LuaValue::Integer(1), LuaValue::Integer(2), LuaValue::Integer(3)]);
    }

    #[test]
    fn assert_raises_with_message() {
        let (_, values) = eval("local ok, msg = pcall(assert, false, 'nope'); return ok, msg");
        assert_eq!(values[0], LuaValue::Boolean(false));
        let s = values[1].as_string().unwrap();
        assert_eq!(values.len(), 2);
        let _ = s;
    }
}
