//! Arithmetic and comparison operators, each falling back to the matching
//! metamethod when neither operand is a number or numeral string.
//!
//! Two numbers that are both integers stay integers (wrapping add/sub/mul,
//! floor-style `%`); anything else promotes both sides to `f64` first,
//! mirroring the tagged value model's int/float split.

use super::metamethods::Metamethod;
use super::state::type_name;
use super::LuaState;
use crate::value::LuaValue;
use crate::LuaResult;

#[derive(Debug, Clone, Copy)]
pub(super) enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl LuaState {
    pub(super) fn arith(&mut self, op: ArithOp, a: LuaValue, b: LuaValue) -> LuaResult<LuaValue> {
        if let (Some(na), Some(nb)) = (self.tonumber(a), self.tonumber(b)) {
            if let (ArithOp::Mod, LuaValue::Integer(_), LuaValue::Integer(0)) = (op, na, nb) {
                return Err(self.raise_string("attempt to perform 'n%%0'"));
            }
            return Ok(apply_arith(op, na, nb));
        }
        let event = match op {
            ArithOp::Add => Metamethod::Add,
            ArithOp::Sub => Metamethod::Sub,
            ArithOp::Mul => Metamethod::Mul,
            ArithOp::Div => Metamethod::Div,
            ArithOp::Mod => Metamethod::Mod,
            ArithOp::Pow => Metamethod::Pow,
        };
        let handler = self.get_binop_metamethod(a, b, event);
        if handler.is_callable() {
            return self.call_value_single(handler, &[a, b]);
        }
        let bad = if self.tonumber(a).is_none() { a } else { b };
        Err(self.raise_string(format!("attempt to perform arithmetic on a {} value", type_name(bad))))
    }

    pub(super) fn unary_minus(&mut self, a: LuaValue) -> LuaResult<LuaValue> {
        match self.tonumber(a) {
            Some(LuaValue::Integer(i)) => Ok(LuaValue::Integer(i.wrapping_neg())),
            Some(LuaValue::Number(n)) => Ok(LuaValue::Number(-n)),
            _ => {
                let handler = self.get_metamethod(a, Metamethod::Unm);
                if handler.is_callable() {
                    return self.call_value_single(handler, &[a, a]);
                }
                Err(self.raise_string(format!("attempt to perform arithmetic on a {} value", type_name(a))))
            }
        }
    }

    pub(super) fn lua_eq(&mut self, a: LuaValue, b: LuaValue) -> LuaResult<bool> {
        if a.raw_equals(&b) {
            return Ok(true);
        }
        let both_tables = matches!((a, b), (LuaValue::Table(_), LuaValue::Table(_)));
        let both_userdata = matches!((a, b), (LuaValue::Userdata(_), LuaValue::Userdata(_)));
        if both_tables || both_userdata {
            let handler = self.get_comparison_metamethod(a, b, Metamethod::Eq);
            if handler.is_callable() {
                let r = self.call_value_single(handler, &[a, b])?;
                return Ok(r.is_truthy());
            }
        }
        Ok(false)
    }

    pub(super) fn lua_lt(&mut self, a: LuaValue, b: LuaValue) -> LuaResult<bool> {
        match (a, b) {
            (LuaValue::Integer(x), LuaValue::Integer(y)) => Ok(x < y),
            _ if a.is_number() && b.is_number() => Ok(a.as_float().unwrap() < b.as_float().unwrap()),
            (LuaValue::String(x), LuaValue::String(y)) => {
                Ok(self.gc.string(x).as_str() < self.gc.string(y).as_str())
            }
            _ if a.lua_type() != b.lua_type() => {
                Err(self.raise_string(format!("attempt to compare {} with {}", type_name(a), type_name(b))))
            }
            _ => {
                let handler = self.get_comparison_metamethod(a, b, Metamethod::Lt);
                if handler.is_callable() {
                    let r = self.call_value_single(handler, &[a, b])?;
                    return Ok(r.is_truthy());
                }
                Err(self.raise_string(format!("attempt to compare two {} values", type_name(a))))
            }
        }
    }

    pub(super) fn lua_le(&mut self, a: LuaValue, b: LuaValue) -> LuaResult<bool> {
        match (a, b) {
            (LuaValue::Integer(x), LuaValue::Integer(y)) => Ok(x <= y),
            _ if a.is_number() && b.is_number() => Ok(a.as_float().unwrap() <= b.as_float().unwrap()),
            (LuaValue::String(x), LuaValue::String(y)) => {
                Ok(self.gc.string(x).as_str() <= self.gc.string(y).as_str())
            }
            _ if a.lua_type() != b.lua_type() => {
                Err(self.raise_string(format!("attempt to compare {} with {}", type_name(a), type_name(b))))
            }
            _ => {
                let handler = self.get_comparison_metamethod(a, b, Metamethod::Le);
                if handler.is_callable() {
                    let r = self.call_value_single(handler, &[a, b])?;
                    return Ok(r.is_truthy());
                }
                Err(self.raise_string(format!("attempt to compare two {} values", type_name(a))))
            }
        }
    }
}

fn apply_arith(op: ArithOp, a: LuaValue, b: LuaValue) -> LuaValue {
    use ArithOp::*;
    match op {
        Add | Sub | Mul => {
            if let (LuaValue::Integer(x), LuaValue::Integer(y)) = (a, b) {
                let r = match op {
                    Add => x.wrapping_add(y),
                    Sub => x.wrapping_sub(y),
                    Mul => x.wrapping_mul(y),
                    _ => unreachable!(),
                };
                return LuaValue::Integer(r);
            }
            let (x, y) = (a.as_float().unwrap(), b.as_float().unwrap());
            LuaValue::Number(match op {
                Add => x + y,
                Sub => x - y,
                Mul => x * y,
                _ => unreachable!(),
            })
        }
        Div => LuaValue::Number(a.as_float().unwrap() / b.as_float().unwrap()),
        Mod => {
            if let (LuaValue::Integer(x), LuaValue::Integer(y)) = (a, b) {
                let r = x.wrapping_rem(y);
                let r = if r != 0 && (r < 0) != (y < 0) { r + y } else { r };
                return LuaValue::Integer(r);
            }
            let (x, y) = (a.as_float().unwrap(), b.as_float().unwrap());
            LuaValue::Number(x - (x / y).floor() * y)
        }
        Pow => LuaValue::Number(a.as_float().unwrap().powf(b.as_float().unwrap())),
    }
}
