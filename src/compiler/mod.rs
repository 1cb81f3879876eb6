//! The single-pass bytecode compiler: lexer-driven recursive descent
//! straight into a register-based [`crate::value::Prototype`], with
//! no intermediate AST. [`Compiler::compile`] is the only entry point.

mod expdesc;
mod funcstate;
mod parser;

pub use expdesc::{ExpDesc, ExpKind, RK};
pub use funcstate::FuncState;

use crate::error::LuaError;
use crate::gc::Gc;
use crate::lexer::{Lexer, Token, TokenKind};
use crate::opcode::{self, OpCode};
use crate::value::{LocalVarInfo, Prototype, StringId};
use crate::LuaResult;
use std::rc::Rc;

pub struct Compiler<'src, 'gc> {
    lexer: Lexer<'src>,
    gc: &'gc mut Gc,
    cur: Token,
    funcs: Vec<FuncState>,
}

impl<'src, 'gc> Compiler<'src, 'gc> {
    /// Compiles one chunk of source text into a top-level [`Prototype`].
    /// Holds no state between calls — every run starts from source text.
    pub fn compile(src: &'src [u8], chunk_name: &str, gc: &'gc mut Gc) -> LuaResult<Prototype> {
        crate::lexer::fix_reserved_strings(gc);
        let mut lexer = Lexer::new(src, chunk_name);
        let first = lexer.next(gc)?;
        let source_name = gc.intern_string(chunk_name);
        let mut compiler = Compiler {
            lexer,
            gc,
            cur: first,
            funcs: vec![FuncState::new(source_name, 0)],
        };
        compiler.funcs.last_mut().unwrap().is_vararg = true;
        compiler.parse_block()?;
        compiler.expect(TokenKind::Eof)?;
        compiler.emit_abc(OpCode::Return, 0, 1, 0);
        let fs = compiler.funcs.pop().expect("top-level function state");
        Ok(compiler.finish_prototype(fs))
    }

    fn finish_prototype(&self, fs: FuncState) -> Prototype {
        Prototype {
            code: fs.code,
            constants: fs.constants,
            protos: fs.protos,
            line_info: fs.line_info,
            locals: fs.locals_debug,
            upvalues: fs.upvalues,
            source_name: fs.source_name,
            line_defined: fs.line_defined,
            last_line_defined: fs.current_line,
            num_params: fs.num_params,
            is_vararg: fs.is_vararg,
            max_stack_size: fs.max_stack_size.max(2),
        }
    }

    // ---- token stream ----

    fn advance(&mut self) -> LuaResult<Token> {
        let next = self.lexer.next(self.gc)?;
        self.funcs.last_mut().unwrap().current_line = next.line;
        Ok(std::mem::replace(&mut self.cur, next))
    }

    fn check(&self, k: &TokenKind) -> bool {
        &self.cur.kind == k
    }

    fn accept(&mut self, k: &TokenKind) -> LuaResult<bool> {
        if self.check(k) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, k: TokenKind) -> LuaResult<()> {
        if self.check(&k) {
            self.advance()?;
            Ok(())
        } else {
            Err(self.err(format!(
                "'{}' expected near '{}'",
                k.describe(),
                self.cur.kind.describe()
            )))
        }
    }

    fn expect_name(&mut self) -> LuaResult<StringId> {
        match self.cur.kind.clone() {
            TokenKind::Name(s) => {
                self.advance()?;
                Ok(s)
            }
            other => Err(self.err(format!("<name> expected near '{}'", other.describe()))),
        }
    }

    fn err(&self, message: impl std::fmt::Display) -> LuaError {
        LuaError::syntax(self.lexer.source_name(), self.cur.line, message)
    }

    // ---- emission ----

    fn emit_abc(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> usize {
        let fs = self.funcs.last_mut().unwrap();
        fs.code.push(opcode::encode_abc(op, a, b, c));
        fs.line_info.push(fs.current_line);
        fs.code.len() - 1
    }

    fn emit_abx(&mut self, op: OpCode, a: u32, bx: u32) -> usize {
        let fs = self.funcs.last_mut().unwrap();
        fs.code.push(opcode::encode_abx(op, a, bx));
        fs.line_info.push(fs.current_line);
        fs.code.len() - 1
    }

    fn emit_asbx(&mut self, op: OpCode, a: u32, sbx: i32) -> usize {
        let fs = self.funcs.last_mut().unwrap();
        fs.code.push(opcode::encode_asbx(op, a, sbx));
        fs.line_info.push(fs.current_line);
        fs.code.len() - 1
    }

    /// Emits a placeholder forward jump (`sBx == -1` is the list terminator
    /// / not-yet-patched sentinel).
    fn emit_jump(&mut self) -> usize {
        self.emit_asbx(OpCode::Jmp, 0, -1)
    }

    fn here(&self) -> usize {
        self.funcs.last().unwrap().code.len()
    }

    fn declare_local(&mut self, name: StringId) -> u8 {
        let line = self.funcs.last().unwrap().current_line;
        let reg = self.funcs.last_mut().unwrap().declare_local(name);
        self.funcs.last_mut().unwrap().locals_debug.push(LocalVarInfo {
            name,
            start_pc: self.here() as u32,
            end_pc: 0,
        });
        let _ = line;
        reg
    }

    /// Like [`Self::declare_local`], but for a name whose register is
    /// already reserved (e.g. a fixed-arity expression list's contiguous
    /// results) rather than one that still needs allocating.
    fn adopt_local(&mut self, name: StringId, reg: u8) {
        self.funcs.last_mut().unwrap().adopt_local(name, reg);
        self.funcs.last_mut().unwrap().locals_debug.push(LocalVarInfo {
            name,
            start_pc: self.here() as u32,
            end_pc: 0,
        });
    }

    /// Leaves the innermost block, emitting `OP_CLOSE` if it captured any
    /// upvalues, and returns its pending `break` jump list.
    fn leave_block(&mut self) -> expdesc::JumpList {
        let (captured, break_list, first_reg) = self.funcs.last_mut().unwrap().leave_block();
        if captured {
            self.emit_abc(OpCode::Close, first_reg as u32, 0, 0);
        }
        break_list
    }

    fn push_child_proto(&mut self, proto: Prototype) -> u32 {
        let fs = self.funcs.last_mut().unwrap();
        fs.protos.push(Rc::new(proto));
        (fs.protos.len() - 1) as u32
    }

    /// Emits `CLOSURE A Bx` followed by one pseudo-instruction per upvalue
    /// the child prototype captures: `MOVE 0 B 0` when the upvalue comes
    /// from a local in this function's own stack frame, `GETUPVAL 0 B 0`
    /// when it is threaded through from one of this function's own
    /// upvalues. The VM's fetch loop consumes these in place of decoding
    /// them as ordinary instructions; the `A` field in each is unused.
    fn emit_closure(&mut self, reg: u8, idx: u32) {
        self.emit_abx(OpCode::Closure, reg as u32, idx);
        let upvalues = self.funcs.last().unwrap().protos[idx as usize].upvalues.clone();
        for desc in &upvalues {
            if desc.in_stack {
                self.emit_abc(OpCode::Move, 0, desc.index, 0);
            } else {
                self.emit_abc(OpCode::GetUpval, 0, desc.index, 0);
            }
        }
    }
}
