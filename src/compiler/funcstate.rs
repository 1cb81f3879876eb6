//! Per-function compile-time state: the register allocator, local-variable
//! scope stack, loop/break bookkeeping and upvalue table for
//! one function body. [`crate::compiler::Compiler`] keeps a stack of these,
//! one per function currently being compiled (innermost last), so a nested
//! `function … end` pushes a new `FuncState` and pops it back into a
//! [`crate::value::Prototype`] on `end`.

use crate::value::{LocalVarInfo, Prototype, StringId, UpvalueDesc};
use std::rc::Rc;

#[derive(Debug, Clone)]
pub struct LocalVar {
    pub name: StringId,
    pub reg: u8,
    /// Set once some inner function captures this local as an upvalue;
    /// `OP_CLOSE A` is emitted when leaving a block that had upvalues
    /// captured.
    pub captured: bool,
}

/// A lexical block: `do…end`, loop bodies, `if` branches. Tracks the local
/// count to roll back to on exit and, for loops, the pending `break` jumps.
pub struct BlockCtx {
    pub first_local: usize,
    pub is_loop: bool,
    pub break_list: Option<usize>,
}

pub struct FuncState {
    pub code: Vec<u32>,
    pub line_info: Vec<u32>,
    pub constants: Vec<crate::value::LuaValue>,
    pub protos: Vec<Rc<Prototype>>,
    pub locals: Vec<LocalVar>,
    pub locals_debug: Vec<LocalVarInfo>,
    pub blocks: Vec<BlockCtx>,
    pub upvalues: Vec<UpvalueDesc>,
    pub free_reg: u8,
    pub max_stack_size: u8,
    pub num_params: u8,
    pub is_vararg: bool,
    pub source_name: StringId,
    pub line_defined: u32,
    pub current_line: u32,
}

impl FuncState {
    pub fn new(source_name: StringId, line_defined: u32) -> Self {
        FuncState {
            code: Vec::new(),
            line_info: Vec::new(),
            constants: Vec::new(),
            protos: Vec::new(),
            locals: Vec::new(),
            locals_debug: Vec::new(),
            blocks: Vec::new(),
            upvalues: Vec::new(),
            free_reg: 0,
            max_stack_size: 2,
            num_params: 0,
            is_vararg: false,
            source_name,
            line_defined,
            current_line: line_defined,
        }
    }

    pub fn find_local(&self, name: StringId) -> Option<u8> {
        self.locals.iter().rev().find(|l| l.name == name).map(|l| l.reg)
    }

    pub fn mark_captured(&mut self, reg: u8) {
        if let Some(l) = self.locals.iter_mut().rev().find(|l| l.reg == reg) {
            l.captured = true;
        }
    }

    pub fn find_upvalue(&self, name: StringId) -> Option<u32> {
        self.upvalues.iter().position(|u| u.name == name).map(|i| i as u32)
    }

    pub fn add_upvalue(&mut self, name: StringId, in_stack: bool, index: u32) -> u32 {
        if let Some(i) = self.find_upvalue(name) {
            return i;
        }
        self.upvalues.push(UpvalueDesc { in_stack, index, name });
        (self.upvalues.len() - 1) as u32
    }

    pub fn reserve_regs(&mut self, n: u8) -> u8 {
        let first = self.free_reg;
        self.free_reg += n;
        if self.free_reg as usize > self.max_stack_size as usize {
            self.max_stack_size = self.free_reg;
        }
        first
    }

    pub fn alloc_reg(&mut self) -> u8 {
        self.reserve_regs(1)
    }

    /// Releases every temporary register above `mark` back to the free
    /// pool; called after a subexpression's operands have been consumed.
    pub fn free_to(&mut self, mark: u8) {
        self.free_reg = mark;
    }

    pub fn declare_local(&mut self, name: StringId) -> u8 {
        let reg = self.alloc_reg();
        self.locals.push(LocalVar { name, reg, captured: false });
        reg
    }

    /// Registers `name` as occupying `reg`, an already-reserved register
    /// (e.g. one of a fixed-arity expression list's contiguous results),
    /// without allocating a new one. Used where the value is already sitting
    /// in the right place and declaring the local just needs to claim it.
    pub fn adopt_local(&mut self, name: StringId, reg: u8) {
        self.locals.push(LocalVar { name, reg, captured: false });
    }

    pub fn enter_block(&mut self, is_loop: bool) {
        self.blocks.push(BlockCtx {
            first_local: self.locals.len(),
            is_loop,
            break_list: None,
        });
    }

    /// Pops the innermost block, truncating locals declared inside it and
    /// reporting whether any of them were captured (so the caller can emit
    /// `OP_CLOSE`) plus the block's pending `break` jump list.
    pub fn leave_block(&mut self) -> (bool, Option<usize>, u8) {
        let block = self.blocks.pop().expect("unbalanced block scope");
        let captured = self.locals[block.first_local..].iter().any(|l| l.captured);
        let first_reg = self
            .locals
            .get(block.first_local)
            .map(|l| l.reg)
            .unwrap_or(self.free_reg);
        self.locals.truncate(block.first_local);
        (captured, block.break_list, first_reg)
    }

    pub fn innermost_loop_mut(&mut self) -> Option<&mut BlockCtx> {
        self.blocks.iter_mut().rev().find(|b| b.is_loop)
    }
}
