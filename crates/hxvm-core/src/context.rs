//! Per-run execution context

use hxvm_bytecode::{Opcode, Value};

use crate::REGISTER_COUNT;
use crate::error::{VmError, VmResult};
use crate::machine::Trigger;
use crate::stack::{OperandStack, StackFault};

/// Scratch state of a single run
///
/// Built fresh for every invocation: empty stack, every register
/// `Undefined`. Errors raised through the context name the instruction set
/// with [`ExecContext::begin`].
#[derive(Debug, Clone)]
pub struct ExecContext<'t> {
    stack: OperandStack,
    registers: [Value; REGISTER_COUNT],
    trigger: Option<&'t Trigger>,
    pc: usize,
    opcode: Opcode,
}

impl<'t> ExecContext<'t> {
    /// Create a context; the run starts once [`ExecContext::set_pc`] moves
    /// it to an entry vector
    pub fn new(trigger: Option<&'t Trigger>, stack_limit: usize) -> Self {
        Self {
            stack: OperandStack::new(stack_limit),
            registers: [Value::Undefined; REGISTER_COUNT],
            trigger,
            pc: 0,
            opcode: Opcode::RetStay,
        }
    }

    /// Offset of the instruction being executed
    #[inline]
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Move to `pc`
    #[inline]
    pub fn set_pc(&mut self, pc: usize) {
        self.pc = pc;
    }

    /// Record the instruction about to run, for diagnostics
    #[inline]
    pub fn begin(&mut self, opcode: Opcode) {
        self.opcode = opcode;
    }

    /// Instruction currently running
    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// The operand stack
    #[inline]
    pub fn stack(&self) -> &OperandStack {
        &self.stack
    }

    /// The trigger, when the run has one
    pub fn trigger(&self) -> VmResult<&'t Trigger> {
        self.trigger.ok_or(VmError::MissingTrigger(self.opcode))
    }

    // ==================== Stack ====================

    /// Push a value
    pub fn push(&mut self, value: Value) -> VmResult<()> {
        self.stack.push(value).map_err(|f| self.fault(f))
    }

    /// Pop one value
    pub fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop().map_err(|f| self.fault(f))
    }

    /// Pop `N` values, deepest first
    pub fn pop_n<const N: usize>(&mut self) -> VmResult<[Value; N]> {
        self.stack.pop_n().map_err(|f| self.fault(f))
    }

    /// `DUP` / `DUP_I`
    pub fn dup(&mut self, offset: u8) -> VmResult<()> {
        self.stack.dup(offset).map_err(|f| self.fault(f))
    }

    /// `ROT` / `ROT_I`
    pub fn rot(&mut self, offset: u8) -> VmResult<()> {
        self.stack.rot(offset).map_err(|f| self.fault(f))
    }

    fn fault(&self, fault: StackFault) -> VmError {
        match fault {
            StackFault::Overflow => VmError::StackOverflow {
                limit: self.stack.limit(),
            },
            StackFault::Underflow { needed } => {
                VmError::underflow(self.opcode, needed, self.stack.len())
            }
        }
    }

    // ==================== Registers ====================

    /// Copy of register `index`
    pub fn register(&self, index: u8) -> VmResult<Value> {
        self.registers
            .get(usize::from(index))
            .copied()
            .ok_or(VmError::InvalidRegister(index))
    }

    /// Overwrite register `index`
    pub fn set_register(&mut self, index: u8, value: Value) -> VmResult<()> {
        let slot = self
            .registers
            .get_mut(usize::from(index))
            .ok_or(VmError::InvalidRegister(index))?;
        *slot = value;
        Ok(())
    }
}
