//! Bounded operand stack

use hxvm_bytecode::Value;

use crate::STACK_CAPACITY;

/// Why a stack operation was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackFault {
    /// No room for another value
    Overflow,
    /// Fewer than `needed` values present
    Underflow {
        /// Values the operation needed
        needed: usize,
    },
}

/// Fixed-capacity operand stack
///
/// Storage is inline; nothing allocates. Refused operations leave the stack
/// unchanged.
#[derive(Debug, Clone)]
pub struct OperandStack {
    slots: [Value; STACK_CAPACITY],
    depth: usize,
    limit: usize,
}

impl OperandStack {
    /// Create an empty stack holding at most `limit` values
    ///
    /// `limit` is capped at [`STACK_CAPACITY`].
    pub fn new(limit: usize) -> Self {
        Self {
            slots: [Value::Undefined; STACK_CAPACITY],
            depth: 0,
            limit: limit.min(STACK_CAPACITY),
        }
    }

    /// Number of values on the stack
    #[inline]
    pub fn len(&self) -> usize {
        self.depth
    }

    /// Whether the stack is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.depth == 0
    }

    /// Maximum depth
    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Values bottom to top
    pub fn as_slice(&self) -> &[Value] {
        &self.slots[..self.depth]
    }

    /// Push a value
    pub fn push(&mut self, value: Value) -> Result<(), StackFault> {
        if self.depth >= self.limit {
            return Err(StackFault::Overflow);
        }
        self.slots[self.depth] = value;
        self.depth += 1;
        Ok(())
    }

    /// Pop the top value
    pub fn pop(&mut self) -> Result<Value, StackFault> {
        let [value] = self.pop_n()?;
        Ok(value)
    }

    /// Pop `N` values, returned deepest first
    pub fn pop_n<const N: usize>(&mut self) -> Result<[Value; N], StackFault> {
        self.require(N)?;
        self.depth -= N;
        let mut out = [Value::Undefined; N];
        out.copy_from_slice(&self.slots[self.depth..self.depth + N]);
        Ok(out)
    }

    /// Value `depth` positions below the top
    pub fn peek(&self, depth: usize) -> Option<&Value> {
        self.depth
            .checked_sub(depth + 1)
            .map(|index| &self.slots[index])
    }

    /// Push a copy of the value `offset` positions below the top
    pub fn dup(&mut self, offset: u8) -> Result<(), StackFault> {
        let offset = usize::from(offset);
        self.require(offset + 1)?;
        let value = self.slots[self.depth - 1 - offset];
        self.push(value)
    }

    /// Rotate the top `offset + 1` values, moving the deepest of them to the top
    pub fn rot(&mut self, offset: u8) -> Result<(), StackFault> {
        let count = usize::from(offset) + 1;
        self.require(count)?;
        self.slots[self.depth - count..self.depth].rotate_left(1);
        Ok(())
    }

    fn require(&self, needed: usize) -> Result<(), StackFault> {
        if self.depth < needed {
            return Err(StackFault::Underflow { needed });
        }
        Ok(())
    }
}

impl Default for OperandStack {
    fn default() -> Self {
        Self::new(STACK_CAPACITY)
    }
}
