//! Bytecode interpreter
//!
//! Runs one program invocation from its entry vector to a terminal
//! instruction or the first failure.

use hxvm_bytecode::{Datetime, EntryVector, Instruction, JumpCondition, Program, Value, decode};

use crate::config::MachineConfig;
use crate::context::ExecContext;
use crate::error::{VmError, VmResult};
use crate::host::{Clock, WriteSink};
use crate::machine::{MachineState, Outcome, Trigger};
use crate::{datetime, ops};

/// The bytecode interpreter
#[derive(Debug, Clone, Copy, Default)]
pub struct Interpreter;

impl Interpreter {
    /// Run `program` once
    ///
    /// A trigger selects the packet entry vector, `None` the periodic one.
    /// `state` is only modified when the run ends in `RET_CHANGE`; writes
    /// already issued to `sink` are not undone when a later instruction fails.
    pub fn execute<S, C>(
        program: &Program,
        state: &mut MachineState,
        trigger: Option<&Trigger>,
        sink: &mut S,
        clock: &C,
        config: &MachineConfig,
    ) -> VmResult<Outcome>
    where
        S: WriteSink + ?Sized,
        C: Clock + ?Sized,
    {
        let vector = if trigger.is_some() {
            EntryVector::Packet
        } else {
            EntryVector::Periodic
        };

        let mut ctx = ExecContext::new(trigger, config.effective_stack_limit());
        let result = Self::enter(program, vector, &mut ctx, state)
            .and_then(|()| Self::run_loop(program, &mut ctx, state, sink, clock));
        let done = match result {
            Ok(done) => done,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    kind = err.kind().name(),
                    pc = ctx.pc(),
                    opcode = ctx.opcode().name(),
                    "program run failed"
                );
                return Err(err);
            }
        };

        let from = state.current_state;
        Ok(match done {
            InstructionResult::Change(to) => {
                state.enter(to, clock.now());
                tracing::info!(from, to, "state changed");
                Outcome::Changed { from, to }
            }
            _ => Outcome::Stayed { state: from },
        })
    }

    /// Check the header and move to the entry for `vector`
    fn enter(
        program: &Program,
        vector: EntryVector,
        ctx: &mut ExecContext<'_>,
        state: &MachineState,
    ) -> VmResult<()> {
        let entry = program.entry(vector)?;
        tracing::debug!(
            entry,
            trigger = vector.name(),
            state = state.current_state,
            "running program"
        );
        let entry = usize::from(entry);
        check_pc(program, entry)?;
        ctx.set_pc(entry);
        Ok(())
    }

    /// Main execution loop
    fn run_loop<S, C>(
        program: &Program,
        ctx: &mut ExecContext<'_>,
        state: &MachineState,
        sink: &mut S,
        clock: &C,
    ) -> VmResult<InstructionResult>
    where
        S: WriteSink + ?Sized,
        C: Clock + ?Sized,
    {
        let bytes = program.as_bytes();
        loop {
            let pc = ctx.pc();
            let (instruction, len) = decode(bytes, pc)?;
            ctx.begin(instruction.opcode());
            tracing::trace!(
                pc,
                instruction = %instruction,
                depth = ctx.stack().len(),
                "step"
            );

            let skip = match Self::execute_instruction(&instruction, ctx, state, sink, clock)? {
                InstructionResult::Continue => 0,
                InstructionResult::Skip(skip) => usize::from(skip),
                done => return Ok(done),
            };

            let next = pc.saturating_add(len).saturating_add(skip);
            check_pc(program, next)?;
            ctx.set_pc(next);
        }
    }

    /// Execute a single instruction
    fn execute_instruction<S, C>(
        instruction: &Instruction<'_>,
        ctx: &mut ExecContext<'_>,
        state: &MachineState,
        sink: &mut S,
        clock: &C,
    ) -> VmResult<InstructionResult>
    where
        S: WriteSink + ?Sized,
        C: Clock + ?Sized,
    {
        let opcode = instruction.opcode();
        match *instruction {
            // ==================== Execution context ====================
            Instruction::LdSourceIp => {
                let source = ctx.trigger()?.source;
                ctx.push(Value::Block16(source))?;
            }
            Instruction::LdSourceEid => {
                let eid = ctx.trigger()?.eid;
                ctx.push(Value::U32(eid))?;
            }
            Instruction::LdSourceVal => {
                let value = ctx.trigger()?.value;
                ctx.push(value)?;
            }
            Instruction::LdCurState => ctx.push(Value::U32(state.current_state))?,
            Instruction::LdCurStateTime => {
                ctx.push(Value::U32(state.dwell_time(clock.now())))?;
            }
            Instruction::LdSysTime => ctx.push(Value::Datetime(Datetime::from(clock.now())))?,

            // ==================== Immediates ====================
            Instruction::LdFalse
            | Instruction::LdTrue
            | Instruction::LdU8(_)
            | Instruction::LdU16(_)
            | Instruction::LdU32(_)
            | Instruction::LdFloat(_)
            | Instruction::LdDt { .. } => {
                if let Some(value) = instruction.immediate() {
                    ctx.push(value)?;
                }
            }

            // ==================== Registers ====================
            Instruction::LdReg(index) => {
                let value = ctx.register(index)?;
                ctx.push(value)?;
            }
            Instruction::StReg(index) => {
                let value = ctx.pop()?;
                ctx.set_register(index, value)?;
            }

            // ==================== Operators ====================
            Instruction::Arith(op) => {
                let [lhs, rhs] = ctx.pop_n()?;
                ctx.push(ops::arith(op, &lhs, &rhs)?)?;
            }
            Instruction::Bitwise(op) => {
                let [lhs, rhs] = ctx.pop_n()?;
                ctx.push(ops::bitwise(op, &lhs, &rhs)?)?;
            }
            Instruction::Not => {
                let value = ctx.pop()?;
                ctx.push(ops::not(&value)?)?;
            }
            Instruction::DtDiff => {
                let [lhs, rhs] = ctx.pop_n()?;
                ctx.push(ops::dt_diff(&lhs, &rhs)?)?;
            }
            Instruction::DtCompare { op, mask } => {
                let [lhs, rhs] = ctx.pop_n()?;
                ctx.push(ops::dt_compare(op, mask, &lhs, &rhs)?)?;
            }

            // ==================== Stack ====================
            Instruction::Dup => ctx.dup(0)?,
            Instruction::DupI(offset) => ctx.dup(offset)?,
            Instruction::Rot => ctx.rot(1)?,
            Instruction::RotI(offset) => ctx.rot(offset)?,
            Instruction::DtDecompose(mask) => {
                let value = ctx.pop()?;
                let Value::Datetime(dt) = value else {
                    return Err(VmError::type_mismatch(opcode, value.kind()));
                };
                for field in datetime::decompose(&dt, mask) {
                    ctx.push(Value::U32(field))?;
                }
            }
            Instruction::GetType => {
                let value = ctx.pop()?;
                ctx.push(Value::U8(value.kind().tag()))?;
            }
            Instruction::Pop => {
                ctx.pop()?;
            }

            // ==================== Branching ====================
            Instruction::Switch(table) => {
                let value = ctx.pop()?;
                let key = ops::integer(&value, opcode)?;
                return Ok(match table.lookup(key) {
                    Some(skip) => InstructionResult::Skip(skip),
                    None => InstructionResult::Continue,
                });
            }
            Instruction::Jump { cond, skip, .. } => {
                let taken = match cond {
                    JumpCondition::Always => true,
                    JumpCondition::Zero | JumpCondition::NonZero => {
                        let value = ctx.pop()?;
                        let zero = value
                            .is_zero()
                            .ok_or_else(|| VmError::type_mismatch(opcode, value.kind()))?;
                        zero == (cond == JumpCondition::Zero)
                    }
                };
                if taken {
                    return Ok(InstructionResult::Skip(skip));
                }
            }

            // ==================== Block predicates ====================
            Instruction::CmpBlock { first, last, data } => {
                let value = ctx.pop()?;
                ctx.push(ops::cmp_block(&value, first, last, data)?)?;
            }
            Instruction::CmpIpUndef => {
                let value = ctx.pop()?;
                ctx.push(ops::cmp_ip(&value, opcode, 0)?)?;
            }
            Instruction::CmpIpLo => {
                let value = ctx.pop()?;
                ctx.push(ops::cmp_ip(&value, opcode, 1)?)?;
            }

            Instruction::Convert(kind) => {
                let value = ctx.pop()?;
                ctx.push(ops::convert(&value, kind)?)?;
            }

            // ==================== Effects ====================
            Instruction::Write => {
                let [eid, value] = ctx.pop_n()?;
                let eid = ops::integer(&eid, opcode)?;
                let code = sink.write(eid, &value);
                tracing::debug!(eid, %value, code, "write");
                ctx.push(Value::U8(code))?;
            }
            Instruction::RetChange => {
                let value = ctx.pop()?;
                return Ok(InstructionResult::Change(ops::integer(&value, opcode)?));
            }
            Instruction::RetStay => return Ok(InstructionResult::Stay),
        }

        Ok(InstructionResult::Continue)
    }
}

/// Fails when `pc` lies past the end of the program
///
/// A counter equal to the length is let through; the next decode reports it.
fn check_pc(program: &Program, pc: usize) -> VmResult<()> {
    if pc > program.len() {
        return Err(VmError::PcOutOfRange {
            pc,
            len: program.len(),
        });
    }
    Ok(())
}

/// Result of executing an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstructionResult {
    /// Fall through to the next instruction
    Continue,
    /// Skip this many bytes past the next instruction
    Skip(u16),
    /// `RET_STAY`
    Stay,
    /// `RET_CHANGE` to the given state
    Change(u32),
}
