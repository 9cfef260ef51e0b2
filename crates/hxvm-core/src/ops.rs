//! Value operators
//!
//! Pure functions over [`Value`]s. Each takes its operands in program order
//! (`lhs` was pushed first) and reports failures against the opcode that
//! invoked it.

use hxvm_bytecode::value::{promote_arith, promote_int};
use hxvm_bytecode::{ArithOp, BitOp, Datetime, DtCompare, DtMask, Instruction, Opcode, Value, ValueKind};

use crate::datetime;
use crate::error::{VmError, VmResult};

/// Kind to blame when a pair of operands is rejected
fn culprit(lhs: &Value, rhs: &Value, accepts: fn(ValueKind) -> bool) -> ValueKind {
    if accepts(lhs.kind()) { rhs.kind() } else { lhs.kind() }
}

/// Integer payload of `value`, or a type error against `opcode`
pub fn integer(value: &Value, opcode: Opcode) -> VmResult<u32> {
    value
        .as_u32()
        .ok_or_else(|| VmError::type_mismatch(opcode, value.kind()))
}

/// Promoting arithmetic and comparison
///
/// Integer results wrap at 32 bits and are then narrowed to the common
/// kind. Float modulo yields zero.
pub fn arith(op: ArithOp, lhs: &Value, rhs: &Value) -> VmResult<Value> {
    let opcode = Instruction::Arith(op).opcode();
    let kind = promote_arith(lhs.kind(), rhs.kind()).ok_or_else(|| {
        VmError::type_mismatch(opcode, culprit(lhs, rhs, ValueKind::is_arithmetic))
    })?;

    if kind == ValueKind::Float {
        let (Some(a), Some(b)) = (lhs.as_f32(), rhs.as_f32()) else {
            return Err(VmError::type_mismatch(opcode, kind));
        };
        return Ok(match op {
            ArithOp::Mul => Value::Float(a * b),
            ArithOp::Div => Value::Float(a / b),
            ArithOp::Mod => Value::Float(0.0),
            ArithOp::Add => Value::Float(a + b),
            ArithOp::Sub => Value::Float(a - b),
            ArithOp::Lt => Value::Bool(a < b),
            ArithOp::Le => Value::Bool(a <= b),
            ArithOp::Gt => Value::Bool(a > b),
            ArithOp::Ge => Value::Bool(a >= b),
            ArithOp::Eq => Value::Bool(a == b),
            ArithOp::Neq => Value::Bool(a != b),
        });
    }

    let a = integer(lhs, opcode)?;
    let b = integer(rhs, opcode)?;
    let raw = match op {
        ArithOp::Mul => a.wrapping_mul(b),
        ArithOp::Div => a.checked_div(b).ok_or(VmError::DivisionByZero(opcode))?,
        ArithOp::Mod => a.checked_rem(b).ok_or(VmError::DivisionByZero(opcode))?,
        ArithOp::Add => a.wrapping_add(b),
        ArithOp::Sub => a.wrapping_sub(b),
        ArithOp::Lt => return Ok(Value::Bool(a < b)),
        ArithOp::Le => return Ok(Value::Bool(a <= b)),
        ArithOp::Gt => return Ok(Value::Bool(a > b)),
        ArithOp::Ge => return Ok(Value::Bool(a >= b)),
        ArithOp::Eq => return Ok(Value::Bool(a == b)),
        ArithOp::Neq => return Ok(Value::Bool(a != b)),
    };
    Value::from_u32(kind, raw).ok_or_else(|| VmError::type_mismatch(opcode, kind))
}

/// Integer bit operations; shifts of 32 or more give zero
pub fn bitwise(op: BitOp, lhs: &Value, rhs: &Value) -> VmResult<Value> {
    let opcode = Instruction::Bitwise(op).opcode();
    let kind = promote_int(lhs.kind(), rhs.kind()).ok_or_else(|| {
        VmError::type_mismatch(opcode, culprit(lhs, rhs, ValueKind::is_integer))
    })?;
    let a = integer(lhs, opcode)?;
    let b = integer(rhs, opcode)?;
    let raw = match op {
        BitOp::And => a & b,
        BitOp::Or => a | b,
        BitOp::Xor => a ^ b,
        BitOp::Shl => a.checked_shl(b).unwrap_or(0),
        BitOp::Shr => a.checked_shr(b).unwrap_or(0),
    };
    Value::from_u32(kind, raw).ok_or_else(|| VmError::type_mismatch(opcode, kind))
}

/// Bitwise complement within the operand's width
pub fn not(value: &Value) -> VmResult<Value> {
    match *value {
        Value::Bool(b) => Ok(Value::Bool(!b)),
        Value::U8(v) => Ok(Value::U8(!v)),
        Value::U32(v) => Ok(Value::U32(!v)),
        _ => Err(VmError::type_mismatch(Opcode::Not, value.kind())),
    }
}

/// Both operands as datetimes
fn datetimes(opcode: Opcode, lhs: &Value, rhs: &Value) -> VmResult<(Datetime, Datetime)> {
    match (lhs, rhs) {
        (Value::Datetime(a), Value::Datetime(b)) => Ok((*a, *b)),
        _ => Err(VmError::type_mismatch(
            opcode,
            culprit(lhs, rhs, |k| k == ValueKind::Datetime),
        )),
    }
}

/// `DT_DIFF`: seconds from `rhs` to `lhs` as U32
pub fn dt_diff(lhs: &Value, rhs: &Value) -> VmResult<Value> {
    let (a, b) = datetimes(Opcode::DtDiff, lhs, rhs)?;
    Ok(Value::U32(datetime::diff(&a, &b)))
}

/// `CMP_DT_LT` / `CMP_DT_GE`
pub fn dt_compare(op: DtCompare, mask: DtMask, lhs: &Value, rhs: &Value) -> VmResult<Value> {
    let opcode = Instruction::DtCompare { op, mask }.opcode();
    let (a, b) = datetimes(opcode, lhs, rhs)?;
    Ok(Value::Bool(match op {
        DtCompare::Ge => datetime::masked_ge(&a, &b, mask),
        DtCompare::Lt => datetime::masked_lt(&a, &b, mask),
    }))
}

/// Explicit conversion to `target`
pub fn convert(value: &Value, target: ValueKind) -> VmResult<Value> {
    value
        .convert(target)
        .ok_or_else(|| VmError::type_mismatch(Instruction::Convert(target).opcode(), value.kind()))
}

fn block<'v>(value: &'v Value, opcode: Opcode) -> VmResult<&'v [u8; 16]> {
    match value {
        Value::Block16(bytes) => Ok(bytes),
        _ => Err(VmError::type_mismatch(opcode, value.kind())),
    }
}

/// `CMP_BLOCK`: bytes `first..=last` of the block equal `data`
pub fn cmp_block(value: &Value, first: u8, last: u8, data: &[u8]) -> VmResult<Value> {
    let bytes = block(value, Opcode::CmpBlock)?;
    let range = usize::from(first)..=usize::from(last);
    Ok(Value::Bool(bytes.get(range) == Some(data)))
}

/// `CMP_IP_UNDEF` / `CMP_IP_LO`: leading 15 bytes zero, last byte `last`
pub fn cmp_ip(value: &Value, opcode: Opcode, last: u8) -> VmResult<Value> {
    let bytes = block(value, opcode)?;
    Ok(Value::Bool(
        bytes[..15].iter().all(|&b| b == 0) && bytes[15] == last,
    ))
}
