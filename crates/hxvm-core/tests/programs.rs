//! Whole-program tests
//!
//! Programs are assembled with `ProgramBuilder` and run through a `Machine`
//! with a manual clock and a sink that records every write.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use hxvm_bytecode::{
    ArithOp, Datetime, DtCompare, DtMask, Instruction, JumpCondition, Program, ProgramBuilder,
    SwitchWidth, Value, ValueKind,
};
use hxvm_core::{
    ErrorKind, Machine, MachineConfig, MachineState, ManualClock, Outcome, Trigger, VmError,
    WriteSink,
};

#[derive(Debug, Default)]
struct Recorder {
    writes: Vec<(u32, Value)>,
    code: u8,
}

impl WriteSink for Recorder {
    fn write(&mut self, eid: u32, value: &Value) -> u8 {
        self.writes.push((eid, *value));
        self.code
    }
}

fn origin() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2014, 5, 1)
        .and_then(|d| d.and_hms_opt(6, 0, 0))
        .unwrap()
}

fn machine(program: Program) -> Machine<Recorder, ManualClock> {
    Machine::new(program, Recorder::default(), ManualClock::new(origin())).unwrap()
}

fn trigger(value: Value) -> Trigger {
    let mut source = [0u8; 16];
    source[0] = 0xfe;
    source[1] = 0x80;
    source[15] = 0x2a;
    Trigger::new(source, 7, value)
}

fn jz(skip: u16) -> Instruction<'static> {
    Instruction::Jump {
        cond: JumpCondition::Zero,
        skip,
        short: true,
    }
}

/// `value > 10` moves to state 1; otherwise skips past the end
fn threshold_program(skip: u16) -> Program {
    ProgramBuilder::new()
        .instructions([
            Instruction::LdSourceVal,
            Instruction::LdU8(10),
            Instruction::Arith(ArithOp::Gt),
            jz(skip),
            Instruction::LdU32(1),
            Instruction::RetChange,
        ])
        .build()
        .unwrap()
}

// ============================================================================
// Threshold rule
// ============================================================================

#[test]
fn test_threshold_changes_state() {
    let mut m = machine(threshold_program(6));
    let outcome = m.run_packet(&trigger(Value::U32(15))).unwrap();
    assert_eq!(outcome, Outcome::Changed { from: 0, to: 1 });
    assert_eq!(m.state().current_state, 1);
}

#[test]
fn test_threshold_runs_off_the_end() {
    let mut m = machine(threshold_program(6));
    let err = m.run_packet(&trigger(Value::U32(5))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedProgram);
    assert!(matches!(err, VmError::Bytecode(_)));
    assert_eq!(m.state().current_state, 0);
}

#[test]
fn test_jump_past_the_end() {
    let mut m = machine(threshold_program(7));
    let err = m.run_packet(&trigger(Value::U8(0))).unwrap_err();
    assert!(matches!(err, VmError::PcOutOfRange { .. }));
    assert_eq!(err.kind(), ErrorKind::MalformedProgram);
}

// ============================================================================
// Writes
// ============================================================================

#[test]
fn test_write_with_float_eid_fails() {
    let program = ProgramBuilder::new()
        .instructions([
            Instruction::LdFloat(1.0),
            Instruction::LdU8(1),
            Instruction::Write,
            Instruction::RetStay,
        ])
        .build()
        .unwrap();
    let mut m = machine(program);
    let err = m.run_periodic().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
    assert!(m.sink().writes.is_empty());
}

#[test]
fn test_write_pushes_result_code() {
    let program = ProgramBuilder::new()
        .instructions([
            Instruction::LdU8(3),
            Instruction::LdTrue,
            Instruction::Write,
            Instruction::RetChange,
        ])
        .build()
        .unwrap();
    let mut m = machine(program);
    m.sink_mut().code = 5;
    assert_eq!(m.run_periodic().unwrap(), Outcome::Changed { from: 0, to: 5 });
    assert_eq!(m.sink().writes, vec![(3, Value::Bool(true))]);
}

#[test]
fn test_failure_keeps_issued_writes() {
    let program = ProgramBuilder::new()
        .instructions([
            Instruction::LdU8(1),
            Instruction::LdU8(2),
            Instruction::Write,
            Instruction::Pop,
            Instruction::Arith(ArithOp::Add),
            Instruction::RetStay,
        ])
        .build()
        .unwrap();
    let mut m = machine(program);
    let err = m.run_periodic().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Stack);
    assert_eq!(m.sink().writes, vec![(1, Value::U8(2))]);
}

// ============================================================================
// Entry vectors and context
// ============================================================================

#[test]
fn test_entry_vector_selection() {
    let program = ProgramBuilder::new()
        .packet_entry()
        .instructions([Instruction::LdU32(2), Instruction::RetChange])
        .periodic_entry()
        .instructions([Instruction::LdU32(3), Instruction::RetChange])
        .build()
        .unwrap();
    let mut m = machine(program);
    assert_eq!(m.run_periodic().unwrap().state(), 3);
    assert_eq!(m.run_packet(&trigger(Value::Bool(true))).unwrap().state(), 2);
}

#[test]
fn test_periodic_run_has_no_trigger() {
    let program = ProgramBuilder::new()
        .instructions([Instruction::LdSourceEid, Instruction::RetChange])
        .build()
        .unwrap();
    let mut m = machine(program);
    let err = m.run_periodic().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Context);
    assert_eq!(m.run_packet(&trigger(Value::U8(0))).unwrap().state(), 7);
}

#[test]
fn test_loopback_source() {
    let program = ProgramBuilder::new()
        .instructions([
            Instruction::LdSourceIp,
            Instruction::CmpIpLo,
            Instruction::RetChange,
        ])
        .build()
        .unwrap();
    let mut m = machine(program);
    let mut loopback = trigger(Value::U8(0));
    loopback.source = [0; 16];
    loopback.source[15] = 1;
    assert_eq!(m.run_packet(&loopback).unwrap().state(), 1);
    assert_eq!(m.run_packet(&trigger(Value::U8(0))).unwrap().state(), 0);
}

#[test]
fn test_unspecified_source() {
    let program = ProgramBuilder::new()
        .instructions([
            Instruction::LdSourceIp,
            Instruction::CmpIpUndef,
            Instruction::RetChange,
        ])
        .build()
        .unwrap();
    let mut m = machine(program);
    let mut unspecified = trigger(Value::U8(0));
    unspecified.source = [0; 16];
    assert_eq!(m.run_packet(&unspecified).unwrap().state(), 1);
    assert_eq!(m.run_packet(&trigger(Value::U8(0))).unwrap().state(), 0);

    let not_a_block = ProgramBuilder::new()
        .instructions([
            Instruction::LdSourceEid,
            Instruction::CmpIpUndef,
            Instruction::RetChange,
        ])
        .build()
        .unwrap();
    let err = machine(not_a_block)
        .run_packet(&trigger(Value::U8(0)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
}

#[test]
fn test_source_prefix_match() {
    let program = ProgramBuilder::new()
        .instruction(Instruction::LdSourceIp)
        .cmp_block(0, &[0xfe, 0x80])
        .instruction(Instruction::RetChange)
        .build()
        .unwrap();
    let mut m = machine(program);
    assert_eq!(m.run_packet(&trigger(Value::U8(0))).unwrap().state(), 1);
}

// ============================================================================
// Time
// ============================================================================

#[test]
fn test_dwell_time() {
    // leave for state 1 after a minute, then stay
    let program = ProgramBuilder::new()
        .instructions([
            Instruction::LdCurStateTime,
            Instruction::LdU32(60),
            Instruction::Arith(ArithOp::Ge),
            jz(6),
            Instruction::LdU32(1),
            Instruction::RetChange,
            Instruction::RetStay,
        ])
        .build()
        .unwrap();
    let mut m = machine(program);

    m.clock().advance(Duration::seconds(30));
    assert_eq!(m.run_periodic().unwrap(), Outcome::Stayed { state: 0 });

    m.clock().advance(Duration::seconds(40));
    assert_eq!(m.run_periodic().unwrap(), Outcome::Changed { from: 0, to: 1 });
    assert_eq!(m.state().state_entered_at, 70);

    m.clock().advance(Duration::seconds(5));
    assert_eq!(m.run_periodic().unwrap(), Outcome::Stayed { state: 1 });
}

#[test]
fn test_time_of_day_rule() {
    let seven = Datetime {
        hour: 7,
        ..Datetime::default()
    };
    let program = ProgramBuilder::new()
        .instructions([
            Instruction::LdSysTime,
            Instruction::LdDt {
                mask: DtMask::HOUR,
                value: seven,
            },
            Instruction::DtCompare {
                op: DtCompare::Ge,
                mask: DtMask::HOUR,
            },
            jz(6),
            Instruction::LdU32(1),
            Instruction::RetChange,
            Instruction::RetStay,
        ])
        .build()
        .unwrap();
    let mut m = machine(program);
    assert_eq!(m.run_periodic().unwrap().state(), 0);
    m.clock().advance(Duration::minutes(90));
    assert_eq!(m.run_periodic().unwrap().state(), 1);
}

#[test]
fn test_before_time_of_day() {
    let seven = Datetime {
        hour: 7,
        ..Datetime::default()
    };
    let program = ProgramBuilder::new()
        .instructions([
            Instruction::LdSysTime,
            Instruction::LdDt {
                mask: DtMask::HOUR,
                value: seven,
            },
            Instruction::DtCompare {
                op: DtCompare::Lt,
                mask: DtMask::HOUR,
            },
            Instruction::RetChange,
        ])
        .build()
        .unwrap();
    let mut m = machine(program);
    assert_eq!(m.run_periodic().unwrap(), Outcome::Changed { from: 0, to: 1 });
    m.clock().advance(Duration::minutes(90));
    assert_eq!(m.run_periodic().unwrap(), Outcome::Changed { from: 1, to: 0 });
}

#[test]
fn test_restored_state_keeps_dwell_time() {
    let program = ProgramBuilder::new()
        .instructions([
            Instruction::LdCurStateTime,
            Instruction::LdU32(60),
            Instruction::Arith(ArithOp::Ge),
            jz(6),
            Instruction::LdU32(1),
            Instruction::RetChange,
            Instruction::RetStay,
        ])
        .build()
        .unwrap();

    let mut first = machine(program.clone());
    assert_eq!(first.run_periodic().unwrap(), Outcome::Stayed { state: 0 });
    let json = serde_json::to_string(first.state()).unwrap();

    // a second host starts 40s later and picks up the persisted state
    let clock = ManualClock::new(origin() + Duration::seconds(40));
    let mut second = Machine::new(program, Recorder::default(), clock).unwrap();
    let saved: MachineState = serde_json::from_str(&json).unwrap();
    second.restore(saved);
    assert_eq!(second.state(), &saved);

    second.clock().advance(Duration::seconds(25));
    assert_eq!(second.run_periodic().unwrap(), Outcome::Changed { from: 0, to: 1 });
    assert_eq!(second.state().state_entered_at, 65);
}

#[test]
fn test_datetime_diff_and_decompose() {
    let later = Datetime::from_calendar(2014, 3, 2, 0, 0, 10).unwrap();
    let earlier = Datetime::from_calendar(2014, 3, 1, 0, 0, 0).unwrap();
    let diff = ProgramBuilder::new()
        .instructions([
            Instruction::LdDt {
                mask: DtMask::ALL,
                value: later,
            },
            Instruction::LdDt {
                mask: DtMask::ALL,
                value: earlier,
            },
            Instruction::DtDiff,
            Instruction::RetChange,
        ])
        .build()
        .unwrap();
    assert_eq!(machine(diff).run_periodic().unwrap().state(), 86_410);

    let month = ProgramBuilder::new()
        .instructions([
            Instruction::LdDt {
                mask: DtMask::ALL,
                value: later,
            },
            Instruction::DtDecompose(DtMask::MONTH),
            Instruction::RetChange,
        ])
        .build()
        .unwrap();
    assert_eq!(machine(month).run_periodic().unwrap().state(), 3);
}

// ============================================================================
// Registers, switch and stack
// ============================================================================

#[test]
fn test_registers() {
    let program = ProgramBuilder::new()
        .instructions([
            Instruction::LdReg(4),
            Instruction::GetType,
            Instruction::StReg(1),
            Instruction::LdU8(9),
            Instruction::StReg(4),
            Instruction::LdReg(4),
            Instruction::LdReg(1),
            Instruction::Arith(ArithOp::Add),
            Instruction::RetChange,
        ])
        .build()
        .unwrap();
    assert_eq!(machine(program).run_periodic().unwrap().state(), 9);

    let bad = ProgramBuilder::new()
        .instructions([Instruction::LdReg(16), Instruction::RetStay])
        .build()
        .unwrap();
    assert_eq!(
        machine(bad).run_periodic().unwrap_err(),
        VmError::InvalidRegister(16)
    );
}

#[test]
fn test_undefined_register_in_arithmetic() {
    let program = ProgramBuilder::new()
        .instructions([
            Instruction::LdReg(0),
            Instruction::LdU8(1),
            Instruction::Arith(ArithOp::Add),
            Instruction::RetStay,
        ])
        .build()
        .unwrap();
    let err = machine(program).run_periodic().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
}

#[test]
fn test_switch_dispatch() {
    let program = ProgramBuilder::new()
        .instruction(Instruction::LdSourceVal)
        .switch(SwitchWidth::W8, &[(1, 6), (2, 12)])
        .instructions([
            Instruction::LdU32(10),
            Instruction::RetChange,
            Instruction::LdU32(11),
            Instruction::RetChange,
            Instruction::LdU32(12),
            Instruction::RetChange,
        ])
        .build()
        .unwrap();
    let mut m = machine(program);
    assert_eq!(m.run_packet(&trigger(Value::U8(1))).unwrap().state(), 11);
    assert_eq!(m.run_packet(&trigger(Value::U32(2))).unwrap().state(), 12);
    assert_eq!(m.run_packet(&trigger(Value::U8(3))).unwrap().state(), 10);
    let err = m.run_packet(&trigger(Value::Float(1.0))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
}

#[test]
fn test_stack_limit() {
    let program = ProgramBuilder::new()
        .instructions([
            Instruction::LdTrue,
            Instruction::LdTrue,
            Instruction::LdTrue,
            Instruction::RetStay,
        ])
        .build()
        .unwrap();
    let config = MachineConfig {
        stack_limit: 2,
        ..MachineConfig::default()
    };
    let mut m = Machine::with_config(
        program,
        Recorder::default(),
        ManualClock::new(origin()),
        config,
    )
    .unwrap();
    assert_eq!(
        m.run_periodic().unwrap_err(),
        VmError::StackOverflow { limit: 2 }
    );
}

#[test]
fn test_conversion_chain() {
    let program = ProgramBuilder::new()
        .instructions([
            Instruction::LdFloat(300.7),
            Instruction::Convert(ValueKind::U8),
            Instruction::RetChange,
        ])
        .build()
        .unwrap();
    assert_eq!(machine(program).run_periodic().unwrap().state(), 44);
}

#[test]
fn test_integer_division_by_zero() {
    let program = ProgramBuilder::new()
        .instructions([
            Instruction::LdU32(1),
            Instruction::LdFalse,
            Instruction::Arith(ArithOp::Mod),
            Instruction::RetStay,
        ])
        .build()
        .unwrap();
    let err = machine(program).run_periodic().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Arithmetic);
}

// ============================================================================
// Loading
// ============================================================================

#[test]
fn test_bad_version_rejected() {
    let program = Program::new([0x01, 0x00, 0x05, 0x00, 0x05, 0x3C]).unwrap();
    let err = Machine::new(
        program.clone(),
        Recorder::default(),
        ManualClock::new(origin()),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedProgram);

    let config = MachineConfig {
        validate_on_load: false,
        ..MachineConfig::default()
    };
    let mut m = Machine::with_config(
        program,
        Recorder::default(),
        ManualClock::new(origin()),
        config,
    )
    .unwrap();
    assert_eq!(m.run_periodic().unwrap_err().kind(), ErrorKind::MalformedProgram);
}

#[test]
fn test_replace_program_resets_state() {
    let mut m = machine(threshold_program(6));
    m.run_packet(&trigger(Value::U32(99))).unwrap();
    assert_eq!(m.state().current_state, 1);

    m.clock().advance(Duration::seconds(12));
    let stay = ProgramBuilder::new()
        .instruction(Instruction::RetStay)
        .build()
        .unwrap();
    m.replace_program(stay).unwrap();
    assert_eq!(m.state().current_state, 0);
    assert_eq!(m.state().state_entered_at, 12);

    let broken = Program::new([0x00, 0x00, 0x40, 0x00, 0x05, 0x3C]).unwrap();
    assert!(m.replace_program(broken).is_err());
    assert_eq!(m.run_periodic().unwrap(), Outcome::Stayed { state: 0 });
}
