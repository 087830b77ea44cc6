//! Instruction stream encoding tests
//!
//! Assembles small programs the way a compiler would and checks that the
//! cursor, disassembler and JSON dump agree with what was emitted.

use heron_bytecode::{
    Builtin, BytecodeError, CallType, Constant, Instruction, InstructionStreamIterator, NoTables,
    Op, Operand, Program, PutKind, Register,
};

fn acc() -> Operand {
    Operand::register(Register::ACCUMULATOR)
}

fn sample_program() -> Program {
    let mut builder = Program::builder("sample");
    builder.set_strict(true);
    let x = builder.identifier("x");
    let math = builder.identifier("Math");
    let abs = builder.identifier("abs");
    let callee_text = builder.string("Math.abs");
    let global_cache = builder.global_variable_cache();
    let property_cache = builder.property_lookup_cache();
    let minus_one = builder.constant(Constant::Int32(-1));
    let callee = builder.allocate_register();
    let object = builder.allocate_register();

    builder.emit(Op::GetGlobal {
        dst: object,
        identifier: math,
        cache: global_cache,
    });
    builder.emit(Op::GetById {
        dst: callee,
        base: object,
        property: abs,
        base_identifier: Some(math),
        cache: property_cache,
    });
    builder.emit(Op::CallBuiltin {
        dst: acc(),
        callee,
        this_value: object,
        builtin: Builtin::MathAbs,
        expression_string: Some(callee_text),
        arguments: vec![minus_one],
    });
    builder.emit(Op::PutById {
        base: object,
        property: x,
        src: acc(),
        kind: PutKind::KeyValue,
        cache: property_cache,
        base_identifier: None,
    });
    builder.emit(Op::End { value: acc() });
    builder.finish().unwrap()
}

#[test]
fn test_cursor_walks_every_instruction_boundary() {
    let program = sample_program();
    let mut cursor = InstructionStreamIterator::new(&program.bytecode);
    let mut opcodes = Vec::new();
    while !cursor.at_end() {
        let insn = cursor.current().unwrap();
        assert!(insn.strict);
        opcodes.push(insn.opcode().name());
        let next = cursor.offset() + insn.length();
        cursor.jump(next);
    }
    assert_eq!(
        opcodes,
        vec!["GetGlobal", "GetById", "CallBuiltin", "PutById", "End"]
    );
    assert_eq!(cursor.offset(), program.bytecode.len());
}

#[test]
fn test_disassembly_resolves_tables() {
    let program = sample_program();
    let listing = program.disassemble();
    assert!(listing.contains("GetGlobal dst:reg6, identifier:Math"));
    assert!(listing.contains("base_identifier:Math"));
    assert!(listing.contains("builtin:MathAbs"));
    assert!(listing.contains("expression_string:\"Math.abs\""));
    assert!(!listing.contains('<'));
}

#[test]
fn test_json_dump_lists_decoded_instructions() {
    let program = sample_program();
    let json = program.dump_json().unwrap();
    let decoded: Vec<(usize, Instruction)> = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded.len(), 5);
    assert_eq!(decoded[0].0, 0);
}

#[test]
fn test_program_serializes_through_serde() {
    let program = sample_program();
    let json = serde_json::to_string(&program).unwrap();
    let restored: Program = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.bytecode, program.bytecode);
    assert_eq!(restored.identifiers, program.identifiers);
}

#[test]
fn test_byte_enum_fields_decode_render_and_reject_unknown_bytes() {
    let insn = Instruction::new(Op::CallWithArgumentArray {
        dst: acc(),
        callee: Operand::register(Register(7)),
        this_value: Operand::register(Register(8)),
        arguments: Operand::register(Register(9)),
        call_type: CallType::Construct,
        expression_string: None,
    });
    let mut bytes = Vec::new();
    insn.encode(&mut bytes);
    assert_eq!(bytes.len(), insn.length());

    let decoded = Instruction::decode(&bytes, 0).unwrap();
    assert_eq!(decoded, insn);
    assert!(decoded.to_byte_string(&NoTables).contains("call_type:Construct"));

    // call_type sits just before the one-byte `None` of expression_string
    let call_type_at = bytes.len() - 2;
    assert_eq!(bytes[call_type_at], CallType::Construct as u8);
    bytes[call_type_at] = 0x7f;
    assert!(matches!(
        Instruction::decode(&bytes, 0),
        Err(BytecodeError::InvalidOperand { offset }) if offset == call_type_at
    ));
}
