mod common;

use common::{class, method, signature};
use ember_asm::{
    Argument, AssembleOptions, Code, CodeBuilder, CodeError, Format, Module, Op, Reg, Target,
    TypeId,
};

/// `(x) -> x + 1` inside a guard; a dead op after the return and a jump to the next op give
/// the optimizer something to remove.
fn guarded_increment(module: &mut Module) -> CodeBuilder {
    let one = module.pool.int(1);
    let fallback = module.pool.int(-1);
    let mut builder = CodeBuilder::new(1);
    let handler = builder.new_label();
    let done = builder.new_label();
    let next = builder.new_label();

    builder.add(Op::Line { delta: 4 });
    let caught = builder.declare(TypeId::EXCEPTION);
    builder.add(Op::GuardStart {
        catch_type: TypeId::EXCEPTION,
        catch_reg: caught,
        handler: Target::Label(handler),
    });
    let sum = builder.declare(TypeId::INT);
    builder.add(Op::Add {
        a: Argument::Register(Reg(0)),
        b: Argument::Constant(one),
        dst: sum,
    });
    builder.add(Op::Jump {
        target: Target::Label(next),
    });
    builder.place(next).expect("place");
    builder.add(Op::GuardEnd {
        target: Target::Label(done),
    });
    builder.place(handler).expect("place");
    builder.add(Op::Line { delta: 1 });
    builder.add(Op::Return1 {
        value: Argument::Constant(fallback),
    });
    builder.add(Op::Move {
        src: Argument::Register(Reg(0)),
        dst: sum,
    });
    builder.place(done).expect("place");
    builder.add(Op::Return1 {
        value: Argument::Register(sum),
    });
    builder
}

fn assemble(builder: CodeBuilder) -> Result<ember_asm::AssembledCode, CodeError> {
    let mut code = Code::Building(builder);
    code.ensure_assembled("test", true, &AssembleOptions::default())
        .cloned()
}

#[test]
fn reassembling_disassembled_code_is_byte_identical() {
    common::init_tracing();
    let mut module = Module::new("test");
    let builder = guarded_increment(&mut module);
    let added = builder.len();
    let first = assemble(builder).expect("assemble");
    assert!(first.ops.len() < added);

    let ops = Code::disassemble(&first.bytes, &first.constants).expect("disassemble");
    let second = assemble(CodeBuilder::from_ops(ops, first.param_count)).expect("reassemble");
    assert_eq!(second.bytes, first.bytes);
    assert_eq!(second.constants, first.constants);
    assert_eq!(second.depths, first.depths);
    assert_eq!(second.max_vars, first.max_vars);
    // A second optimization pass over optimized code finds nothing to remove.
    assert_eq!(second.ops.len(), first.ops.len());
}

#[test]
fn empty_scope_brackets_leave_fewer_ops_than_added() {
    let mut module = Module::new("test");
    let owner = class(&mut module, "Owner", Format::Class);
    let id = method(&mut module, owner, signature("noop", &[], &[]), |code, _| {
        code.enter()?;
        code.add(Op::Line { delta: 1 })?;
        code.exit()?;
        code.add(Op::Return0)
    });
    let added = module.classes.method(id).code().op_count();
    let assembled = module
        .ensure_assembled(id, &AssembleOptions::default())
        .expect("assemble");
    assert_eq!(added, 3);
    assert_eq!(assembled.ops.len(), 1);
    assert_eq!(assembled.ops[0].op, Op::Return0);
    assert_eq!(assembled.ops[0].line_delta(), 1);
}

#[test]
fn unoptimized_assembly_keeps_the_scope_brackets() {
    let mut builder = CodeBuilder::new(0);
    builder.enter();
    builder.exit().expect("exit");
    builder.add(Op::Return0);
    let mut code = Code::Building(builder);
    let assembled = code
        .ensure_assembled("test", true, &AssembleOptions::unoptimized())
        .expect("assemble");
    assert_eq!(assembled.ops.len(), 3);
    assert_eq!(assembled.depths, vec![0, 1, 0]);
}

#[test]
fn assembled_methods_reject_further_appends() {
    let mut module = Module::new("test");
    let owner = class(&mut module, "Owner", Format::Class);
    let id = method(&mut module, owner, signature("noop", &[], &[]), |code, _| {
        code.add(Op::Return0)
    });
    module
        .ensure_assembled(id, &AssembleOptions::default())
        .expect("assemble");
    let code = module
        .classes
        .method_mut(id)
        .expect("method")
        .code_mut();
    assert_eq!(code.add(Op::Return0), Err(CodeError::NotAppendable));
}
