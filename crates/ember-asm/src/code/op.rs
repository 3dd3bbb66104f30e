use smallvec::SmallVec;

use crate::param::{Argument, Reg};
use crate::pool::{ConstId, TypeId};
use crate::{ClassId, MethodId};

/// A forward-referencable position in a method body, bound by `place`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    Label(Label),
    /// Relative to the op carrying it.
    Offset(i32),
}

/// Zero-cost annotation chained onto the op that follows it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Prefix {
    /// Source line advance.
    Line(u32),
    /// An op that assembly proved redundant.
    Elided,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    // Prefix ops: never stored, they chain onto the next real op.
    Nop,
    Line { delta: u32 },

    Enter,
    Exit,
    Var { ty: TypeId, dst: Reg },
    VarI { ty: TypeId, dst: Reg, value: Argument },
    Move { src: Argument, dst: Reg },

    Add { a: Argument, b: Argument, dst: Reg },
    Sub { a: Argument, b: Argument, dst: Reg },
    Mul { a: Argument, b: Argument, dst: Reg },
    Div { a: Argument, b: Argument, dst: Reg },
    Mod { a: Argument, b: Argument, dst: Reg },
    IsEq { a: Argument, b: Argument, dst: Reg },
    IsLt { a: Argument, b: Argument, dst: Reg },
    Not { value: Argument, dst: Reg },

    Jump { target: Target },
    JumpTrue { cond: Argument, target: Target },
    JumpFalse { cond: Argument, target: Target },
    /// Jumps to `targets[value]`, or `default` when out of range.
    JumpInt { value: Argument, targets: Vec<Target>, default: Target },
    /// Opens a guarded region; a matching exception lands in `catch_reg` at `handler`.
    GuardStart { catch_type: TypeId, catch_reg: Reg, handler: Target },
    /// Closes the innermost guarded region and continues at `target`.
    GuardEnd { target: Target },
    Throw { value: Argument },

    Return0,
    Return1 { value: Argument },
    ReturnN { values: Vec<Argument> },

    Call { method: MethodId, args: Vec<Argument>, dsts: Vec<Reg> },
    CallSuper { args: Vec<Argument>, dsts: Vec<Reg> },
    /// Virtual call by name and arity on `target`'s runtime class.
    Invoke { target: Argument, name: ConstId, args: Vec<Argument>, dsts: Vec<Reg> },
    New { class: ClassId, args: Vec<Argument>, dst: Reg },
    PGet { target: Argument, property: ConstId, dst: Reg },
    PSet { target: Argument, property: ConstId, value: Argument },
    Assert { cond: Argument, message: ConstId },
}

impl Op {
    pub fn is_prefix(&self) -> bool {
        matches!(self, Op::Nop | Op::Line { .. })
    }

    /// Whether control can fall through to the next op.
    pub fn advances(&self) -> bool {
        !matches!(
            self,
            Op::Jump { .. }
                | Op::JumpInt { .. }
                | Op::GuardEnd { .. }
                | Op::Throw { .. }
                | Op::Return0
                | Op::Return1 { .. }
                | Op::ReturnN { .. }
        )
    }

    /// Every statically known branch destination. The fall-through successor is not listed;
    /// it is described by [`Op::advances`].
    pub fn branch_targets(&self) -> SmallVec<[Target; 2]> {
        match self {
            Op::Jump { target }
            | Op::JumpTrue { target, .. }
            | Op::JumpFalse { target, .. }
            | Op::GuardEnd { target } => smallvec::smallvec![*target],
            Op::GuardStart { handler, .. } => smallvec::smallvec![*handler],
            Op::JumpInt {
                targets, default, ..
            } => {
                let mut all: SmallVec<[Target; 2]> = targets.iter().copied().collect();
                all.push(*default);
                all
            }
            _ => SmallVec::new(),
        }
    }

    pub(crate) fn branch_targets_mut(&mut self) -> SmallVec<[&mut Target; 2]> {
        match self {
            Op::Jump { target }
            | Op::JumpTrue { target, .. }
            | Op::JumpFalse { target, .. }
            | Op::GuardEnd { target } => smallvec::smallvec![target],
            Op::GuardStart { handler, .. } => smallvec::smallvec![handler],
            Op::JumpInt {
                targets, default, ..
            } => {
                let mut all: SmallVec<[&mut Target; 2]> = targets.iter_mut().collect();
                all.push(default);
                all
            }
            _ => SmallVec::new(),
        }
    }

    /// Self-reported redundancy of a single op at absolute position `at`, given the absolute
    /// index each of its targets resolves to. Scope brackets are judged as pairs by the
    /// assembler.
    pub fn is_redundant(&self, at: usize, resolved_targets: &[usize]) -> bool {
        match self {
            Op::Move {
                src: Argument::Register(src),
                dst,
            } => src == dst,
            Op::Jump { .. } | Op::JumpTrue { .. } | Op::JumpFalse { .. } => {
                resolved_targets == [at + 1]
            }
            _ => false,
        }
    }

    pub fn declares_register(&self) -> bool {
        matches!(self, Op::Var { .. } | Op::VarI { .. })
    }

    /// Registers written by the op.
    pub fn dsts(&self) -> SmallVec<[Reg; 2]> {
        match self {
            Op::Var { dst, .. }
            | Op::VarI { dst, .. }
            | Op::Move { dst, .. }
            | Op::Add { dst, .. }
            | Op::Sub { dst, .. }
            | Op::Mul { dst, .. }
            | Op::Div { dst, .. }
            | Op::Mod { dst, .. }
            | Op::IsEq { dst, .. }
            | Op::IsLt { dst, .. }
            | Op::Not { dst, .. }
            | Op::New { dst, .. }
            | Op::PGet { dst, .. } => smallvec::smallvec![*dst],
            Op::GuardStart { catch_reg, .. } => smallvec::smallvec![*catch_reg],
            Op::Call { dsts, .. } | Op::CallSuper { dsts, .. } | Op::Invoke { dsts, .. } => {
                dsts.iter().copied().collect()
            }
            _ => SmallVec::new(),
        }
    }

    /// Operands read by the op, in field order.
    pub fn arguments(&self) -> SmallVec<[Argument; 4]> {
        match self {
            Op::VarI { value, .. } => smallvec::smallvec![*value],
            Op::Move { src, .. } => smallvec::smallvec![*src],
            Op::Add { a, b, .. }
            | Op::Sub { a, b, .. }
            | Op::Mul { a, b, .. }
            | Op::Div { a, b, .. }
            | Op::Mod { a, b, .. }
            | Op::IsEq { a, b, .. }
            | Op::IsLt { a, b, .. } => smallvec::smallvec![*a, *b],
            Op::Not { value, .. } | Op::Throw { value } | Op::Return1 { value } => {
                smallvec::smallvec![*value]
            }
            Op::JumpTrue { cond, .. } | Op::JumpFalse { cond, .. } | Op::Assert { cond, .. } => {
                smallvec::smallvec![*cond]
            }
            Op::JumpInt { value, .. } => smallvec::smallvec![*value],
            Op::ReturnN { values } => values.iter().copied().collect(),
            Op::Call { args, .. } | Op::CallSuper { args, .. } | Op::New { args, .. } => {
                args.iter().copied().collect()
            }
            Op::Invoke { target, args, .. } => {
                let mut all: SmallVec<[Argument; 4]> = smallvec::smallvec![*target];
                all.extend(args.iter().copied());
                all
            }
            Op::PGet { target, .. } => smallvec::smallvec![*target],
            Op::PSet { target, value, .. } => smallvec::smallvec![*target, *value],
            _ => SmallVec::new(),
        }
    }

    /// Every register the op mentions, read or written.
    pub fn registers(&self) -> SmallVec<[Reg; 4]> {
        let mut regs: SmallVec<[Reg; 4]> = self
            .arguments()
            .into_iter()
            .filter_map(Argument::register)
            .collect();
        regs.extend(self.dsts());
        regs
    }

    /// Pool constants the op refers to, in encoding order.
    pub fn constants(&self) -> SmallVec<[ConstId; 4]> {
        let mut out: SmallVec<[ConstId; 4]> = SmallVec::new();
        match self {
            Op::Var { ty, .. } | Op::GuardStart { catch_type: ty, .. } => out.push(ty.as_const()),
            Op::VarI { ty, .. } => out.push(ty.as_const()),
            Op::Invoke { name, .. } => {
                if let Argument::Constant(c) = self.arguments()[0] {
                    out.push(c);
                }
                out.push(*name);
                out.extend(self.arguments()[1..].iter().filter_map(constant_of));
                return out;
            }
            Op::PGet { target, property, .. } => {
                out.extend(constant_of(target));
                out.push(*property);
                return out;
            }
            Op::PSet {
                target,
                property,
                value,
            } => {
                out.extend(constant_of(target));
                out.push(*property);
                out.extend(constant_of(value));
                return out;
            }
            Op::Assert { cond, message } => {
                out.extend(constant_of(cond));
                out.push(*message);
                return out;
            }
            _ => {}
        }
        out.extend(self.arguments().iter().filter_map(constant_of));
        out
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::Nop => "NOP",
            Op::Line { .. } => "LINE",
            Op::Enter => "ENTER",
            Op::Exit => "EXIT",
            Op::Var { .. } => "VAR",
            Op::VarI { .. } => "VAR_I",
            Op::Move { .. } => "MOV",
            Op::Add { .. } => "ADD",
            Op::Sub { .. } => "SUB",
            Op::Mul { .. } => "MUL",
            Op::Div { .. } => "DIV",
            Op::Mod { .. } => "MOD",
            Op::IsEq { .. } => "IS_EQ",
            Op::IsLt { .. } => "IS_LT",
            Op::Not { .. } => "NOT",
            Op::Jump { .. } => "JMP",
            Op::JumpTrue { .. } => "JMP_TRUE",
            Op::JumpFalse { .. } => "JMP_FALSE",
            Op::JumpInt { .. } => "JMP_INT",
            Op::GuardStart { .. } => "GUARD",
            Op::GuardEnd { .. } => "GUARD_END",
            Op::Throw { .. } => "THROW",
            Op::Return0 => "RETURN_0",
            Op::Return1 { .. } => "RETURN_1",
            Op::ReturnN { .. } => "RETURN_N",
            Op::Call { .. } => "CALL",
            Op::CallSuper { .. } => "CALL_SUPER",
            Op::Invoke { .. } => "INVOKE",
            Op::New { .. } => "NEW",
            Op::PGet { .. } => "P_GET",
            Op::PSet { .. } => "P_SET",
            Op::Assert { .. } => "ASSERT",
        }
    }
}

fn constant_of(arg: &Argument) -> Option<ConstId> {
    match arg {
        Argument::Constant(c) => Some(*c),
        _ => None,
    }
}

/// A real op with the prefixes chained onto it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeOp {
    pub op: Op,
    pub prefixes: SmallVec<[Prefix; 2]>,
}

impl CodeOp {
    pub fn new(op: Op) -> Self {
        Self {
            op,
            prefixes: SmallVec::new(),
        }
    }

    pub fn line_delta(&self) -> u32 {
        self.prefixes
            .iter()
            .map(|p| match p {
                Prefix::Line(delta) => *delta,
                Prefix::Elided => 0,
            })
            .sum()
    }

    pub fn elided(&self) -> usize {
        self.prefixes
            .iter()
            .filter(|p| matches!(p, Prefix::Elided))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jump_int_lists_every_case_and_the_default() {
        let op = Op::JumpInt {
            value: Argument::Register(Reg(0)),
            targets: vec![Target::Offset(1), Target::Offset(3)],
            default: Target::Offset(5),
        };
        assert!(!op.advances());
        assert_eq!(
            op.branch_targets().as_slice(),
            &[Target::Offset(1), Target::Offset(3), Target::Offset(5)]
        );
    }

    #[test]
    fn conditional_jumps_fall_through() {
        let op = Op::JumpTrue {
            cond: Argument::Register(Reg(0)),
            target: Target::Offset(4),
        };
        assert!(op.advances());
        assert_eq!(op.branch_targets().len(), 1);
        assert!(!Op::Return0.advances());
    }

    #[test]
    fn self_reported_redundancy() {
        let noop_move = Op::Move {
            src: Argument::Register(Reg(2)),
            dst: Reg(2),
        };
        assert!(noop_move.is_redundant(0, &[]));
        let real_move = Op::Move {
            src: Argument::Register(Reg(1)),
            dst: Reg(2),
        };
        assert!(!real_move.is_redundant(0, &[]));
        let jump = Op::Jump {
            target: Target::Offset(1),
        };
        assert!(jump.is_redundant(4, &[5]));
        assert!(!jump.is_redundant(4, &[6]));
    }

    #[test]
    fn constants_follow_field_order() {
        let op = Op::Invoke {
            target: Argument::Constant(ConstId(9)),
            name: ConstId(3),
            args: vec![Argument::Register(Reg(0)), Argument::Constant(ConstId(7))],
            dsts: vec![Reg(1)],
        };
        assert_eq!(op.constants().as_slice(), &[ConstId(9), ConstId(3), ConstId(7)]);
        assert_eq!(op.registers().as_slice(), &[Reg(0), Reg(1)]);
    }
}
