//! Op byte encoding.
//!
//! Each op is an opcode byte followed by its fields as packed integers. Pool constants are
//! written as indices into the method's local constant table, built in first-use order.
//! Arguments pack into one integer: a register `r` is `r`, `this` is `-1` and local
//! constant `i` is `-2 - i`. A non-zero line advance is written as a `LINE` prefix.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::op::{CodeOp, Op, Prefix, Target};
use crate::error::DecodeError;
use crate::format::codec::{Decoder, Encoder};
use crate::param::{Argument, Reg};
use crate::pool::{ConstId, TypeId};
use crate::{ClassId, MethodId};

const OP_LINE: u8 = 0x01;
const OP_ENTER: u8 = 0x02;
const OP_EXIT: u8 = 0x03;
const OP_VAR: u8 = 0x04;
const OP_VAR_I: u8 = 0x05;
const OP_MOVE: u8 = 0x06;
const OP_ADD: u8 = 0x10;
const OP_SUB: u8 = 0x11;
const OP_MUL: u8 = 0x12;
const OP_DIV: u8 = 0x13;
const OP_MOD: u8 = 0x14;
const OP_IS_EQ: u8 = 0x15;
const OP_IS_LT: u8 = 0x16;
const OP_NOT: u8 = 0x17;
const OP_JUMP: u8 = 0x20;
const OP_JUMP_TRUE: u8 = 0x21;
const OP_JUMP_FALSE: u8 = 0x22;
const OP_JUMP_INT: u8 = 0x23;
const OP_GUARD_START: u8 = 0x24;
const OP_GUARD_END: u8 = 0x25;
const OP_THROW: u8 = 0x28;
const OP_RETURN_0: u8 = 0x30;
const OP_RETURN_1: u8 = 0x31;
const OP_RETURN_N: u8 = 0x32;
const OP_CALL: u8 = 0x38;
const OP_CALL_SUPER: u8 = 0x39;
const OP_INVOKE: u8 = 0x3a;
const OP_NEW: u8 = 0x3b;
const OP_P_GET: u8 = 0x40;
const OP_P_SET: u8 = 0x41;
const OP_ASSERT: u8 = 0x48;

/// Encodes assembled ops; every target must already be a relative offset.
pub(super) fn encode_ops(ops: &[CodeOp]) -> (Vec<ConstId>, Vec<u8>) {
    let mut table = LocalTable::default();
    for op in ops {
        for constant in op.op.constants() {
            table.index(constant);
        }
    }
    let mut enc = OpEncoder {
        enc: Encoder::new(),
        table: &table,
    };
    for op in ops {
        enc.write_op(op);
    }
    let bytes = enc.enc.finish();
    (table.constants, bytes)
}

#[derive(Default)]
struct LocalTable {
    constants: Vec<ConstId>,
    indices: FxHashMap<ConstId, u32>,
}

impl LocalTable {
    fn index(&mut self, id: ConstId) -> u32 {
        let next = self.constants.len() as u32;
        let idx = *self.indices.entry(id).or_insert(next);
        if idx == next {
            self.constants.push(id);
        }
        idx
    }

    fn get(&self, id: ConstId) -> u32 {
        self.indices.get(&id).copied().unwrap_or(0)
    }
}

struct OpEncoder<'t> {
    enc: Encoder,
    table: &'t LocalTable,
}

impl OpEncoder<'_> {
    fn write_op(&mut self, op: &CodeOp) {
        let line = op.line_delta();
        if line > 0 {
            self.enc.write_u8(OP_LINE);
            self.enc.write_u32(line);
        }
        match &op.op {
            // Prefix ops never reach an assembled body.
            Op::Nop | Op::Line { .. } => {}
            Op::Enter => self.enc.write_u8(OP_ENTER),
            Op::Exit => self.enc.write_u8(OP_EXIT),
            Op::Var { ty, dst } => {
                self.enc.write_u8(OP_VAR);
                self.constant(ty.as_const());
                self.reg(*dst);
            }
            Op::VarI { ty, dst, value } => {
                self.enc.write_u8(OP_VAR_I);
                self.constant(ty.as_const());
                self.reg(*dst);
                self.arg(value);
            }
            Op::Move { src, dst } => {
                self.enc.write_u8(OP_MOVE);
                self.arg(src);
                self.reg(*dst);
            }
            Op::Add { a, b, dst } => self.binary(OP_ADD, a, b, *dst),
            Op::Sub { a, b, dst } => self.binary(OP_SUB, a, b, *dst),
            Op::Mul { a, b, dst } => self.binary(OP_MUL, a, b, *dst),
            Op::Div { a, b, dst } => self.binary(OP_DIV, a, b, *dst),
            Op::Mod { a, b, dst } => self.binary(OP_MOD, a, b, *dst),
            Op::IsEq { a, b, dst } => self.binary(OP_IS_EQ, a, b, *dst),
            Op::IsLt { a, b, dst } => self.binary(OP_IS_LT, a, b, *dst),
            Op::Not { value, dst } => {
                self.enc.write_u8(OP_NOT);
                self.arg(value);
                self.reg(*dst);
            }
            Op::Jump { target } => {
                self.enc.write_u8(OP_JUMP);
                self.target(target);
            }
            Op::JumpTrue { cond, target } => {
                self.enc.write_u8(OP_JUMP_TRUE);
                self.arg(cond);
                self.target(target);
            }
            Op::JumpFalse { cond, target } => {
                self.enc.write_u8(OP_JUMP_FALSE);
                self.arg(cond);
                self.target(target);
            }
            Op::JumpInt {
                value,
                targets,
                default,
            } => {
                self.enc.write_u8(OP_JUMP_INT);
                self.arg(value);
                self.enc.write_u32(targets.len() as u32);
                for target in targets {
                    self.target(target);
                }
                self.target(default);
            }
            Op::GuardStart {
                catch_type,
                catch_reg,
                handler,
            } => {
                self.enc.write_u8(OP_GUARD_START);
                self.constant(catch_type.as_const());
                self.reg(*catch_reg);
                self.target(handler);
            }
            Op::GuardEnd { target } => {
                self.enc.write_u8(OP_GUARD_END);
                self.target(target);
            }
            Op::Throw { value } => {
                self.enc.write_u8(OP_THROW);
                self.arg(value);
            }
            Op::Return0 => self.enc.write_u8(OP_RETURN_0),
            Op::Return1 { value } => {
                self.enc.write_u8(OP_RETURN_1);
                self.arg(value);
            }
            Op::ReturnN { values } => {
                self.enc.write_u8(OP_RETURN_N);
                self.args(values);
            }
            Op::Call { method, args, dsts } => {
                self.enc.write_u8(OP_CALL);
                self.enc.write_u32(method.0);
                self.args(args);
                self.regs(dsts);
            }
            Op::CallSuper { args, dsts } => {
                self.enc.write_u8(OP_CALL_SUPER);
                self.args(args);
                self.regs(dsts);
            }
            Op::Invoke {
                target,
                name,
                args,
                dsts,
            } => {
                self.enc.write_u8(OP_INVOKE);
                self.arg(target);
                self.constant(*name);
                self.args(args);
                self.regs(dsts);
            }
            Op::New { class, args, dst } => {
                self.enc.write_u8(OP_NEW);
                self.enc.write_u32(class.0);
                self.args(args);
                self.reg(*dst);
            }
            Op::PGet {
                target,
                property,
                dst,
            } => {
                self.enc.write_u8(OP_P_GET);
                self.arg(target);
                self.constant(*property);
                self.reg(*dst);
            }
            Op::PSet {
                target,
                property,
                value,
            } => {
                self.enc.write_u8(OP_P_SET);
                self.arg(target);
                self.constant(*property);
                self.arg(value);
            }
            Op::Assert { cond, message } => {
                self.enc.write_u8(OP_ASSERT);
                self.arg(cond);
                self.constant(*message);
            }
        }
    }

    fn binary(&mut self, opcode: u8, a: &Argument, b: &Argument, dst: Reg) {
        self.enc.write_u8(opcode);
        self.arg(a);
        self.arg(b);
        self.reg(dst);
    }

    fn constant(&mut self, id: ConstId) {
        self.enc.write_u32(self.table.get(id));
    }

    fn reg(&mut self, reg: Reg) {
        self.enc.write_u32(reg.0);
    }

    fn regs(&mut self, regs: &[Reg]) {
        self.enc.write_u32(regs.len() as u32);
        for reg in regs {
            self.reg(*reg);
        }
    }

    fn arg(&mut self, arg: &Argument) {
        let packed = match arg {
            Argument::Register(reg) => i64::from(reg.0),
            Argument::This => -1,
            Argument::Constant(id) => -2 - i64::from(self.table.get(*id)),
        };
        self.enc.write_packed(packed);
    }

    fn args(&mut self, args: &[Argument]) {
        self.enc.write_u32(args.len() as u32);
        for arg in args {
            self.arg(arg);
        }
    }

    fn target(&mut self, target: &Target) {
        let offset = match target {
            Target::Offset(offset) => *offset,
            Target::Label(_) => 0,
        };
        self.enc.write_packed(i64::from(offset));
    }
}

pub(super) fn decode_ops(bytes: &[u8], constants: &[ConstId]) -> Result<Vec<CodeOp>, DecodeError> {
    let mut dec = OpDecoder {
        dec: Decoder::new(bytes),
        constants,
    };
    let mut ops = Vec::new();
    while dec.dec.remaining() > 0 {
        ops.push(dec.read_op()?);
    }
    Ok(ops)
}

struct OpDecoder<'a> {
    dec: Decoder<'a>,
    constants: &'a [ConstId],
}

impl OpDecoder<'_> {
    fn read_op(&mut self) -> Result<CodeOp, DecodeError> {
        let mut prefixes: SmallVec<[Prefix; 2]> = SmallVec::new();
        let mut opcode = self.dec.read_u8()?;
        if opcode == OP_LINE {
            prefixes.push(Prefix::Line(self.dec.read_u32()?));
            opcode = self.dec.read_u8()?;
        }
        let op = match opcode {
            OP_ENTER => Op::Enter,
            OP_EXIT => Op::Exit,
            OP_VAR => Op::Var {
                ty: self.ty()?,
                dst: self.reg()?,
            },
            OP_VAR_I => Op::VarI {
                ty: self.ty()?,
                dst: self.reg()?,
                value: self.arg()?,
            },
            OP_MOVE => Op::Move {
                src: self.arg()?,
                dst: self.reg()?,
            },
            OP_ADD => {
                let (a, b, dst) = self.binary()?;
                Op::Add { a, b, dst }
            }
            OP_SUB => {
                let (a, b, dst) = self.binary()?;
                Op::Sub { a, b, dst }
            }
            OP_MUL => {
                let (a, b, dst) = self.binary()?;
                Op::Mul { a, b, dst }
            }
            OP_DIV => {
                let (a, b, dst) = self.binary()?;
                Op::Div { a, b, dst }
            }
            OP_MOD => {
                let (a, b, dst) = self.binary()?;
                Op::Mod { a, b, dst }
            }
            OP_IS_EQ => {
                let (a, b, dst) = self.binary()?;
                Op::IsEq { a, b, dst }
            }
            OP_IS_LT => {
                let (a, b, dst) = self.binary()?;
                Op::IsLt { a, b, dst }
            }
            OP_NOT => Op::Not {
                value: self.arg()?,
                dst: self.reg()?,
            },
            OP_JUMP => Op::Jump {
                target: self.target()?,
            },
            OP_JUMP_TRUE => Op::JumpTrue {
                cond: self.arg()?,
                target: self.target()?,
            },
            OP_JUMP_FALSE => Op::JumpFalse {
                cond: self.arg()?,
                target: self.target()?,
            },
            OP_JUMP_INT => {
                let value = self.arg()?;
                let count = self.dec.read_len()?;
                let targets = (0..count)
                    .map(|_| self.target())
                    .collect::<Result<Vec<_>, _>>()?;
                Op::JumpInt {
                    value,
                    targets,
                    default: self.target()?,
                }
            }
            OP_GUARD_START => Op::GuardStart {
                catch_type: self.ty()?,
                catch_reg: self.reg()?,
                handler: self.target()?,
            },
            OP_GUARD_END => Op::GuardEnd {
                target: self.target()?,
            },
            OP_THROW => Op::Throw { value: self.arg()? },
            OP_RETURN_0 => Op::Return0,
            OP_RETURN_1 => Op::Return1 { value: self.arg()? },
            OP_RETURN_N => Op::ReturnN {
                values: self.args()?,
            },
            OP_CALL => Op::Call {
                method: MethodId(self.dec.read_u32()?),
                args: self.args()?,
                dsts: self.regs()?,
            },
            OP_CALL_SUPER => Op::CallSuper {
                args: self.args()?,
                dsts: self.regs()?,
            },
            OP_INVOKE => Op::Invoke {
                target: self.arg()?,
                name: self.constant()?,
                args: self.args()?,
                dsts: self.regs()?,
            },
            OP_NEW => Op::New {
                class: ClassId(self.dec.read_u32()?),
                args: self.args()?,
                dst: self.reg()?,
            },
            OP_P_GET => Op::PGet {
                target: self.arg()?,
                property: self.constant()?,
                dst: self.reg()?,
            },
            OP_P_SET => Op::PSet {
                target: self.arg()?,
                property: self.constant()?,
                value: self.arg()?,
            },
            OP_ASSERT => Op::Assert {
                cond: self.arg()?,
                message: self.constant()?,
            },
            other => return Err(self.dec.err(format!("invalid opcode 0x{other:02x}"))),
        };
        Ok(CodeOp { op, prefixes })
    }

    fn binary(&mut self) -> Result<(Argument, Argument, Reg), DecodeError> {
        Ok((self.arg()?, self.arg()?, self.reg()?))
    }

    fn constant(&mut self) -> Result<ConstId, DecodeError> {
        let idx = self.dec.read_u32()?;
        self.local(i64::from(idx))
    }

    fn local(&self, idx: i64) -> Result<ConstId, DecodeError> {
        usize::try_from(idx)
            .ok()
            .and_then(|idx| self.constants.get(idx))
            .copied()
            .ok_or_else(|| self.dec.err(format!("local constant {idx} out of range")))
    }

    fn ty(&mut self) -> Result<TypeId, DecodeError> {
        Ok(TypeId(self.constant()?.0))
    }

    fn reg(&mut self) -> Result<Reg, DecodeError> {
        Ok(Reg(self.dec.read_u32()?))
    }

    fn regs(&mut self) -> Result<Vec<Reg>, DecodeError> {
        let count = self.dec.read_len()?;
        (0..count).map(|_| self.reg()).collect()
    }

    fn arg(&mut self) -> Result<Argument, DecodeError> {
        let packed = self.dec.read_packed()?;
        match packed {
            -1 => Ok(Argument::This),
            p if p >= 0 => u32::try_from(p)
                .map(|r| Argument::Register(Reg(r)))
                .map_err(|_| self.dec.err(format!("register {p} out of range"))),
            p => Ok(Argument::Constant(self.local(-2 - p)?)),
        }
    }

    fn args(&mut self) -> Result<Vec<Argument>, DecodeError> {
        let count = self.dec.read_len()?;
        (0..count).map(|_| self.arg()).collect()
    }

    fn target(&mut self) -> Result<Target, DecodeError> {
        Ok(Target::Offset(self.dec.read_i32()?))
    }
}
