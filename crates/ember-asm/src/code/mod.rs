//! Method bodies: building, assembling and encoding ops.
//!
//! A [`Code`] starts out as an append-only [`CodeBuilder`]. `ensure_assembled` runs the
//! dead and redundant code passes to a fixed point, assigns scope depths and register
//! counts, and encodes the result; from then on the code is immutable.

mod assemble;
mod encode;
mod op;

use smallvec::SmallVec;

pub use self::op::{CodeOp, Label, Op, Prefix, Target};

use crate::error::{CodeError, DecodeError};
use crate::param::{Argument, Reg};
use crate::pool::{ConstId, TypeId};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OptLevel {
    /// Resolve labels and assign addresses only.
    O0,
    /// Also remove dead and redundant ops.
    #[default]
    O1,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AssembleOptions {
    pub opt_level: OptLevel,
}

impl AssembleOptions {
    pub fn unoptimized() -> Self {
        Self {
            opt_level: OptLevel::O0,
        }
    }
}

/// Append-only op list with label and register bookkeeping.
#[derive(Clone, Debug, Default)]
pub struct CodeBuilder {
    ops: Vec<CodeOp>,
    pending: SmallVec<[Prefix; 2]>,
    labels: Vec<Option<usize>>,
    param_count: u32,
    next_reg: u32,
    scope_marks: Vec<u32>,
}

impl CodeBuilder {
    /// Registers `0..param_count` hold the value parameters.
    pub fn new(param_count: u32) -> Self {
        Self {
            param_count,
            next_reg: param_count,
            ..Self::default()
        }
    }

    /// Re-opens ops produced by [`Code::disassemble`] (targets are relative offsets).
    pub fn from_ops(ops: Vec<CodeOp>, param_count: u32) -> Self {
        let next_reg = ops
            .iter()
            .flat_map(|op| op.op.registers())
            .map(|r| r.0 + 1)
            .max()
            .unwrap_or(0)
            .max(param_count);
        Self {
            ops,
            param_count,
            next_reg,
            ..Self::default()
        }
    }

    pub fn add(&mut self, op: Op) {
        match op {
            Op::Nop => {}
            Op::Line { delta } => match self.pending.last_mut() {
                Some(Prefix::Line(pending)) => *pending += delta,
                _ => self.pending.push(Prefix::Line(delta)),
            },
            op => {
                let prefixes = std::mem::take(&mut self.pending);
                self.ops.push(CodeOp { op, prefixes });
            }
        }
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    /// Binds `label` to the next op added.
    pub fn place(&mut self, label: Label) -> Result<(), CodeError> {
        match self.labels.get_mut(label.0 as usize) {
            Some(slot @ None) => {
                *slot = Some(self.ops.len());
                Ok(())
            }
            Some(Some(_)) => Err(CodeError::LabelPlacedTwice { label: label.0 }),
            None => Err(CodeError::UnplacedLabel { label: label.0 }),
        }
    }

    pub fn enter(&mut self) {
        self.scope_marks.push(self.next_reg);
        self.add(Op::Enter);
    }

    /// Closes the innermost scope, releasing the registers it declared.
    pub fn exit(&mut self) -> Result<(), CodeError> {
        let mark = self
            .scope_marks
            .pop()
            .ok_or(CodeError::UnbalancedExit {
                index: self.ops.len(),
            })?;
        self.next_reg = mark;
        self.add(Op::Exit);
        Ok(())
    }

    /// Declares a register in the current scope.
    pub fn declare(&mut self, ty: TypeId) -> Reg {
        let dst = self.allocate();
        self.add(Op::Var { ty, dst });
        dst
    }

    pub fn declare_init(&mut self, ty: TypeId, value: Argument) -> Reg {
        let dst = self.allocate();
        self.add(Op::VarI { ty, dst, value });
        dst
    }

    fn allocate(&mut self) -> Reg {
        let reg = Reg(self.next_reg);
        self.next_reg += 1;
        reg
    }

    pub fn param_count(&self) -> u32 {
        self.param_count
    }

    pub fn ops(&self) -> &[CodeOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn label_positions(&self) -> &[Option<usize>] {
        &self.labels
    }
}

/// The immutable result of assembly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssembledCode {
    /// Final ops; every target is a [`Target::Offset`] relative to its op.
    pub ops: Vec<CodeOp>,
    /// Open scopes before each op runs.
    pub depths: Vec<u32>,
    pub max_vars: u32,
    pub max_scopes: u32,
    pub param_count: u32,
    /// Pool constants referenced by the ops, in first-use order.
    pub constants: Vec<ConstId>,
    pub bytes: Vec<u8>,
}

impl AssembledCode {
    /// Absolute index of a target carried by the op at `at`.
    pub fn target_index(&self, at: usize, target: Target) -> Option<usize> {
        match target {
            Target::Offset(offset) => {
                let index = at as i64 + offset as i64;
                (0..self.ops.len() as i64)
                    .contains(&index)
                    .then_some(index as usize)
            }
            Target::Label(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// A method body in one of its three states.
#[derive(Clone, Debug)]
pub enum Code {
    Building(CodeBuilder),
    Assembled(AssembledCode),
    /// Accepts and discards every append.
    Suppressed,
}

impl Code {
    pub fn new(param_count: u32) -> Self {
        Code::Building(CodeBuilder::new(param_count))
    }

    pub fn add(&mut self, op: Op) -> Result<(), CodeError> {
        match self {
            Code::Building(builder) => {
                builder.add(op);
                Ok(())
            }
            Code::Suppressed => Ok(()),
            Code::Assembled(_) => Err(CodeError::NotAppendable),
        }
    }

    pub fn new_label(&mut self) -> Result<Label, CodeError> {
        match self {
            Code::Building(builder) => Ok(builder.new_label()),
            Code::Suppressed => Ok(Label(0)),
            Code::Assembled(_) => Err(CodeError::NotAppendable),
        }
    }

    pub fn place(&mut self, label: Label) -> Result<(), CodeError> {
        match self {
            Code::Building(builder) => builder.place(label),
            Code::Suppressed => Ok(()),
            Code::Assembled(_) => Err(CodeError::NotAppendable),
        }
    }

    pub fn enter(&mut self) -> Result<(), CodeError> {
        match self {
            Code::Building(builder) => {
                builder.enter();
                Ok(())
            }
            Code::Suppressed => Ok(()),
            Code::Assembled(_) => Err(CodeError::NotAppendable),
        }
    }

    pub fn exit(&mut self) -> Result<(), CodeError> {
        match self {
            Code::Building(builder) => builder.exit(),
            Code::Suppressed => Ok(()),
            Code::Assembled(_) => Err(CodeError::NotAppendable),
        }
    }

    pub fn declare(&mut self, ty: TypeId) -> Result<Reg, CodeError> {
        match self {
            Code::Building(builder) => Ok(builder.declare(ty)),
            Code::Suppressed => Ok(Reg(0)),
            Code::Assembled(_) => Err(CodeError::NotAppendable),
        }
    }

    pub fn declare_init(&mut self, ty: TypeId, value: Argument) -> Result<Reg, CodeError> {
        match self {
            Code::Building(builder) => Ok(builder.declare_init(ty, value)),
            Code::Suppressed => Ok(Reg(0)),
            Code::Assembled(_) => Err(CodeError::NotAppendable),
        }
    }

    pub fn is_assembled(&self) -> bool {
        matches!(self, Code::Assembled(_))
    }

    pub fn assembled(&self) -> Option<&AssembledCode> {
        match self {
            Code::Assembled(code) => Some(code),
            _ => None,
        }
    }

    /// Ops added so far, or the final op count once assembled.
    pub fn op_count(&self) -> usize {
        match self {
            Code::Building(builder) => builder.len(),
            Code::Assembled(code) => code.len(),
            Code::Suppressed => 0,
        }
    }

    /// Assembles on first call and returns the same result afterwards.
    ///
    /// `needs_code` is false for native and abstract methods, which may have empty bodies.
    pub fn ensure_assembled(
        &mut self,
        method: &str,
        needs_code: bool,
        options: &AssembleOptions,
    ) -> Result<&AssembledCode, CodeError> {
        if !self.is_assembled() {
            let assembled = match self {
                Code::Building(builder) => {
                    assemble::assemble(builder, method, needs_code, options)?
                }
                _ => assemble::assemble(&CodeBuilder::default(), method, needs_code, options)?,
            };
            *self = Code::Assembled(assembled);
        }
        self.assembled().ok_or(CodeError::NotAppendable)
    }

    /// Decodes assembled op bytes against the method's local constant table.
    ///
    /// Targets come back as relative offsets; [`CodeBuilder::from_ops`] re-opens them.
    pub fn disassemble(bytes: &[u8], constants: &[ConstId]) -> Result<Vec<CodeOp>, DecodeError> {
        encode::decode_ops(bytes, constants)
    }

    /// Rebuilds an assembled code from decoded ops, recomputing the derived tables.
    pub(crate) fn from_decoded(
        ops: Vec<CodeOp>,
        constants: Vec<ConstId>,
        bytes: Vec<u8>,
        param_count: u32,
    ) -> Result<Code, DecodeError> {
        let layout = assemble::layout(&ops, param_count).map_err(|err| DecodeError {
            message: err.to_string(),
            offset: 0,
        })?;
        Ok(Code::Assembled(AssembledCode {
            ops,
            depths: layout.depths,
            max_vars: layout.max_vars,
            max_scopes: layout.max_scopes,
            param_count,
            constants,
            bytes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_deltas_accumulate_onto_the_next_op() {
        let mut builder = CodeBuilder::new(0);
        builder.add(Op::Line { delta: 2 });
        builder.add(Op::Nop);
        builder.add(Op::Line { delta: 3 });
        builder.add(Op::Return0);
        assert_eq!(builder.len(), 1);
        assert_eq!(builder.ops()[0].line_delta(), 5);
    }

    #[test]
    fn registers_are_released_by_exit() {
        let mut builder = CodeBuilder::new(2);
        builder.enter();
        assert_eq!(builder.declare(TypeId::INT), Reg(2));
        assert_eq!(builder.declare(TypeId::INT), Reg(3));
        builder.exit().unwrap();
        assert_eq!(builder.declare(TypeId::STRING), Reg(2));
        assert_eq!(
            builder.exit(),
            Err(CodeError::UnbalancedExit { index: 5 })
        );
    }

    #[test]
    fn suppressed_code_discards_appends() {
        let mut code = Code::Suppressed;
        code.add(Op::Return0).unwrap();
        code.enter().unwrap();
        assert_eq!(code.op_count(), 0);
    }

    #[test]
    fn assembled_code_is_not_appendable() {
        let mut code = Code::new(0);
        code.add(Op::Return0).unwrap();
        code.ensure_assembled("run", true, &AssembleOptions::default())
            .unwrap();
        assert_eq!(code.add(Op::Return0), Err(CodeError::NotAppendable));
        assert!(code.is_assembled());
    }

    #[test]
    fn empty_code_is_rejected_unless_native() {
        let mut code = Code::new(0);
        assert_eq!(
            code.ensure_assembled("run", true, &AssembleOptions::default())
                .map(|_| ()),
            Err(CodeError::EmptyCode {
                method: "run".to_string()
            })
        );
        let mut native = Code::new(0);
        assert!(native
            .ensure_assembled("run", false, &AssembleOptions::default())
            .is_ok());
    }

    #[test]
    fn labels_are_placed_once() {
        let mut builder = CodeBuilder::new(0);
        let label = builder.new_label();
        builder.place(label).unwrap();
        assert_eq!(
            builder.place(label),
            Err(CodeError::LabelPlacedTwice { label: 0 })
        );
    }
}
