use ember_asm::{core, Argument, AssembledCode, Constant, Op, Reg, Target};

use super::{Callee, Runtime};
use crate::context::{ContextId, Fiber, Wait};
use crate::error::VmError;
use crate::frame::{Continuation, Frame, Guard};
use crate::native::{int_binary, NativeResult};
use crate::value::Value;

/// What the scheduler does after one op.
#[derive(Debug)]
pub(crate) enum Step {
    Next,
    /// Continue at an absolute op index.
    Jump(usize),
    Call(Box<Frame>),
    Return(Vec<Value>),
    Exception(Value),
    /// Park the fiber until a message answers it.
    Block(Wait),
}

fn expected(kind: &str, value: &Value) -> Step {
    Step::Exception(Value::exception(
        core::ILLEGAL_ARGUMENT,
        format!("expected {kind}, got {}", value.kind()),
    ))
}

fn target(code: &AssembledCode, at: usize, target: Target) -> Result<usize, VmError> {
    code.target_index(at, target)
        .ok_or_else(|| VmError::InvalidState {
            message: format!("op {at} branches outside its code"),
        })
}

impl Runtime {
    fn read(&self, frame: &Frame, arg: Argument) -> Result<Value, VmError> {
        match arg {
            Argument::Register(reg) => Ok(frame.get(reg)),
            Argument::This => Ok(frame.this.clone()),
            Argument::Constant(id) => self.constant_value(id),
        }
    }

    fn read_all(&self, frame: &Frame, args: &[Argument]) -> Result<Vec<Value>, VmError> {
        args.iter().map(|arg| self.read(frame, *arg)).collect()
    }

    /// Executes the op at the top frame's `pc`. The `pc` moves past the op before it runs.
    pub(super) fn step(&mut self, ctx: ContextId, fiber: &mut Fiber) -> Result<Step, VmError> {
        let Some(frame) = fiber.frames.last_mut() else {
            return Err(VmError::InvalidState {
                message: "step without a frame".to_string(),
            });
        };
        if !frame.initialized {
            return self.ensure_initialized(ctx, fiber);
        }
        let code = frame.code.clone();
        let at = frame.pc;
        let Some(op) = code.ops.get(at) else {
            // Falling off the end returns nothing.
            return Ok(Step::Return(Vec::new()));
        };
        let op = &op.op;
        if self.config.metrics {
            self.metrics.record(op);
        }
        frame.pc = at + 1;

        match op {
            Op::Nop | Op::Line { .. } => Ok(Step::Next),
            Op::Enter => {
                frame.enter();
                Ok(Step::Next)
            }
            Op::Exit => {
                frame.exit();
                Ok(Step::Next)
            }
            Op::Var { dst, .. } => {
                frame.declare(*dst);
                Ok(Step::Next)
            }
            Op::VarI { dst, value, .. } => {
                let value = self.read(frame, *value)?;
                frame.declare(*dst);
                frame.set(*dst, value);
                Ok(Step::Next)
            }
            Op::Move { src, dst } => {
                let value = self.read(frame, *src)?;
                frame.set(*dst, value);
                Ok(Step::Next)
            }

            Op::Add { a, b, dst } => self.arith(ctx, fiber, "add", *a, *b, *dst),
            Op::Sub { a, b, dst } => self.arith(ctx, fiber, "sub", *a, *b, *dst),
            Op::Mul { a, b, dst } => self.arith(ctx, fiber, "mul", *a, *b, *dst),
            Op::Div { a, b, dst } => self.arith(ctx, fiber, "div", *a, *b, *dst),
            Op::Mod { a, b, dst } => self.arith(ctx, fiber, "mod", *a, *b, *dst),
            Op::IsEq { a, b, dst } => {
                let equal = self.read(frame, *a)? == self.read(frame, *b)?;
                frame.set(*dst, Value::Bool(equal));
                Ok(Step::Next)
            }
            Op::IsLt { a, b, dst } => {
                let (a, b) = (self.read(frame, *a)?, self.read(frame, *b)?);
                let less = match (&a, &b) {
                    (Value::Int(x), Value::Int(y)) => x < y,
                    (Value::Char(x), Value::Char(y)) => x < y,
                    (Value::String(x), Value::String(y)) => x < y,
                    _ => {
                        return Ok(Step::Exception(Value::exception(
                            core::ILLEGAL_ARGUMENT,
                            format!("cannot order {} and {}", a.kind(), b.kind()),
                        )));
                    }
                };
                frame.set(*dst, Value::Bool(less));
                Ok(Step::Next)
            }
            Op::Not { value, dst } => {
                let value = self.read(frame, *value)?;
                let Some(flag) = value.as_bool() else {
                    return Ok(expected("Boolean", &value));
                };
                frame.set(*dst, Value::Bool(!flag));
                Ok(Step::Next)
            }

            Op::Jump { target: t } => Ok(Step::Jump(target(&code, at, *t)?)),
            Op::JumpTrue { cond, target: t } | Op::JumpFalse { cond, target: t } => {
                let value = self.read(frame, *cond)?;
                let Some(flag) = value.as_bool() else {
                    return Ok(expected("Boolean", &value));
                };
                let on = matches!(op, Op::JumpTrue { .. });
                if flag == on {
                    Ok(Step::Jump(target(&code, at, *t)?))
                } else {
                    Ok(Step::Next)
                }
            }
            Op::JumpInt {
                value,
                targets,
                default,
            } => {
                let value = self.read(frame, *value)?;
                let Some(index) = value.as_int() else {
                    return Ok(expected("Int", &value));
                };
                let chosen = usize::try_from(index)
                    .ok()
                    .and_then(|idx| targets.get(idx))
                    .copied()
                    .unwrap_or(*default);
                Ok(Step::Jump(target(&code, at, chosen)?))
            }
            Op::GuardStart {
                catch_type,
                catch_reg,
                handler,
            } => {
                let handler = target(&code, at, *handler)?;
                frame.guards.push(Guard {
                    catch_type: *catch_type,
                    catch_reg: *catch_reg,
                    handler,
                });
                Ok(Step::Next)
            }
            Op::GuardEnd { target: t } => {
                frame.guards.pop();
                Ok(Step::Jump(target(&code, at, *t)?))
            }
            Op::Throw { value } => Ok(Step::Exception(self.read(frame, *value)?)),

            Op::Return0 => Ok(Step::Return(Vec::new())),
            Op::Return1 { value } => Ok(Step::Return(vec![self.read(frame, *value)?])),
            Op::ReturnN { values } => Ok(Step::Return(self.read_all(frame, values)?)),

            Op::Call { method, args, dsts } => {
                let args = self.read_all(frame, args)?;
                let this = frame.this.clone();
                let callee = self.callee_of(*method)?;
                self.begin_call(ctx, fiber, callee, this, args, Continuation::returning(dsts.clone()))
            }
            Op::CallSuper { args, dsts } => {
                let args = self.read_all(frame, args)?;
                let this = frame.this.clone();
                let chain = frame.chain.clone();
                let pos = frame.chain_pos + 1;
                let Some(&method) = chain.get(pos) else {
                    let name = self.module.classes.method(frame.method).name();
                    return Ok(Step::Exception(Value::exception(
                        core::ILLEGAL_STATE,
                        format!("`{name}` has no super method"),
                    )));
                };
                let callee = Callee { method, chain, pos };
                self.begin_call(ctx, fiber, callee, this, args, Continuation::returning(dsts.clone()))
            }
            Op::Invoke {
                target,
                name,
                args,
                dsts,
            } => {
                let target = self.read(frame, *target)?;
                let args = self.read_all(frame, args)?;
                let name = self.name_constant(*name)?;
                self.invoke_value(ctx, fiber, target, &name, args, Continuation::returning(dsts.clone()))
            }
            Op::New { class, args, dst } => {
                let args = self.read_all(frame, args)?;
                self.new_instance(ctx, fiber, *class, args, Some(*dst))
            }
            Op::PGet {
                target,
                property,
                dst,
            } => {
                let target = self.read(frame, *target)?;
                let name = self.name_constant(*property)?;
                self.get_property(ctx, fiber, target, &name, Continuation::returning(vec![*dst]))
            }
            Op::PSet {
                target,
                property,
                value,
            } => {
                let target = self.read(frame, *target)?;
                let value = self.read(frame, *value)?;
                let name = self.name_constant(*property)?;
                self.set_property(ctx, target, &name, value)
            }
            Op::Assert { cond, message } => {
                let value = self.read(frame, *cond)?;
                match value.as_bool() {
                    Some(true) => Ok(Step::Next),
                    Some(false) => {
                        let message = match self.module.pool.get(*message) {
                            Some(Constant::String(text)) => text.clone(),
                            _ => "Assertion failed".to_string(),
                        };
                        Ok(Step::Exception(Value::exception(core::ILLEGAL_STATE, message)))
                    }
                    None => Ok(expected("Boolean", &value)),
                }
            }
        }
    }

    /// Integer arithmetic inline; any other left operand answers the op's method by name.
    fn arith(
        &mut self,
        ctx: ContextId,
        fiber: &mut Fiber,
        name: &str,
        a: Argument,
        b: Argument,
        dst: Reg,
    ) -> Result<Step, VmError> {
        let Some(frame) = fiber.frames.last_mut() else {
            return Err(VmError::InvalidState {
                message: "step without a frame".to_string(),
            });
        };
        let (a, b) = (self.read(frame, a)?, self.read(frame, b)?);
        if let (Value::Int(x), Value::Int(y)) = (&a, &b) {
            return match int_binary(name, *x, *y) {
                Some(NativeResult::Value(value)) => {
                    frame.set(dst, value);
                    Ok(Step::Next)
                }
                Some(NativeResult::Exception(exception)) => Ok(Step::Exception(exception)),
                _ => Err(VmError::InvalidState {
                    message: format!("no integer operation `{name}`"),
                }),
            };
        }
        self.invoke_value(ctx, fiber, a, name, vec![b], Continuation::returning(vec![dst]))
    }
}
