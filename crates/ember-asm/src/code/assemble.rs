use smallvec::SmallVec;
use tracing::trace;

use super::encode;
use super::op::{CodeOp, Op, Prefix, Target};
use super::{AssembleOptions, AssembledCode, CodeBuilder, OptLevel};
use crate::error::CodeError;

/// An op with its branch targets resolved to absolute indices.
struct Node {
    op: CodeOp,
    targets: SmallVec<[usize; 2]>,
}

pub(super) fn assemble(
    builder: &CodeBuilder,
    method: &str,
    needs_code: bool,
    options: &AssembleOptions,
) -> Result<AssembledCode, CodeError> {
    let param_count = builder.param_count();
    if builder.is_empty() {
        if needs_code {
            return Err(CodeError::EmptyCode {
                method: method.to_string(),
            });
        }
        return Ok(AssembledCode {
            ops: Vec::new(),
            depths: Vec::new(),
            max_vars: param_count,
            max_scopes: 1,
            param_count,
            constants: Vec::new(),
            bytes: Vec::new(),
        });
    }

    let mut nodes = resolve_targets(builder)?;
    let added = nodes.len();
    if options.opt_level == OptLevel::O1 {
        let mut rounds = 0u32;
        loop {
            rounds += 1;
            let dead = eliminate_dead(&mut nodes);
            let redundant = eliminate_redundant(&mut nodes);
            if !dead && !redundant {
                break;
            }
        }
        trace!(method, added, kept = nodes.len(), rounds, "code optimized");
    }

    let ops = relativize(nodes);
    let layout = layout(&ops, param_count)?;
    let (constants, bytes) = encode::encode_ops(&ops);
    Ok(AssembledCode {
        ops,
        depths: layout.depths,
        max_vars: layout.max_vars,
        max_scopes: layout.max_scopes,
        param_count,
        constants,
        bytes,
    })
}

fn resolve_targets(builder: &CodeBuilder) -> Result<Vec<Node>, CodeError> {
    let len = builder.len();
    let labels = builder.label_positions();
    builder
        .ops()
        .iter()
        .enumerate()
        .map(|(index, op)| {
            let targets = op
                .op
                .branch_targets()
                .into_iter()
                .map(|target| {
                    let absolute = match target {
                        Target::Label(label) => labels
                            .get(label.0 as usize)
                            .copied()
                            .flatten()
                            .ok_or(CodeError::UnplacedLabel { label: label.0 })?
                            as i64,
                        Target::Offset(offset) => index as i64 + i64::from(offset),
                    };
                    if !(0..len as i64).contains(&absolute) {
                        return Err(CodeError::BranchOutOfRange {
                            index,
                            target: absolute,
                            len,
                        });
                    }
                    Ok(absolute as usize)
                })
                .collect::<Result<SmallVec<[usize; 2]>, CodeError>>()?;
            Ok(Node {
                op: op.clone(),
                targets,
            })
        })
        .collect()
}

/// Pairs every `Enter` with its `Exit` (and back) by linear nesting.
fn match_scopes(nodes: &[Node]) -> Vec<Option<usize>> {
    let mut partners = vec![None; nodes.len()];
    let mut open = Vec::new();
    for (at, node) in nodes.iter().enumerate() {
        match node.op.op {
            Op::Enter => open.push(at),
            Op::Exit => {
                if let Some(enter) = open.pop() {
                    partners[enter] = Some(at);
                    partners[at] = Some(enter);
                }
            }
            _ => {}
        }
    }
    partners
}

/// Drops ops not reachable from the first op. Returns whether anything changed.
///
/// Scope brackets go as pairs: an `Exit` is kept exactly when its `Enter` is reachable.
fn eliminate_dead(nodes: &mut Vec<Node>) -> bool {
    let len = nodes.len();
    let mut live = vec![false; len];
    let mut stack = vec![0usize];
    while let Some(at) = stack.pop() {
        if at >= len || live[at] {
            continue;
        }
        live[at] = true;
        if nodes[at].op.op.advances() {
            stack.push(at + 1);
        }
        stack.extend(nodes[at].targets.iter().copied());
    }

    let mut keep = live.clone();
    for (at, partner) in match_scopes(nodes).into_iter().enumerate() {
        if let (Op::Exit, Some(enter)) = (&nodes[at].op.op, partner) {
            keep[at] = live[enter];
        }
    }
    if keep.iter().all(|k| *k) {
        return false;
    }
    trace!(removed = keep.iter().filter(|k| !**k).count(), "dead ops");
    retain(nodes, &keep, false);
    true
}

/// Drops ops that report themselves redundant, folding their prefixes (plus an
/// [`Prefix::Elided`] marker) into the next surviving op. Returns whether anything changed.
///
/// The last op always survives, so every folded prefix has a home.
fn eliminate_redundant(nodes: &mut Vec<Node>) -> bool {
    let len = nodes.len();
    if len < 2 {
        return false;
    }
    let mut redundant: Vec<bool> = nodes
        .iter()
        .enumerate()
        .map(|(at, node)| at + 1 < len && node.op.op.is_redundant(at, &node.targets))
        .collect();
    for (enter, partner) in match_scopes(nodes).into_iter().enumerate() {
        let Some(exit) = partner else { continue };
        if nodes[enter].op.op != Op::Enter || exit + 1 >= len {
            continue;
        }
        if !declares_directly(&nodes[enter + 1..exit]) {
            redundant[enter] = true;
            redundant[exit] = true;
        }
    }
    if !redundant.iter().any(|r| *r) {
        return false;
    }
    let keep: Vec<bool> = redundant.iter().map(|r| !r).collect();
    trace!(removed = len - keep.iter().filter(|k| **k).count(), "redundant ops");
    retain(nodes, &keep, true);
    true
}

/// Whether a scope body declares a register outside any nested scope.
fn declares_directly(body: &[Node]) -> bool {
    let mut depth = 0u32;
    for node in body {
        match &node.op.op {
            Op::Enter => depth += 1,
            Op::Exit => depth = depth.saturating_sub(1),
            op if depth == 0 && op.declares_register() => return true,
            _ => {}
        }
    }
    false
}

fn retain(nodes: &mut Vec<Node>, keep: &[bool], fold_prefixes: bool) {
    let old_len = nodes.len();
    let mut old_to_new: Vec<Option<usize>> = vec![None; old_len];
    let mut next = 0;
    for (slot, kept) in old_to_new.iter_mut().zip(keep) {
        if *kept {
            *slot = Some(next);
            next += 1;
        }
    }
    // Fill deleted indices to point at the next kept op, so branches into removed ops land
    // where control would have continued.
    let mut next_live: Option<usize> = None;
    for slot in old_to_new.iter_mut().rev() {
        match *slot {
            Some(at) => next_live = Some(at),
            None => *slot = next_live,
        }
    }

    let mut carried: SmallVec<[Prefix; 2]> = SmallVec::new();
    let mut out = Vec::with_capacity(next);
    for (at, mut node) in std::mem::take(nodes).into_iter().enumerate() {
        if !keep[at] {
            if fold_prefixes {
                carried.extend(node.op.prefixes);
                carried.push(Prefix::Elided);
            }
            continue;
        }
        if !carried.is_empty() {
            carried.extend(node.op.prefixes.drain(..));
            node.op.prefixes = std::mem::take(&mut carried);
        }
        for target in node.targets.iter_mut() {
            if let Some(new) = old_to_new[*target] {
                *target = new;
            }
        }
        out.push(node);
    }
    *nodes = out;
}

fn relativize(nodes: Vec<Node>) -> Vec<CodeOp> {
    nodes
        .into_iter()
        .enumerate()
        .map(|(at, mut node)| {
            for (slot, absolute) in node.op.op.branch_targets_mut().into_iter().zip(&node.targets) {
                *slot = Target::Offset((*absolute as i64 - at as i64) as i32);
            }
            node.op
        })
        .collect()
}

pub(super) struct Layout {
    pub depths: Vec<u32>,
    pub max_vars: u32,
    pub max_scopes: u32,
}

/// Simulates scopes linearly, recording the open-scope depth before each op.
///
/// `max_scopes` counts the method's own outermost scope.
pub(super) fn layout(ops: &[CodeOp], param_count: u32) -> Result<Layout, CodeError> {
    let mut depths = Vec::with_capacity(ops.len());
    let mut depth = 0u32;
    let mut max_depth = 0u32;
    let mut max_vars = param_count;
    for (index, op) in ops.iter().enumerate() {
        depths.push(depth);
        match op.op {
            Op::Enter => {
                depth += 1;
                max_depth = max_depth.max(depth);
            }
            Op::Exit => {
                depth = depth
                    .checked_sub(1)
                    .ok_or(CodeError::UnbalancedExit { index })?;
            }
            _ => {}
        }
        for reg in op.op.registers() {
            max_vars = max_vars.max(reg.0 + 1);
        }
    }
    Ok(Layout {
        depths,
        max_vars,
        max_scopes: max_depth + 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::{Argument, Reg};
    use crate::pool::{ConstId, TypeId};

    fn assembled(builder: &CodeBuilder) -> AssembledCode {
        assemble(builder, "test", true, &AssembleOptions::default()).unwrap()
    }

    #[test]
    fn empty_scope_brackets_are_coalesced() {
        let mut builder = CodeBuilder::new(0);
        builder.enter();
        builder.exit().unwrap();
        builder.add(Op::Return0);
        let code = assembled(&builder);
        assert!(code.len() < builder.len());
        assert_eq!(code.ops.len(), 1);
        assert_eq!(code.ops[0].op, Op::Return0);
        assert_eq!(code.ops[0].elided(), 2);
        assert_eq!(code.max_scopes, 1);
    }

    #[test]
    fn scopes_declaring_registers_survive() {
        let mut builder = CodeBuilder::new(1);
        builder.enter();
        let tmp = builder.declare(TypeId::INT);
        builder.add(Op::Move {
            src: Argument::Register(Reg(0)),
            dst: tmp,
        });
        builder.exit().unwrap();
        builder.add(Op::Return0);
        let code = assembled(&builder);
        assert_eq!(code.ops.len(), 5);
        assert_eq!(code.depths, vec![0, 1, 1, 1, 0]);
        assert_eq!(code.max_vars, 2);
        assert_eq!(code.max_scopes, 2);
    }

    #[test]
    fn unreachable_ops_are_dropped() {
        let mut builder = CodeBuilder::new(0);
        builder.add(Op::Return0);
        builder.add(Op::Move {
            src: Argument::Constant(ConstId(3)),
            dst: Reg(0),
        });
        builder.add(Op::Return0);
        let code = assembled(&builder);
        assert_eq!(code.ops.len(), 1);
        assert!(code.constants.is_empty());
    }

    #[test]
    fn jump_over_dead_code_collapses() {
        let mut builder = CodeBuilder::new(1);
        let end = builder.new_label();
        builder.add(Op::Line { delta: 1 });
        builder.add(Op::Jump {
            target: Target::Label(end),
        });
        builder.add(Op::Move {
            src: Argument::Register(Reg(0)),
            dst: Reg(1),
        });
        builder.place(end).unwrap();
        builder.add(Op::Line { delta: 2 });
        builder.add(Op::Return1 {
            value: Argument::Register(Reg(0)),
        });
        let code = assembled(&builder);
        assert_eq!(code.ops.len(), 1);
        // The jump's line advance folds into the surviving return.
        assert_eq!(code.ops[0].line_delta(), 3);
        assert_eq!(code.ops[0].elided(), 1);
    }

    #[test]
    fn branches_into_removed_ops_are_retargeted() {
        let mut builder = CodeBuilder::new(1);
        let body = builder.new_label();
        builder.add(Op::JumpTrue {
            cond: Argument::Register(Reg(0)),
            target: Target::Label(body),
        });
        builder.add(Op::Return1 {
            value: Argument::Register(Reg(0)),
        });
        builder.place(body).unwrap();
        builder.enter();
        builder.exit().unwrap();
        builder.add(Op::Return0);
        let code = assembled(&builder);
        assert_eq!(code.ops.len(), 3);
        assert_eq!(
            code.ops[0].op,
            Op::JumpTrue {
                cond: Argument::Register(Reg(0)),
                target: Target::Offset(2),
            }
        );
    }

    #[test]
    fn unoptimized_assembly_keeps_every_op() {
        let mut builder = CodeBuilder::new(0);
        builder.enter();
        builder.exit().unwrap();
        builder.add(Op::Return0);
        let code = assemble(&builder, "test", true, &AssembleOptions::unoptimized()).unwrap();
        assert_eq!(code.ops.len(), 3);
    }

    #[test]
    fn unplaced_labels_are_reported() {
        let mut builder = CodeBuilder::new(0);
        let label = builder.new_label();
        builder.add(Op::Jump {
            target: Target::Label(label),
        });
        assert!(matches!(
            assemble(&builder, "test", true, &AssembleOptions::default()),
            Err(CodeError::UnplacedLabel { label: 0 })
        ));
    }

    #[test]
    fn dead_code_elimination_is_idempotent() {
        let mut builder = CodeBuilder::new(1);
        let skip = builder.new_label();
        builder.enter();
        let flag = builder.declare(TypeId::BOOLEAN);
        builder.add(Op::JumpFalse {
            cond: Argument::Register(flag),
            target: Target::Label(skip),
        });
        builder.add(Op::Return0);
        builder.add(Op::Return0);
        builder.place(skip).unwrap();
        builder.exit().unwrap();
        builder.add(Op::Return1 {
            value: Argument::Register(Reg(0)),
        });
        let mut nodes = resolve_targets(&builder).unwrap();
        assert!(eliminate_dead(&mut nodes));
        let first: Vec<CodeOp> = nodes.iter().map(|n| n.op.clone()).collect();
        assert!(!eliminate_dead(&mut nodes));
        let second: Vec<CodeOp> = nodes.iter().map(|n| n.op.clone()).collect();
        assert_eq!(first, second);
    }
}
