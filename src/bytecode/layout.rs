use std::collections::HashMap;

use log::trace;

use crate::bytecode::block::{BlockGraph, BlockId, Exit};
use crate::bytecode::compile::Compilation;
use crate::bytecode::compile_error::CompileError;
use crate::bytecode::{CodeObject, Op, ProgramBc};

// =============================================================================
// LAYOUT - block graph to linear code
// =============================================================================
//
// Blocks are placed in reverse postorder from the entry. A block whose
// successor is placed right after it falls through; everything else gets an
// explicit relative jump. Jumps resolve as `new_ip = ip + offset`, and a
// target of `ops.len()` means "past the end".

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Block(BlockId),
    End,
}

enum Pending {
    Op(Op),
    Jump(Target),
    JumpIfFalse(Target),
    Switch(Vec<Target>),
}

/// Lay out `main` and every declared subroutine as separate code objects.
pub fn assemble(compilation: &Compilation) -> Result<ProgramBc, CompileError> {
    let mut program = ProgramBc::new();
    program.code[0].ops = lay_out(&compilation.graph, compilation.main.entry)?;

    for decl in &compilation.subroutines {
        let ops = lay_out(&compilation.graph, decl.fragment.entry)?;
        program
            .subroutines
            .insert(decl.subroutine.id(), program.code.len());
        program.code.push(CodeObject {
            name: decl.name().to_string(),
            ops,
        });
    }

    Ok(program)
}

/// Linearize the blocks reachable from `entry`.
pub fn lay_out(graph: &BlockGraph, entry: BlockId) -> Result<Vec<Op>, CompileError> {
    let order = graph.reachable(entry);

    let mut pending = Vec::new();
    let mut starts = HashMap::new();

    for (k, id) in order.iter().enumerate() {
        starts.insert(*id, pending.len());
        let block = graph.block(*id);
        pending.extend(block.ops.iter().cloned().map(Pending::Op));

        let following = order.get(k + 1).copied();
        let falls_to = |target: BlockId| following == Some(target);

        match &block.exit {
            Exit::Open => {
                if following.is_some() {
                    pending.push(Pending::Jump(Target::End));
                }
            }
            Exit::Next(next) => {
                if !falls_to(*next) {
                    pending.push(Pending::Jump(Target::Block(*next)));
                }
            }
            Exit::Branch(targets) if targets.len() == 2 => {
                pending.push(Pending::JumpIfFalse(Target::Block(targets[1])));
                if !falls_to(targets[0]) {
                    pending.push(Pending::Jump(Target::Block(targets[0])));
                }
            }
            Exit::Branch(targets) => {
                let (default, cases) = targets.split_last().ok_or_else(|| {
                    CompileError::structure(format!("{} branches to nothing", id))
                })?;
                pending.push(Pending::Switch(
                    cases.iter().map(|t| Target::Block(*t)).collect(),
                ));
                if !falls_to(*default) {
                    pending.push(Pending::Jump(Target::Block(*default)));
                }
            }
            Exit::Terminal => {}
        }
    }

    let end = pending.len();
    let resolve = |ip: usize, target: Target| -> Result<i32, CompileError> {
        let to = match target {
            Target::Block(id) => *starts
                .get(&id)
                .ok_or_else(|| CompileError::structure(format!("{} was never placed", id)))?,
            Target::End => end,
        };
        i32::try_from(to as i64 - ip as i64)
            .map_err(|_| CompileError::structure("jump offset does not fit in 32 bits"))
    };

    let mut ops = Vec::with_capacity(pending.len());
    for (ip, item) in pending.into_iter().enumerate() {
        ops.push(match item {
            Pending::Op(op) => op,
            Pending::Jump(t) => Op::Jump(resolve(ip, t)?),
            Pending::JumpIfFalse(t) => Op::JumpIfFalse(resolve(ip, t)?),
            Pending::Switch(ts) => Op::Switch(
                ts.into_iter()
                    .map(|t| resolve(ip, t))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        });
    }

    trace!("laid out {} blocks into {} ops", order.len(), ops.len());
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile::Compiler;
    use crate::lang::expr::*;

    fn layout_main(root: Expr) -> Vec<Op> {
        let compilation = Compiler::new().compile(&root).unwrap();
        lay_out(&compilation.graph, compilation.main.entry).unwrap()
    }

    #[test]
    fn test_straight_line_falls_through() {
        let ops = layout_main(add(int(1), int(2)));
        assert_eq!(ops, vec![Op::PushInt(1), Op::PushInt(2), Op::Add]);
    }

    #[test]
    fn test_if_else_layout() {
        let ops = layout_main(if_else(int(1), int(2), int(3)));
        assert_eq!(
            ops,
            vec![
                Op::PushInt(1),
                Op::JumpIfFalse(3),
                Op::PushInt(2),
                Op::Jump(2),
                Op::PushInt(3),
            ]
        );
    }

    #[test]
    fn test_if_without_else_layout() {
        let ops = layout_main(seq(vec![if_then(int(0), pop(int(5))), int(9)]));
        assert_eq!(
            ops,
            vec![
                Op::PushInt(0),
                Op::JumpIfFalse(3),
                Op::PushInt(5),
                Op::Pop,
                Op::PushInt(9),
            ]
        );
    }

    #[test]
    fn test_switch_layout() {
        let mut g = BlockGraph::new();
        let selector = g.add_block(vec![Op::PushInt(1)]);
        let a = g.add_block(vec![Op::PushInt(10)]);
        let b = g.add_block(vec![Op::PushInt(20)]);
        let fallback = g.add_block(vec![Op::PushInt(30)]);
        g.branch(selector, vec![a, b, fallback]).unwrap();
        g.terminate(a);
        g.terminate(b);

        let ops = lay_out(&g, selector).unwrap();
        assert_eq!(
            ops,
            vec![
                Op::PushInt(1),
                Op::Switch(vec![2, 3]),
                Op::Jump(3),
                Op::PushInt(10),
                Op::PushInt(20),
                Op::PushInt(30),
            ]
        );
    }

    #[test]
    fn test_assemble_one_code_object_per_subroutine() {
        let mut compiler = Compiler::new();
        let one = compiler.subroutine("one", vec![], crate::ValueType::Uint64, |_, _, _| {
            Ok(int(1))
        });
        let root = add(one.call(vec![]).unwrap(), one.call(vec![]).unwrap());

        let program = compiler.compile(&root).unwrap().assemble().unwrap();

        assert_eq!(program.code.len(), 2);
        assert_eq!(program.code[0].name, "main");
        let body = program.subroutine(one.id()).unwrap();
        assert_eq!(body.name, "one");
        assert_eq!(body.ops, vec![Op::PushInt(1), Op::RetSub]);
    }
}
