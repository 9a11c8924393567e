use std::collections::HashSet;

use log::trace;

use crate::bytecode::compile_error::CompileError;
use crate::bytecode::op::Op;

// =============================================================================
// Blocks
// =============================================================================

/// Index of a block in its [`BlockGraph`].
///
/// Blocks are compared by identity: two blocks holding the same ops are still
/// two distinct control-flow nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub usize);

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "block#{}", self.0)
    }
}

/// Where control goes after a block's ops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    /// Not linked yet. The block is the end of its fragment.
    Open,

    /// Unconditional successor.
    Next(BlockId),

    /// Pops a value and picks a target. With two targets: nonzero takes the
    /// first, zero the second. With more: the value indexes the targets and
    /// anything out of range takes the last one.
    Branch(Vec<BlockId>),

    /// The last op never falls through (`return`, `retsub`, `err`).
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub ops: Vec<Op>,
    pub exit: Exit,
}

impl Block {
    pub fn successors(&self) -> &[BlockId] {
        match &self.exit {
            Exit::Next(id) => std::slice::from_ref(id),
            Exit::Branch(targets) => targets,
            Exit::Open | Exit::Terminal => &[],
        }
    }
}

/// A lowered expression: one entry block and, unless control never falls
/// through, the block the next fragment should be linked after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    pub entry: BlockId,
    pub exit: Option<BlockId>,
}

// =============================================================================
// Graph & linking algebra
// =============================================================================

/// Arena holding every block created during one compilation.
#[derive(Debug, Clone, Default)]
pub struct BlockGraph {
    blocks: Vec<Block>,
}

impl BlockGraph {
    pub fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    pub fn add_block(&mut self, ops: Vec<Op>) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(Block {
            ops,
            exit: Exit::Open,
        });
        id
    }

    /// A fragment of one block holding `ops`, linkable after.
    pub fn fragment(&mut self, ops: Vec<Op>) -> Fragment {
        let id = self.add_block(ops);
        Fragment {
            entry: id,
            exit: Some(id),
        }
    }

    /// Point the open end `from` at `to`.
    pub fn link(&mut self, from: BlockId, to: BlockId) -> Result<(), CompileError> {
        let block = &mut self.blocks[from.0];
        if block.exit != Exit::Open {
            return Err(CompileError::structure(format!(
                "{} is already linked ({:?})",
                from, block.exit
            )));
        }
        block.exit = Exit::Next(to);
        trace!("link {} -> {}", from, to);
        Ok(())
    }

    /// Make the open end `from` a branch over `targets`.
    pub fn branch(&mut self, from: BlockId, targets: Vec<BlockId>) -> Result<(), CompileError> {
        if targets.len() < 2 {
            return Err(CompileError::structure(format!(
                "a branch needs at least two targets, got {}",
                targets.len()
            )));
        }

        let block = &mut self.blocks[from.0];
        if block.exit != Exit::Open {
            return Err(CompileError::structure(format!(
                "{} is already linked ({:?})",
                from, block.exit
            )));
        }
        trace!("branch {} -> {:?}", from, targets);
        block.exit = Exit::Branch(targets);
        Ok(())
    }

    /// Run `first`, then `second`.
    pub fn seq(&mut self, first: Fragment, second: Fragment) -> Result<Fragment, CompileError> {
        let end = first.exit.ok_or_else(|| CompileError::no_exit("seq"))?;
        self.link(end, second.entry)?;
        Ok(Fragment {
            entry: first.entry,
            exit: second.exit,
        })
    }

    /// Run `children` in order, then `op`.
    ///
    /// The entry is the first child's entry, or the op's own block when there
    /// are no children. If `op` never falls through, the fragment has no exit.
    pub fn with_op(&mut self, op: Op, children: Vec<Fragment>) -> Result<Fragment, CompileError> {
        let terminal = op.is_terminal();
        let own = self.add_block(vec![op]);

        let mut entry = None;
        let mut end: Option<BlockId> = None;

        for child in children {
            match (entry, end) {
                (None, _) => entry = Some(child.entry),
                (Some(_), Some(prev)) => self.link(prev, child.entry)?,
                (Some(_), None) => return Err(CompileError::no_exit("argument list")),
            }
            end = child.exit;
        }

        match (entry, end) {
            (None, _) => {}
            (Some(_), Some(prev)) => self.link(prev, own)?,
            (Some(_), None) => return Err(CompileError::no_exit("argument list")),
        }

        if terminal {
            self.blocks[own.0].exit = Exit::Terminal;
        }

        Ok(Fragment {
            entry: entry.unwrap_or(own),
            exit: if terminal { None } else { Some(own) },
        })
    }

    /// Mark an open end as never falling through.
    pub fn terminate(&mut self, id: BlockId) {
        if self.blocks[id.0].exit == Exit::Open {
            self.blocks[id.0].exit = Exit::Terminal;
        }
    }

    /// Blocks reachable from `entry` in reverse postorder, each visited once.
    ///
    /// Successors are explored last to first, so a branch's first target
    /// comes right after the branch and a join comes after every arm.
    pub fn reachable(&self, entry: BlockId) -> Vec<BlockId> {
        let mut seen = HashSet::from([entry]);
        let mut post = Vec::new();
        let mut stack = vec![(entry, 0usize)];

        while let Some((id, i)) = stack.pop() {
            let successors = self.block(id).successors();
            if i < successors.len() {
                stack.push((id, i + 1));
                let next = successors[successors.len() - 1 - i];
                if seen.insert(next) {
                    stack.push((next, 0));
                }
            } else {
                post.push(id);
            }
        }

        post.reverse();
        post
    }

    /// All ops reachable from `entry`, in traversal order. For inspection only;
    /// the result carries no control flow.
    pub fn flatten(&self, entry: BlockId) -> Vec<Op> {
        self.reachable(entry)
            .into_iter()
            .flat_map(|id| self.block(id).ops.iter().cloned())
            .collect()
    }
}
