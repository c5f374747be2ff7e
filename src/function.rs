//! Blocks and functions of the IL.
//!
//! Two block forms exist. A [`MachineBlock`] is a straight-line sequence recovered from a run of
//! machine instructions, ending in a [`BlockTerm`] that describes the machine state handed to
//! the next block; it is the unit of verification-condition generation. A [`FnBlock`] is a block
//! of a recovered [`Function`]: it may start with phi bindings and ends in a [`FnTermStmt`]
//! naming its successors; it is the unit of target IR generation.

use crate::arch::Arch;
use crate::containers::unordered::{UnorderedMap, UnorderedSet};
use crate::il::{AssignId, IrError, PhiVar, Stmt, Value};
use crate::types::FunctionType;
use itertools::Itertools;

/// Label of a block; the address of its first instruction
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BlockLabel(pub u64);

impl std::fmt::Display for BlockLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "block_{:x}", self.0)
    }
}

/// The value a register has when leaving a function block
#[derive(Clone, Debug, PartialEq)]
pub enum FnRegValue<A: Arch> {
    /// The register still holds the value it had on entry to the function
    CalleeSaved(A::Reg),
    /// The register holds the given value
    Value(Value<A>),
}

/// Binds a phi variable to the value of `reg` on exit from each predecessor
#[derive(Clone, Debug, PartialEq)]
pub struct PhiBinding<A: Arch> {
    pub var: PhiVar,
    pub reg: A::Reg,
}

/// Terminator of a function block
#[derive(Clone, Debug, PartialEq)]
pub enum FnTermStmt<A: Arch> {
    /// Continue at the given block
    Jump(BlockLabel),
    /// Continue at `then_label` if `cond` holds, at `else_label` otherwise
    Branch {
        cond: Value<A>,
        then_label: BlockLabel,
        else_label: BlockLabel,
    },
    /// Continue at `targets[index]`. An out-of-range index is impossible in the recovered
    /// program.
    LookupTable {
        index: Value<A>,
        targets: Vec<BlockLabel>,
    },
    /// Return from the function. Slot `i` holds the value of return type `i`, or `None` if the
    /// function leaves it unspecified.
    Ret(Vec<Option<Value<A>>>),
    /// Call `dest` and return whatever it returns
    TailCall {
        dest: Value<A>,
        fn_type: FunctionType,
        args: Vec<Value<A>>,
    },
}

impl<A: Arch> FnTermStmt<A> {
    /// Blocks control may flow to, in order. A label appears once per edge.
    pub fn successors(&self) -> Vec<BlockLabel> {
        match self {
            FnTermStmt::Jump(l) => vec![*l],
            FnTermStmt::Branch {
                then_label,
                else_label,
                ..
            } => vec![*then_label, *else_label],
            FnTermStmt::LookupTable { targets, .. } => targets.clone(),
            FnTermStmt::Ret(_) | FnTermStmt::TailCall { .. } => vec![],
        }
    }

    /// Values read by the terminator
    pub fn operands(&self) -> Vec<&Value<A>> {
        match self {
            FnTermStmt::Jump(_) => vec![],
            FnTermStmt::Branch { cond, .. } => vec![cond],
            FnTermStmt::LookupTable { index, .. } => vec![index],
            FnTermStmt::Ret(vs) => vs.iter().flatten().collect(),
            FnTermStmt::TailCall { dest, args, .. } => {
                std::iter::once(dest).chain(args.iter()).collect()
            }
        }
    }
}

impl<A: Arch> std::fmt::Display for FnTermStmt<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FnTermStmt::Jump(l) => write!(f, "jump {}", l),
            FnTermStmt::Branch {
                cond,
                then_label,
                else_label,
            } => write!(f, "branch {} {} {}", cond, then_label, else_label),
            FnTermStmt::LookupTable { index, targets } => {
                write!(f, "lookup {} [{}]", index, targets.iter().join(", "))
            }
            FnTermStmt::Ret(vs) => write!(
                f,
                "ret ({})",
                vs.iter()
                    .map(|v| match v {
                        Some(v) => v.to_string(),
                        None => "_".into(),
                    })
                    .join(", ")
            ),
            FnTermStmt::TailCall { dest, args, .. } => {
                write!(f, "tail_call {}({})", dest, args.iter().join(", "))
            }
        }
    }
}

/// A block of a recovered function
#[derive(Clone, Debug)]
pub struct FnBlock<A: Arch> {
    pub label: BlockLabel,
    /// Number of bytes of machine code covered by the block
    pub size: u64,
    pub phis: Vec<PhiBinding<A>>,
    pub stmts: Vec<Stmt<A>>,
    pub term: FnTermStmt<A>,
    /// Values of registers on exit; consulted by the phis of successor blocks
    pub exit_regs: UnorderedMap<A::Reg, FnRegValue<A>>,
}

/// A recovered function
#[derive(Clone, Debug)]
pub struct Function<A: Arch> {
    pub name: String,
    pub addr: u64,
    pub fn_type: FunctionType,
    pub entry: BlockLabel,
    pub blocks: Vec<FnBlock<A>>,
}

impl<A: Arch> Function<A> {
    /// The block with label `label`
    pub fn block(&self, label: BlockLabel) -> Result<&FnBlock<A>, IrError> {
        self.blocks
            .iter()
            .find(|b| b.label == label)
            .ok_or(IrError::BlockNotFound(label))
    }

    /// Check structural well-formedness: labels and definitions are unique, the entry block
    /// exists and has no phis, and every jump target exists.
    pub fn validate(&self) -> Result<(), IrError> {
        let mut labels: UnorderedSet<BlockLabel> = Default::default();
        for b in &self.blocks {
            if !labels.insert(b.label) {
                return Err(IrError::DuplicateBlock(b.label));
            }
        }
        if !self.block(self.entry)?.phis.is_empty() {
            return Err(IrError::PhiInEntryBlock(self.entry));
        }

        let mut defined: UnorderedSet<AssignId> = Default::default();
        let mut define = |id: AssignId| {
            if defined.insert(id) {
                Ok(())
            } else {
                Err(IrError::DuplicateAssignment(id))
            }
        };
        for b in &self.blocks {
            for p in &b.phis {
                define(p.var.id)?;
            }
            for s in &b.stmts {
                match s {
                    Stmt::Assign(a) => define(a.id())?,
                    Stmt::Call(c) => {
                        for r in &c.returns {
                            define(r.id)?;
                        }
                    }
                    _ => {}
                }
            }
            for succ in b.term.successors() {
                if !labels.contains(&succ) {
                    return Err(IrError::BlockNotFound(succ));
                }
            }
        }
        Ok(())
    }
}

impl<A: Arch> std::fmt::Display for Function<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "function {} @ {:#x} : {}", self.name, self.addr, self.fn_type)?;
        for b in &self.blocks {
            writeln!(f, "  {}:", b.label)?;
            for p in &b.phis {
                writeln!(f, "    {} := phi %{}", p.var.id, p.reg)?;
            }
            for s in &b.stmts {
                writeln!(f, "    {}", s)?;
            }
            writeln!(f, "    {}", b.term)?;
        }
        Ok(())
    }
}

/// How a machine block hands over control
#[derive(Clone, Debug)]
pub enum BlockTerm<A: Arch> {
    /// Continue execution from the given register state
    FetchAndExecute(UnorderedMap<A::Reg, Value<A>>),
    /// The instruction at the end of the block could not be translated
    TranslateError {
        regs: UnorderedMap<A::Reg, Value<A>>,
        message: String,
    },
    /// An architecture-specific terminator
    Arch {
        stmt: A::TermStmt,
        regs: UnorderedMap<A::Reg, Value<A>>,
    },
}

impl<A: Arch> BlockTerm<A> {
    /// The register state at the end of the block
    pub fn regs(&self) -> &UnorderedMap<A::Reg, Value<A>> {
        match self {
            BlockTerm::FetchAndExecute(regs)
            | BlockTerm::TranslateError { regs, .. }
            | BlockTerm::Arch { regs, .. } => regs,
        }
    }
}

/// A block of straight-line code recovered from consecutive machine instructions
#[derive(Clone, Debug)]
pub struct MachineBlock<A: Arch> {
    pub addr: u64,
    /// Number of bytes of machine code covered by the block
    pub size: u64,
    pub stmts: Vec<Stmt<A>>,
    pub term: BlockTerm<A>,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::il::IdGen;
    use crate::types::TypeRepr;
    use crate::x86_64::{X86Reg, X86_64};

    fn block(label: u64, term: FnTermStmt<X86_64>) -> FnBlock<X86_64> {
        FnBlock {
            label: BlockLabel(label),
            size: 4,
            phis: vec![],
            stmts: vec![],
            term,
            exit_regs: Default::default(),
        }
    }

    fn function(blocks: Vec<FnBlock<X86_64>>) -> Function<X86_64> {
        Function {
            name: "f".into(),
            addr: 0x10,
            fn_type: FunctionType::default(),
            entry: BlockLabel(0x10),
            blocks,
        }
    }

    #[test]
    fn structural_checks() {
        let ok = function(vec![
            block(0x10, FnTermStmt::Jump(BlockLabel(0x14))),
            block(0x14, FnTermStmt::Ret(vec![])),
        ]);
        ok.validate().unwrap();

        let missing = function(vec![block(0x10, FnTermStmt::Jump(BlockLabel(0x20)))]);
        assert_eq!(
            missing.validate().unwrap_err(),
            IrError::BlockNotFound(BlockLabel(0x20))
        );

        let dup = function(vec![
            block(0x10, FnTermStmt::Ret(vec![])),
            block(0x10, FnTermStmt::Ret(vec![])),
        ]);
        assert_eq!(
            dup.validate().unwrap_err(),
            IrError::DuplicateBlock(BlockLabel(0x10))
        );

        let mut ids = IdGen::default();
        let mut entry = block(0x10, FnTermStmt::Ret(vec![]));
        entry.phis.push(PhiBinding {
            var: ids.phi_var(TypeRepr::BV(64)),
            reg: X86Reg::RAX,
        });
        assert_eq!(
            function(vec![entry]).validate().unwrap_err(),
            IrError::PhiInEntryBlock(BlockLabel(0x10))
        );
    }

    #[test]
    fn lookup_table_edges_are_kept_per_target() {
        let t: FnTermStmt<X86_64> = FnTermStmt::LookupTable {
            index: Value::bv(64, 0),
            targets: vec![BlockLabel(1), BlockLabel(2), BlockLabel(1)],
        };
        assert_eq!(
            t.successors(),
            vec![BlockLabel(1), BlockLabel(2), BlockLabel(1)]
        );
        assert_eq!(t.to_string(), "lookup 0x0 [block_1, block_2, block_1]");
    }
}
