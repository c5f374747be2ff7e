//! The control-flow graph of a set of blocks.

use crate::arch::Arch;
use crate::containers::unordered::UnorderedMap;
use crate::function::{BlockLabel, FnBlock, Function};
use crate::il::IrError;
use crate::log::*;

/// A node of a control-flow graph
pub trait CfgNode {
    fn label(&self) -> BlockLabel;
    /// Number of bytes of machine code covered by the node
    fn size(&self) -> u64;
    /// Labels of successor nodes, once per edge
    fn successors(&self) -> Vec<BlockLabel>;
}

impl<A: Arch> CfgNode for FnBlock<A> {
    fn label(&self) -> BlockLabel {
        self.label
    }
    fn size(&self) -> u64 {
        self.size
    }
    fn successors(&self) -> Vec<BlockLabel> {
        self.term.successors()
    }
}

/// An immutable, label-indexed view of a set of blocks with precomputed predecessor edges.
///
/// Guarantees that labels are unique, that the address ranges `[label, label + size)` of the
/// blocks do not overlap, and that every successor exists.
pub struct BlockMap<'a, B: CfgNode> {
    /// Blocks, ordered by address
    blocks: Vec<&'a B>,
    index: UnorderedMap<BlockLabel, usize>,
    preds: UnorderedMap<BlockLabel, Vec<BlockLabel>>,
}

impl<'a, B: CfgNode> BlockMap<'a, B> {
    pub fn new(blocks: impl IntoIterator<Item = &'a B>) -> Result<Self, IrError> {
        let mut blocks: Vec<&'a B> = blocks.into_iter().collect();
        blocks.sort_by_key(|b| b.label());

        let mut index: UnorderedMap<BlockLabel, usize> = Default::default();
        for (i, b) in blocks.iter().enumerate() {
            if index.insert(b.label(), i).is_some() {
                return Err(IrError::DuplicateBlock(b.label()));
            }
        }
        for w in blocks.windows(2) {
            let (prev, next) = (w[0], w[1]);
            if prev.label().0.saturating_add(prev.size()) > next.label().0 {
                return Err(IrError::OverlappingBlocks(prev.label(), next.label()));
            }
        }

        let mut preds: UnorderedMap<BlockLabel, Vec<BlockLabel>> = Default::default();
        for b in &blocks {
            preds.entry(b.label()).or_default();
        }
        for b in &blocks {
            for s in b.successors() {
                match preds.get_mut(&s) {
                    Some(ps) => ps.push(b.label()),
                    None => return Err(IrError::BlockNotFound(s)),
                }
            }
        }

        trace!("Built block map"; "blocks" => blocks.len());
        Ok(Self {
            blocks,
            index,
            preds,
        })
    }

    pub fn get(&self, label: BlockLabel) -> Result<&'a B, IrError> {
        self.index
            .get(&label)
            .map(|&i| self.blocks[i])
            .ok_or(IrError::BlockNotFound(label))
    }

    pub fn contains(&self, label: BlockLabel) -> bool {
        self.index.contains_key(&label)
    }

    /// All blocks, ordered by address
    pub fn iter(&self) -> impl Iterator<Item = &'a B> + '_ {
        self.blocks.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn successors(&self, label: BlockLabel) -> Result<Vec<BlockLabel>, IrError> {
        Ok(self.get(label)?.successors())
    }

    /// Predecessors of a block, in address order, once per edge
    pub fn predecessors(&self, label: BlockLabel) -> Result<&[BlockLabel], IrError> {
        self.preds
            .get(&label)
            .map(|v| v.as_slice())
            .ok_or(IrError::BlockNotFound(label))
    }

    /// Blocks reachable from `entry`, in reverse postorder
    pub fn reverse_postorder(&self, entry: BlockLabel) -> Result<Vec<BlockLabel>, IrError> {
        self.get(entry)?;
        let mut visited: UnorderedMap<BlockLabel, ()> = Default::default();
        let mut postorder = vec![];
        let mut stack: Vec<(BlockLabel, Vec<BlockLabel>)> = vec![];
        visited.insert(entry, ());
        stack.push((entry, self.successors(entry)?.into_iter().rev().collect()));
        while let Some((label, pending)) = stack.last_mut() {
            match pending.pop() {
                Some(s) => {
                    if visited.insert(s, ()).is_none() {
                        let succs = self.successors(s)?.into_iter().rev().collect();
                        stack.push((s, succs));
                    }
                }
                None => {
                    postorder.push(*label);
                    stack.pop();
                }
            }
        }
        postorder.reverse();
        Ok(postorder)
    }

    /// Blocks not reachable from `entry`, in address order
    pub fn unreachable_labels(&self, entry: BlockLabel) -> Result<Vec<BlockLabel>, IrError> {
        let reachable = self.reverse_postorder(entry)?;
        Ok(self
            .blocks
            .iter()
            .map(|b| b.label())
            .filter(|l| !reachable.contains(l))
            .collect())
    }

    /// The block whose address range contains `addr`
    pub fn block_containing(&self, addr: u64) -> Option<&'a B> {
        let i = self.blocks.partition_point(|b| b.label().0 <= addr);
        let b = *self.blocks.get(i.checked_sub(1)?)?;
        if addr < b.label().0 + b.size() {
            Some(b)
        } else {
            None
        }
    }

    /// Maximal address ranges `[start, end)` covered by consecutive abutting blocks
    pub fn contiguous_ranges(&self) -> Vec<(u64, u64)> {
        let mut res: Vec<(u64, u64)> = vec![];
        for b in &self.blocks {
            let (start, end) = (b.label().0, b.label().0 + b.size());
            match res.last_mut() {
                Some((_, prev_end)) if *prev_end == start => *prev_end = end,
                _ => res.push((start, end)),
            }
        }
        res
    }

    /// Write a `.dot` rendering of the graph; edges are labeled by their successor index
    pub fn write_dot<W: std::io::Write>(&self, w: &mut W) -> std::io::Result<()> {
        type Node = BlockLabel;
        type Edge = (BlockLabel, BlockLabel, usize);

        struct Graph<'g, 'a, B: CfgNode> {
            map: &'g BlockMap<'a, B>,
        }

        impl<'g, 'a, B: CfgNode> dot::Labeller<'g, Node, Edge> for Graph<'g, 'a, B> {
            fn graph_id(&'g self) -> dot::Id<'g> {
                dot::Id::new("cfg").unwrap()
            }
            fn node_id(&'g self, n: &Node) -> dot::Id<'g> {
                dot::Id::new(n.to_string()).unwrap()
            }
            fn node_label<'b>(&'b self, n: &Node) -> dot::LabelText<'b> {
                let size = self.map.get(*n).map(|b| b.size()).unwrap_or(0);
                dot::LabelText::label(format!("{:#x}..{:#x}", n.0, n.0 + size))
            }
            fn node_shape(&'g self, _n: &Node) -> Option<dot::LabelText<'g>> {
                Some(dot::LabelText::label("box"))
            }
            fn edge_label<'b>(&'b self, e: &Edge) -> dot::LabelText<'b> {
                dot::LabelText::label(e.2.to_string())
            }
        }

        impl<'g, 'a, B: CfgNode> dot::GraphWalk<'g, Node, Edge> for Graph<'g, 'a, B> {
            fn nodes(&self) -> dot::Nodes<'g, Node> {
                self.map
                    .blocks
                    .iter()
                    .map(|b| b.label())
                    .collect::<Vec<_>>()
                    .into()
            }
            fn edges(&'g self) -> dot::Edges<'g, Edge> {
                self.map
                    .blocks
                    .iter()
                    .flat_map(|b| {
                        b.successors()
                            .into_iter()
                            .enumerate()
                            .map(move |(i, s)| (b.label(), s, i))
                    })
                    .collect::<Vec<_>>()
                    .into()
            }
            fn source(&self, e: &Edge) -> Node {
                e.0
            }
            fn target(&self, e: &Edge) -> Node {
                e.1
            }
        }

        dot::render(&Graph { map: self }, w)
    }

    /// Generate a `.dot` rendering of the graph
    pub fn generate_dot(&self) -> String {
        let mut s: Vec<u8> = vec![];
        self.write_dot(&mut s)
            .expect("Writing to a Vec cannot fail");
        String::from_utf8_lossy(&s).into_owned()
    }
}

impl<A: Arch> Function<A> {
    /// The control-flow graph of the function
    pub fn block_map(&self) -> Result<BlockMap<'_, FnBlock<A>>, IrError> {
        BlockMap::new(self.blocks.iter())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct N {
        label: u64,
        size: u64,
        succs: Vec<u64>,
    }

    impl CfgNode for N {
        fn label(&self) -> BlockLabel {
            BlockLabel(self.label)
        }
        fn size(&self) -> u64 {
            self.size
        }
        fn successors(&self) -> Vec<BlockLabel> {
            self.succs.iter().map(|&s| BlockLabel(s)).collect()
        }
    }

    fn n(label: u64, size: u64, succs: &[u64]) -> N {
        N {
            label,
            size,
            succs: succs.to_vec(),
        }
    }

    #[test]
    fn predecessors_and_orders() {
        // 0 -> {4, 8}; 4 -> 8; 8 -> 8 (loop); 16 unreachable
        let nodes = vec![
            n(8, 4, &[8]),
            n(0, 4, &[4, 8]),
            n(4, 4, &[8]),
            n(16, 2, &[]),
        ];
        let map = BlockMap::new(nodes.iter()).unwrap();
        assert_eq!(
            map.predecessors(BlockLabel(8)).unwrap(),
            &[BlockLabel(0), BlockLabel(4), BlockLabel(8)]
        );
        assert!(map.predecessors(BlockLabel(0)).unwrap().is_empty());
        assert_eq!(
            map.reverse_postorder(BlockLabel(0)).unwrap(),
            vec![BlockLabel(0), BlockLabel(4), BlockLabel(8)]
        );
        assert_eq!(
            map.unreachable_labels(BlockLabel(0)).unwrap(),
            vec![BlockLabel(16)]
        );
        assert_eq!(map.contiguous_ranges(), vec![(0, 12), (16, 18)]);
        assert_eq!(map.block_containing(5).map(|b| b.label), Some(4));
        assert!(map.block_containing(12).is_none());
        assert_eq!(
            map.get(BlockLabel(3)).err(),
            Some(IrError::BlockNotFound(BlockLabel(3)))
        );
    }

    #[test]
    fn malformed_maps_are_rejected() {
        let overlapping = vec![n(0, 8, &[]), n(4, 4, &[])];
        assert_eq!(
            BlockMap::new(overlapping.iter()).err(),
            Some(IrError::OverlappingBlocks(BlockLabel(0), BlockLabel(4)))
        );
        let dup = vec![n(0, 0, &[]), n(0, 0, &[])];
        assert_eq!(
            BlockMap::new(dup.iter()).err(),
            Some(IrError::DuplicateBlock(BlockLabel(0)))
        );
        let dangling = vec![n(0, 4, &[4])];
        assert_eq!(
            BlockMap::new(dangling.iter()).err(),
            Some(IrError::BlockNotFound(BlockLabel(4)))
        );
    }

    #[test]
    fn dot_output_lists_every_edge() {
        let nodes = vec![n(0, 4, &[4, 4]), n(4, 4, &[])];
        let dot = BlockMap::new(nodes.iter()).unwrap().generate_dot();
        assert!(dot.starts_with("digraph cfg {"));
        assert_eq!(dot.matches("block_0 -> block_4").count(), 2);
    }
}
