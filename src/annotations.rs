//! Memory-access classification, telling the verification backend which memory model each
//! access must be checked against.

use crate::containers::unordered::UnorderedMap;

/// The kind of memory touched by the access at an instruction
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum MemoryAccessKind {
    /// Memory only the binary can observe (e.g., its own spill slots)
    BinaryOnly,
    /// A stack allocation shared with the source program, identified by name
    JointStack(String),
    /// Heap memory
    Heap,
}

impl std::fmt::Display for MemoryAccessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            MemoryAccessKind::BinaryOnly => write!(f, "binary_only"),
            MemoryAccessKind::JointStack(a) => write!(f, "joint_stack({})", a),
            MemoryAccessKind::Heap => write!(f, "heap"),
        }
    }
}

/// Maps instruction addresses to the kind of their (single) memory access
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryClassifier {
    kinds: UnorderedMap<u64, MemoryAccessKind>,
}

impl MemoryClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify the access at `addr`, returning the previous classification, if any
    pub fn insert(&mut self, addr: u64, kind: MemoryAccessKind) -> Option<MemoryAccessKind> {
        self.kinds.insert(addr, kind)
    }

    pub fn classify(&self, addr: u64) -> Option<&MemoryAccessKind> {
        self.kinds.get(&addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &MemoryAccessKind)> {
        self.kinds.iter().map(|(a, k)| (*a, k))
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// The classifications for addresses in `[start, end)`
    pub fn restricted_to(&self, start: u64, end: u64) -> Self {
        self.iter()
            .filter(|(a, _)| start <= *a && *a < end)
            .map(|(a, k)| (a, k.clone()))
            .collect()
    }
}

impl FromIterator<(u64, MemoryAccessKind)> for MemoryClassifier {
    fn from_iter<T: IntoIterator<Item = (u64, MemoryAccessKind)>>(iter: T) -> Self {
        Self {
            kinds: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn restriction_keeps_only_the_range() {
        let c: MemoryClassifier = vec![
            (0x10, MemoryAccessKind::Heap),
            (0x14, MemoryAccessKind::JointStack("buf".into())),
            (0x20, MemoryAccessKind::BinaryOnly),
        ]
        .into_iter()
        .collect();
        let r = c.restricted_to(0x10, 0x20);
        assert_eq!(r.len(), 2);
        assert_eq!(
            r.classify(0x14),
            Some(&MemoryAccessKind::JointStack("buf".into()))
        );
        assert_eq!(r.classify(0x20), None);
        assert_eq!(c.classify(0x20), Some(&MemoryAccessKind::BinaryOnly));
    }
}
