//! Traversals over the value DAG.
//!
//! Values share assignments, so a naive recursive walk can revisit the same assignment an
//! exponential number of times. The traversals here visit each assignment at most once.

use crate::arch::Arch;
use crate::containers::unordered::UnorderedMap;
use crate::containers::InsertionOrderedSet;
use crate::il::{AssignId, AssignRhs, Assignment, Stmt, Value};
use std::sync::Arc;

/// The values directly read by a right-hand side
pub fn rhs_operands<A: Arch>(rhs: &AssignRhs<A>) -> Vec<&Value<A>> {
    match rhs {
        AssignRhs::EvalApp(app) => app.operands(),
        AssignRhs::SetUndefined(_) => vec![],
        AssignRhs::ReadMem { addr, .. } => vec![addr],
        AssignRhs::CondReadMem {
            cond,
            addr,
            default,
            ..
        } => vec![cond, addr, default],
        AssignRhs::EvalArchFn(f) => A::fn_operands(f),
    }
}

/// The values directly read by a statement. An assignment statement reads the operands of its
/// right-hand side.
pub fn stmt_operands<A: Arch>(stmt: &Stmt<A>) -> Vec<&Value<A>> {
    match stmt {
        Stmt::Assign(a) => rhs_operands(a.rhs()),
        Stmt::WriteMem { addr, value, .. } => vec![addr, value],
        Stmt::CondWriteMem {
            cond, addr, value, ..
        } => vec![cond, addr, value],
        Stmt::Call(c) => std::iter::once(&c.dest).chain(c.args.iter()).collect(),
        Stmt::Arch(s) => A::stmt_operands(s),
        Stmt::Comment(_) | Stmt::InstructionStart { .. } => vec![],
    }
}

/// Extend `acc` with every assignment identifier reachable from `v`, in post-order (operands
/// before the assignments that use them). Each shared assignment is visited once.
fn collect_value<A: Arch>(acc: &mut InsertionOrderedSet<AssignId>, v: &Value<A>) {
    // Explicit stack: values can be deep chains
    let mut stack: Vec<(&Arc<Assignment<A>>, bool)> = match v {
        Value::Assigned(a) => vec![(a, false)],
        _ => return,
    };
    while let Some((a, expanded)) = stack.pop() {
        if acc.contains(&a.id()) {
            continue;
        }
        if expanded {
            acc.insert(a.id());
            continue;
        }
        stack.push((a, true));
        for op in rhs_operands(a.rhs()).into_iter().rev() {
            if let Value::Assigned(inner) = op {
                if !acc.contains(&inner.id()) {
                    stack.push((inner, false));
                }
            }
        }
    }
}

/// Identifiers of all assignments reachable from `v`, including `v` itself if it is assigned
pub fn value_assign_ids<A: Arch>(v: &Value<A>) -> InsertionOrderedSet<AssignId> {
    let mut acc = InsertionOrderedSet::new();
    collect_value(&mut acc, v);
    acc
}

/// Identifiers of all assignments reachable from the operands of `rhs`
pub fn rhs_assign_ids<A: Arch>(rhs: &AssignRhs<A>) -> InsertionOrderedSet<AssignId> {
    let mut acc = InsertionOrderedSet::new();
    for op in rhs_operands(rhs) {
        collect_value(&mut acc, op);
    }
    acc
}

/// Identifiers of all assignments reachable from a statement; an assignment statement includes
/// its own identifier last.
pub fn stmt_assign_ids<A: Arch>(stmt: &Stmt<A>) -> InsertionOrderedSet<AssignId> {
    let mut acc = InsertionOrderedSet::new();
    for op in stmt_operands(stmt) {
        collect_value(&mut acc, op);
    }
    if let Stmt::Assign(a) = stmt {
        acc.insert(a.id());
    }
    acc
}

/// A bottom-up computation over values.
///
/// Used with [`fold_value_cached`], [`Self::assignment`] is called at most once per assignment
/// identifier, with the results for its operands in [`rhs_operands`] order.
pub trait ValueFold<A: Arch> {
    type Output: Clone;

    /// Result for a value that is not an assignment
    fn leaf(&mut self, v: &Value<A>) -> Self::Output;

    /// Result for an assignment, given the results for its operands
    fn assignment(&mut self, a: &Assignment<A>, operands: Vec<Self::Output>) -> Self::Output;
}

/// Memoized results of a [`ValueFold`], keyed by assignment identifier
pub struct FoldCache<R> {
    results: UnorderedMap<AssignId, R>,
}

impl<R> Default for FoldCache<R> {
    fn default() -> Self {
        Self {
            results: Default::default(),
        }
    }
}

impl<R> FoldCache<R> {
    pub fn get(&self, id: AssignId) -> Option<&R> {
        self.results.get(&id)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Fold `v` bottom-up, reusing (and extending) `cache` so that each assignment is folded once
/// across calls sharing the cache.
pub fn fold_value_cached<A: Arch, F: ValueFold<A>>(
    folder: &mut F,
    cache: &mut FoldCache<F::Output>,
    v: &Value<A>,
) -> F::Output {
    let root = match v {
        Value::Assigned(a) => a,
        _ => return folder.leaf(v),
    };
    let mut stack: Vec<(&Arc<Assignment<A>>, bool)> = vec![(root, false)];
    while let Some((a, expanded)) = stack.pop() {
        if cache.results.contains_key(&a.id()) {
            continue;
        }
        let ops = rhs_operands(a.rhs());
        if !expanded {
            stack.push((a, true));
            for op in ops.into_iter().rev() {
                if let Value::Assigned(inner) = op {
                    if !cache.results.contains_key(&inner.id()) {
                        stack.push((inner, false));
                    }
                }
            }
            continue;
        }
        let args = ops
            .into_iter()
            .map(|op| match op {
                Value::Assigned(inner) => cache.results[&inner.id()].clone(),
                _ => folder.leaf(op),
            })
            .collect();
        let r = folder.assignment(a, args);
        cache.results.insert(a.id(), r);
    }
    cache.results[&root.id()].clone()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::app::App;
    use crate::il::IdGen;
    use crate::types::TypeRepr;
    use crate::x86_64::X86_64;

    /// Counts visits, and computes the number of leaves under each value (with sharing)
    struct CountingFold {
        visits: UnorderedMap<AssignId, usize>,
    }

    impl ValueFold<X86_64> for CountingFold {
        type Output = u64;

        fn leaf(&mut self, _v: &Value<X86_64>) -> u64 {
            1
        }

        fn assignment(&mut self, a: &Assignment<X86_64>, operands: Vec<u64>) -> u64 {
            *self.visits.entry(a.id()).or_insert(0) += 1;
            operands.into_iter().sum::<u64>().max(1)
        }
    }

    #[test]
    fn shared_assignments_fold_once() {
        // x := undef; y := x + x; z := y + y ... a chain of diamonds
        let mut ids = IdGen::default();
        let x = Value::Assigned(
            ids.assign::<X86_64>(AssignRhs::SetUndefined(TypeRepr::BV(64)))
                .unwrap(),
        );
        let mut top = x.clone();
        for _ in 0..40 {
            let (_, v) = ids
                .app(App::BVAdd(64, top.clone(), top.clone()))
                .unwrap();
            top = v;
        }

        let mut folder = CountingFold {
            visits: Default::default(),
        };
        let mut cache = FoldCache::default();
        let leaves = fold_value_cached(&mut folder, &mut cache, &top);
        assert_eq!(leaves, 1 << 40);
        assert_eq!(cache.len(), 41);
        assert!(folder.visits.values().all(|&n| n == 1));

        // A second fold sharing the cache does no further work
        let again = fold_value_cached(&mut folder, &mut cache, &x);
        assert_eq!(again, 1);
        assert!(folder.visits.values().all(|&n| n == 1));
    }

    #[test]
    fn reachable_ids_in_post_order() {
        let mut ids = IdGen::default();
        let x = Value::Assigned(
            ids.assign::<X86_64>(AssignRhs::SetUndefined(TypeRepr::BV(8)))
                .unwrap(),
        );
        let (_, y) = ids.app(App::BVAdd(8, x.clone(), Value::bv(8, 1))).unwrap();
        let (s, _) = ids.app(App::BVMul(8, y.clone(), x.clone())).unwrap();
        assert_eq!(
            stmt_assign_ids(&s).into_vec(),
            vec![AssignId(0), AssignId(1), AssignId(2)]
        );
        assert_eq!(
            value_assign_ids(&y).into_vec(),
            vec![AssignId(0), AssignId(1)]
        );
        assert!(value_assign_ids::<X86_64>(&Value::bv(8, 0)).into_vec().is_empty());
    }
}
