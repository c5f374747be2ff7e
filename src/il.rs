//! The typed intermediate language recovered from machine code.
//!
//! Values form a DAG: an [`Assignment`] is shared (through an [`Arc`]) by every [`Value`] that
//! refers to it, and is identified by its [`AssignId`]. Assignments are immutable once created
//! and can only be created through [`Assignment::new`] (or the [`IdGen`] helpers), which
//! validates the right-hand side. Thus every assignment reachable from a value has passed the
//! width checks in [`App::validate`].

use crate::app::App;
use crate::arch::Arch;
use crate::dynamic_variable::dynamic_variable;
use crate::function::BlockLabel;
use crate::types::{FunctionType, MemRepr, TypeRepr};
use itertools::Itertools;
use std::sync::Arc;

dynamic_variable!(
    SHOW_VALUE_TYPES,
    with_SHOW_VALUE_TYPES_set,
    if_SHOW_VALUE_TYPES_set
);

/// Errors caused by malformed IL. These indicate an upstream invariant violation; there is no
/// recovery from them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IrError {
    #[error("assignment {0} is defined more than once")]
    DuplicateAssignment(AssignId),
    #[error("block {0} not found")]
    BlockNotFound(BlockLabel),
    #[error("block {0} is defined more than once")]
    DuplicateBlock(BlockLabel),
    #[error("blocks {0} and {1} overlap")]
    OverlappingBlocks(BlockLabel, BlockLabel),
    #[error("entry block {0} cannot have phi bindings")]
    PhiInEntryBlock(BlockLabel),
    #[error("{context}: expected type {expected}, found {found}")]
    TypeMismatch {
        context: String,
        expected: TypeRepr,
        found: TypeRepr,
    },
    #[error("{context}: expected a bitvector, found {found}")]
    ExpectedBitvector { context: String, found: TypeRepr },
    #[error("{op}: invalid widths {from} -> {to}")]
    InvalidWidths { op: &'static str, from: u32, to: u32 },
    #[error("{0}: zero-width type")]
    ZeroWidth(String),
    #[error("tuple field {index} out of range for a tuple of {len} fields")]
    TupleIndexOutOfRange { index: usize, len: usize },
}

/// Check that `found` is exactly `expected`
pub(crate) fn expect_type(
    context: impl FnOnce() -> String,
    expected: &TypeRepr,
    found: &TypeRepr,
) -> Result<(), IrError> {
    if expected == found {
        Ok(())
    } else {
        Err(IrError::TypeMismatch {
            context: context(),
            expected: expected.clone(),
            found: found.clone(),
        })
    }
}

/// Check that `found` is a bitvector, returning its width
pub(crate) fn expect_bv(context: impl FnOnce() -> String, found: &TypeRepr) -> Result<u32, IrError> {
    found.bv_width().ok_or_else(|| IrError::ExpectedBitvector {
        context: context(),
        found: found.clone(),
    })
}

/// Reject types that contain a zero-width component
pub(crate) fn validate_type(context: &str, tp: &TypeRepr) -> Result<(), IrError> {
    match tp {
        TypeRepr::Bool | TypeRepr::Float(_) => Ok(()),
        TypeRepr::BV(0) | TypeRepr::Vector(0, _) => Err(IrError::ZeroWidth(context.into())),
        TypeRepr::BV(_) => Ok(()),
        TypeRepr::Vector(_, e) => validate_type(context, e),
        TypeRepr::Tuple(ts) => ts.iter().try_for_each(|t| validate_type(context, t)),
    }
}

/// Identifier of an assignment; unique within a translation unit. Phi variables and call return
/// variables draw from the same identifier space.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct AssignId(pub u64);

impl std::fmt::Display for AssignId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A bitvector literal. The magnitude is always in `[0, 2^width)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BVLiteral {
    width: u32,
    magnitude: u128,
}

impl BVLiteral {
    /// A literal of `width` bits. The magnitude is reduced modulo `2^width`.
    ///
    /// Panics if `width` is zero. Literals are built from widths carried by the IL, which
    /// never include zero-width bitvectors.
    pub fn new(width: u32, magnitude: u128) -> Self {
        assert!(width > 0, "Zero-width bitvector literal");
        Self {
            width,
            magnitude: magnitude & Self::mask(width),
        }
    }

    /// A literal from a signed value, in two's complement
    pub fn from_signed(width: u32, value: i128) -> Self {
        Self::new(width, value as u128)
    }

    /// All-ones value of `width` bits (saturating at 128 bits)
    pub fn mask(width: u32) -> u128 {
        if width >= 128 {
            u128::MAX
        } else {
            (1u128 << width) - 1
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn magnitude(&self) -> u128 {
        self.magnitude
    }
}

/// A phi variable, merging the value of a register across the predecessors of a block
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct PhiVar {
    pub id: AssignId,
    pub tp: TypeRepr,
}

/// A variable bound to one of the values returned by a call
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ReturnVar {
    pub id: AssignId,
    pub tp: TypeRepr,
}

/// A statically-known function entry point
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct FunctionRef {
    pub name: String,
    pub addr: u64,
    pub fn_type: FunctionType,
}

/// A value in the IL.
#[derive(Clone, Debug)]
pub enum Value<A: Arch> {
    /// A bitvector literal
    BV(BVLiteral),
    /// A boolean literal
    Bool(bool),
    /// The value computed by an assignment
    Assigned(Arc<Assignment<A>>),
    /// The value a register held on entry to the block
    Initial(A::Reg),
    /// A phi variable of a function block
    Phi(PhiVar),
    /// A value returned by a call statement
    Return(ReturnVar),
    /// The `n`th argument of the enclosing function
    Arg(usize, TypeRepr),
    /// The address of a known function
    FunctionEntry(Arc<FunctionRef>),
}

impl<A: Arch> Value<A> {
    /// A bitvector literal; `magnitude` is reduced modulo `2^width`
    pub fn bv(width: u32, magnitude: u128) -> Self {
        Value::BV(BVLiteral::new(width, magnitude))
    }

    /// The type of the value, derived without evaluating anything
    pub fn type_repr(&self) -> TypeRepr {
        match self {
            Value::BV(l) => TypeRepr::BV(l.width()),
            Value::Bool(_) => TypeRepr::Bool,
            Value::Assigned(a) => a.type_repr().clone(),
            Value::Initial(r) => A::reg_type(r),
            Value::Phi(p) => p.tp.clone(),
            Value::Return(r) => r.tp.clone(),
            Value::Arg(_, tp) => tp.clone(),
            Value::FunctionEntry(_) => TypeRepr::BV(64),
        }
    }

    /// The literal boolean, if this is one
    pub fn as_bool_literal(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The literal bitvector, if this is one
    pub fn as_bv_literal(&self) -> Option<BVLiteral> {
        match self {
            Value::BV(l) => Some(*l),
            _ => None,
        }
    }

    /// The assignment this value directly refers to, if any
    pub fn assignment(&self) -> Option<&Arc<Assignment<A>>> {
        match self {
            Value::Assigned(a) => Some(a),
            _ => None,
        }
    }

    /// Position of the variant in the value ordering
    fn tag(&self) -> u8 {
        match self {
            Value::BV(_) => 0,
            Value::Bool(_) => 1,
            Value::Assigned(_) => 2,
            Value::Initial(_) => 3,
            Value::Phi(_) => 4,
            Value::Return(_) => 5,
            Value::Arg(_, _) => 6,
            Value::FunctionEntry(_) => 7,
        }
    }
}

impl<A: Arch> PartialOrd for Value<A> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Values are ordered by variant, then by bit width, then by content. Assignments, phi variables
/// and return variables are compared by identifier only.
impl<A: Arch> Ord for Value<A> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.tag()
            .cmp(&other.tag())
            .then_with(|| {
                self.type_repr()
                    .bit_width()
                    .cmp(&other.type_repr().bit_width())
            })
            .then_with(|| match (self, other) {
                (Value::BV(a), Value::BV(b)) => a.magnitude().cmp(&b.magnitude()),
                (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
                (Value::Assigned(a), Value::Assigned(b)) => a.id().cmp(&b.id()),
                (Value::Initial(a), Value::Initial(b)) => a.cmp(b),
                (Value::Phi(a), Value::Phi(b)) => a.id.cmp(&b.id),
                (Value::Return(a), Value::Return(b)) => a.id.cmp(&b.id),
                (Value::Arg(a, _), Value::Arg(b, _)) => a.cmp(b),
                (Value::FunctionEntry(a), Value::FunctionEntry(b)) => {
                    (&a.name, a.addr).cmp(&(&b.name, b.addr))
                }
                _ => unreachable!("Tags already compared equal"),
            })
            .then_with(|| self.type_repr().cmp(&other.type_repr()))
    }
}

impl<A: Arch> PartialEq for Value<A> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}
impl<A: Arch> Eq for Value<A> {}

impl<A: Arch> std::fmt::Display for Value<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Value::BV(l) => write!(f, "{:#x}", l.magnitude())?,
            Value::Bool(b) => write!(f, "{}", b)?,
            Value::Assigned(a) => write!(f, "{}", a.id())?,
            Value::Initial(r) => write!(f, "%{}", r)?,
            Value::Phi(p) => write!(f, "{}", p.id)?,
            Value::Return(r) => write!(f, "{}", r.id)?,
            Value::Arg(i, _) => write!(f, "arg{}", i)?,
            Value::FunctionEntry(fr) => write!(f, "@{}", fr.name)?,
        }
        if_SHOW_VALUE_TYPES_set(|| write!(f, ":{}", self.type_repr()), || Ok(()))
    }
}

/// The right-hand side of an assignment
#[derive(Clone, Debug, PartialEq)]
pub enum AssignRhs<A: Arch> {
    /// Evaluate a pure operation
    EvalApp(App<A>),
    /// An undefined value of the given type
    SetUndefined(TypeRepr),
    /// Read memory at `addr`
    ReadMem { addr: Value<A>, repr: MemRepr },
    /// Read memory at `addr` if `cond` holds, producing `default` otherwise
    CondReadMem {
        repr: MemRepr,
        cond: Value<A>,
        addr: Value<A>,
        default: Value<A>,
    },
    /// Evaluate an architecture function
    EvalArchFn(A::Fn),
}

impl<A: Arch> AssignRhs<A> {
    /// The type of the value produced by this right-hand side
    pub fn type_repr(&self) -> TypeRepr {
        match self {
            AssignRhs::EvalApp(app) => app.type_repr(),
            AssignRhs::SetUndefined(tp) => tp.clone(),
            AssignRhs::ReadMem { repr, .. } | AssignRhs::CondReadMem { repr, .. } => {
                repr.type_repr()
            }
            AssignRhs::EvalArchFn(f) => A::fn_type(f),
        }
    }

    /// Confirm that the operands have the types the right-hand side requires
    pub fn validate(&self) -> Result<(), IrError> {
        match self {
            AssignRhs::EvalApp(app) => app.validate(),
            AssignRhs::SetUndefined(tp) => validate_type("undefined value", tp),
            AssignRhs::ReadMem { addr, repr } => {
                validate_type("memory read", &repr.type_repr())?;
                expect_bv(|| "memory read address".into(), &addr.type_repr())?;
                Ok(())
            }
            AssignRhs::CondReadMem {
                repr,
                cond,
                addr,
                default,
            } => {
                validate_type("conditional memory read", &repr.type_repr())?;
                expect_type(
                    || "conditional read condition".into(),
                    &TypeRepr::Bool,
                    &cond.type_repr(),
                )?;
                expect_bv(|| "conditional read address".into(), &addr.type_repr())?;
                expect_type(
                    || "conditional read default".into(),
                    &repr.type_repr(),
                    &default.type_repr(),
                )
            }
            AssignRhs::EvalArchFn(f) => validate_type("architecture function", &A::fn_type(f)),
        }
    }
}

impl<A: Arch> std::fmt::Display for AssignRhs<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AssignRhs::EvalApp(app) => write!(f, "{}", app),
            AssignRhs::SetUndefined(tp) => write!(f, "undef {}", tp),
            AssignRhs::ReadMem { addr, repr } => write!(f, "read_mem {} {}", addr, repr),
            AssignRhs::CondReadMem {
                repr,
                cond,
                addr,
                default,
            } => write!(f, "cond_read_mem {} {} {} {}", repr, cond, addr, default),
            AssignRhs::EvalArchFn(af) => write!(f, "{}", af),
        }
    }
}

/// A single-assignment binding of an identifier to a right-hand side
#[derive(Debug, PartialEq)]
pub struct Assignment<A: Arch> {
    id: AssignId,
    rhs: AssignRhs<A>,
    tp: TypeRepr,
}

impl<A: Arch> Assignment<A> {
    /// Create a new assignment, rejecting ill-typed right-hand sides
    pub fn new(id: AssignId, rhs: AssignRhs<A>) -> Result<Arc<Self>, IrError> {
        rhs.validate()?;
        let tp = rhs.type_repr();
        Ok(Arc::new(Self { id, rhs, tp }))
    }

    pub fn id(&self) -> AssignId {
        self.id
    }

    pub fn rhs(&self) -> &AssignRhs<A> {
        &self.rhs
    }

    pub fn type_repr(&self) -> &TypeRepr {
        &self.tp
    }
}

impl<A: Arch> std::fmt::Display for Assignment<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} := {}", self.id, self.rhs)
    }
}

/// A call statement. `returns` are bound, in order, to the leading slots of `fn_type.rets`.
#[derive(Clone, Debug, PartialEq)]
pub struct CallStmt<A: Arch> {
    pub dest: Value<A>,
    pub fn_type: FunctionType,
    pub args: Vec<Value<A>>,
    pub returns: Vec<ReturnVar>,
}

/// A statement in a block
#[derive(Clone, Debug, PartialEq)]
pub enum Stmt<A: Arch> {
    /// Bind an assignment
    Assign(Arc<Assignment<A>>),
    /// Write `value` to memory at `addr`
    WriteMem {
        addr: Value<A>,
        repr: MemRepr,
        value: Value<A>,
    },
    /// Write `value` to memory at `addr` if `cond` holds
    CondWriteMem {
        cond: Value<A>,
        addr: Value<A>,
        repr: MemRepr,
        value: Value<A>,
    },
    /// Call a function
    Call(CallStmt<A>),
    /// An architecture-specific statement
    Arch(A::Stmt),
    /// A comment; has no effect
    Comment(String),
    /// Marks the start of the machine instruction at `offset` bytes from the start of the block
    InstructionStart { offset: u64, mnemonic: String },
}

impl<A: Arch> Stmt<A> {
    /// An unconditional memory write, rejecting values that do not match `repr`
    pub fn write_mem(addr: Value<A>, repr: MemRepr, value: Value<A>) -> Result<Self, IrError> {
        expect_bv(|| "memory write address".into(), &addr.type_repr())?;
        expect_type(
            || "memory write value".into(),
            &repr.type_repr(),
            &value.type_repr(),
        )?;
        Ok(Stmt::WriteMem { addr, repr, value })
    }

    /// A conditional memory write, rejecting ill-typed operands
    pub fn cond_write_mem(
        cond: Value<A>,
        addr: Value<A>,
        repr: MemRepr,
        value: Value<A>,
    ) -> Result<Self, IrError> {
        expect_type(
            || "conditional write condition".into(),
            &TypeRepr::Bool,
            &cond.type_repr(),
        )?;
        expect_bv(|| "conditional write address".into(), &addr.type_repr())?;
        expect_type(
            || "conditional write value".into(),
            &repr.type_repr(),
            &value.type_repr(),
        )?;
        Ok(Stmt::CondWriteMem {
            cond,
            addr,
            repr,
            value,
        })
    }
}

impl<A: Arch> std::fmt::Display for Stmt<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Stmt::Assign(a) => write!(f, "{}", a),
            Stmt::WriteMem { addr, repr, value } => {
                write!(f, "write_mem {} {} {}", addr, repr, value)
            }
            Stmt::CondWriteMem {
                cond,
                addr,
                repr,
                value,
            } => write!(f, "cond_write_mem {} {} {} {}", cond, addr, repr, value),
            Stmt::Call(c) => {
                if !c.returns.is_empty() {
                    write!(f, "{} := ", c.returns.iter().map(|r| r.id).join(", "))?;
                }
                write!(f, "call {}({})", c.dest, c.args.iter().join(", "))
            }
            Stmt::Arch(s) => write!(f, "{}", s),
            Stmt::Comment(c) => write!(f, "# {}", c),
            Stmt::InstructionStart { offset, mnemonic } => {
                write!(f, "# {:#x}: {}", offset, mnemonic)
            }
        }
    }
}

/// A source of fresh identifiers, and a convenient way to build validated assignments
#[derive(Debug, Default)]
pub struct IdGen {
    next: u64,
}

impl IdGen {
    /// Generator whose first identifier is `start`
    pub fn starting_at(start: u64) -> Self {
        Self { next: start }
    }

    /// A fresh identifier
    pub fn fresh(&mut self) -> AssignId {
        let id = AssignId(self.next);
        self.next += 1;
        id
    }

    /// A new assignment with a fresh identifier
    pub fn assign<A: Arch>(&mut self, rhs: AssignRhs<A>) -> Result<Arc<Assignment<A>>, IrError> {
        Assignment::new(self.fresh(), rhs)
    }

    /// Assign `app` and return both the statement binding it and the value referring to it
    pub fn app<A: Arch>(&mut self, app: App<A>) -> Result<(Stmt<A>, Value<A>), IrError> {
        let a = self.assign(AssignRhs::EvalApp(app))?;
        Ok((Stmt::Assign(a.clone()), Value::Assigned(a)))
    }

    /// A fresh phi variable
    pub fn phi_var(&mut self, tp: TypeRepr) -> PhiVar {
        PhiVar {
            id: self.fresh(),
            tp,
        }
    }

    /// A fresh call return variable
    pub fn return_var(&mut self, tp: TypeRepr) -> ReturnVar {
        ReturnVar {
            id: self.fresh(),
            tp,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::x86_64::{X86Reg, X86_64};

    type V = Value<X86_64>;

    #[test]
    fn literals_are_reduced_modulo_width() {
        for w in 1..=16u32 {
            for m in [0u128, 1, 5, 255, 256, 65535, 65536, 1 << 20, u128::MAX] {
                let l = BVLiteral::new(w, m);
                assert_eq!(l.magnitude(), m % (1u128 << w));
                assert!(l.magnitude() < (1u128 << w));
            }
        }
        assert_eq!(BVLiteral::new(128, u128::MAX).magnitude(), u128::MAX);
        assert_eq!(BVLiteral::from_signed(8, -1).magnitude(), 0xff);
    }

    #[test]
    fn values_order_by_tag_then_width_then_content() {
        let mut ids = IdGen::default();
        let a = ids
            .assign::<X86_64>(AssignRhs::SetUndefined(TypeRepr::BV(8)))
            .unwrap();
        let mut vs: Vec<V> = vec![
            Value::Initial(X86Reg::RAX),
            Value::Assigned(a),
            Value::bv(64, 1),
            Value::bv(8, 200),
            Value::Bool(false),
            Value::bv(8, 3),
        ];
        vs.sort();
        assert_eq!(
            vs.iter().map(|v| v.to_string()).collect::<Vec<_>>(),
            ["0x3", "0xc8", "0x1", "false", "r0", "%rax"]
        );
        assert_eq!(V::bv(8, 3), V::bv(8, 259));
        assert_ne!(V::bv(8, 3), V::bv(16, 3));
    }

    #[test]
    fn ill_typed_memory_operations_are_rejected() {
        let mut ids = IdGen::default();
        let err = ids
            .assign::<X86_64>(AssignRhs::ReadMem {
                addr: Value::Bool(true),
                repr: MemRepr::le(4),
            })
            .unwrap_err();
        assert!(matches!(err, IrError::ExpectedBitvector { .. }));

        let err = Stmt::<X86_64>::write_mem(Value::bv(64, 0x1000), MemRepr::le(4), Value::bv(64, 1))
            .unwrap_err();
        assert_eq!(
            err,
            IrError::TypeMismatch {
                context: "memory write value".into(),
                expected: TypeRepr::BV(32),
                found: TypeRepr::BV(64),
            }
        );
    }

    #[test]
    fn typed_display_view() {
        let v: V = Value::bv(16, 0x2a);
        assert_eq!(v.to_string(), "0x2a");
        assert_eq!(with_SHOW_VALUE_TYPES_set(|| v.to_string()), "0x2a:bv16");
        assert_eq!(v.to_string(), "0x2a");
    }

    #[test]
    #[should_panic(expected = "Zero-width bitvector literal")]
    fn zero_width_literals_are_rejected() {
        BVLiteral::new(0, 0);
    }
}
