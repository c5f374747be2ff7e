//! Lowering of recovered functions to LLVM IR.
//!
//! Each [`Function`] is lowered on its own by [`generate_function`]. Blocks are translated
//! independently, each with a block-local map from assignment identifiers to LLVM operands;
//! values only flow between blocks through phi nodes, which are resolved once every block has
//! been translated. [`ModuleGen`] collects lowered functions and the declarations they need
//! into a [`Module`].

use crate::app::App;
use crate::arch::Arch;
use crate::cfg::BlockMap;
use crate::containers::unordered::UnorderedMap;
use crate::function::{BlockLabel, FnBlock, FnRegValue, FnTermStmt, Function};
use crate::generation_config::GenerationOptions;
use crate::il::{expect_type, AssignId, AssignRhs, Assignment, CallStmt, IrError, Stmt, Value};
use crate::llvm::{BasicBlock, FunctionDecl, FunctionDef, Module, Operand, Phi, Type, Typed};
use crate::llvm_intrinsics as intrinsics;
use crate::log::*;
use crate::types::{Endian, FloatInfo, FunctionType, MemRepr, TypeRepr};
use itertools::Itertools;

/// Failures of the target-IR backend. All of them are fatal for the function.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlvmGenError {
    #[error(transparent)]
    Ir(#[from] IrError),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("register {0} read directly in function-level IR")]
    InitialRegister(String),
    #[error("{0} used outside the block that defines it")]
    UnboundValue(AssignId),
    #[error("argument {index} out of range for a function of {count} arguments")]
    ArgumentOutOfRange { index: usize, count: usize },
    #[error("call to {name}: expected type {expected}, found {found}")]
    FunctionTypeMismatch {
        name: String,
        expected: FunctionType,
        found: FunctionType,
    },
    #[error("variable-argument call in block {0}")]
    VarArgsCall(BlockLabel),
    #[error("tail call in block {label} returns ({callee}) but the caller returns ({caller})")]
    TailCallReturnMismatch {
        label: BlockLabel,
        caller: String,
        callee: String,
    },
    #[error("return in block {label} has {found} slots, expected {expected}")]
    ReturnArity {
        label: BlockLabel,
        expected: usize,
        found: usize,
    },
    #[error("no value for phi {var} (register {reg}) on the edge from block {pred}")]
    PhiValueUnavailable {
        var: AssignId,
        reg: String,
        pred: BlockLabel,
    },
    #[error("block {0} has phi bindings but no predecessors")]
    PhisWithoutPredecessors(BlockLabel),
    #[error("lookup table in block {label} has {targets} targets, more than a {width}-bit index reaches")]
    LookupTableTooLarge {
        label: BlockLabel,
        width: u32,
        targets: usize,
    },
    #[error("conflicting declarations of @{0}")]
    ConflictingDeclaration(String),
}

/// Architecture-specific lowering
pub trait ArchLlvmHooks<A: Arch> {
    /// Byte order of the target's memory
    fn endianness(&self) -> Endian {
        A::endianness()
    }

    /// Lower an architecture function, returning its result
    fn lower_arch_fn(&self, gen: &mut BlockGen<A>, f: &A::Fn) -> Result<Typed, LlvmGenError>;

    /// Lower an architecture statement
    fn lower_arch_stmt(&self, gen: &mut BlockGen<A>, s: &A::Stmt) -> Result<(), LlvmGenError>;

    /// Lower a population count of a `width`-bit value
    fn lower_popcount(
        &self,
        gen: &mut BlockGen<A>,
        width: u32,
        x: Typed,
    ) -> Result<Typed, LlvmGenError> {
        gen.call(intrinsics::ctpop(width), vec![x])
    }
}

/// Whether an overflow check is of signed or unsigned arithmetic
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OverflowKind {
    Unsigned,
    Signed,
}

impl OverflowKind {
    /// The instruction combining the overflow flags of `a op b` and `(a op b) op carry`. At
    /// most one of the two unsigned steps can overflow. Two signed steps can only both
    /// overflow in opposite directions, cancelling out.
    pub fn combine_instr(self) -> &'static str {
        match self {
            OverflowKind::Unsigned => "or",
            OverflowKind::Signed => "xor",
        }
    }
}

/// The LLVM type of values of an IL type
pub fn llvm_type(tp: &TypeRepr) -> Type {
    match tp {
        TypeRepr::Bool => Type::Int(1),
        TypeRepr::BV(w) => Type::Int(*w),
        TypeRepr::Float(fi) => float_type(*fi),
        TypeRepr::Tuple(ts) => Type::Struct(ts.iter().map(llvm_type).collect()),
        TypeRepr::Vector(n, e) => Type::Vector(*n, Box::new(llvm_type(e))),
    }
}

fn float_type(fi: FloatInfo) -> Type {
    match fi {
        FloatInfo::Half => Type::Half,
        FloatInfo::Single => Type::Float,
        FloatInfo::Double => Type::Double,
        FloatInfo::X86_80 => Type::X86Fp80,
    }
}

/// Functions return all their return values as a single struct
pub fn return_type(fn_type: &FunctionType) -> Type {
    Type::Struct(fn_type.rets.iter().map(llvm_type).collect())
}

/// Declarations needed by generated code, keyed by name
#[derive(Clone, Debug, Default)]
pub struct Declarations {
    decls: UnorderedMap<String, FunctionDecl>,
}

impl Declarations {
    /// Add a declaration; declaring the same name twice must give the same declaration
    pub fn declare(&mut self, d: FunctionDecl) -> Result<(), LlvmGenError> {
        match self.decls.get(&d.name) {
            Some(prev) if *prev != d => Err(LlvmGenError::ConflictingDeclaration(d.name)),
            Some(_) => Ok(()),
            None => {
                trace!("Declaring"; "name" => &d.name);
                self.decls.insert(d.name.clone(), d);
                Ok(())
            }
        }
    }

    /// Add all declarations of `other`
    pub fn merge(&mut self, other: Declarations) -> Result<(), LlvmGenError> {
        other
            .decls
            .into_iter()
            .try_for_each(|(_, d)| self.declare(d))
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDecl> {
        self.decls.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FunctionDecl> {
        self.decls.values()
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}

/// The state of the translation of a single block
pub struct BlockGen<'g, A: Arch> {
    label: BlockLabel,
    options: &'g GenerationOptions,
    endian: Endian,
    fn_args: &'g [TypeRepr],
    decls: &'g mut Declarations,
    next_tmp: &'g mut u64,
    values: UnorderedMap<AssignId, Typed>,
    instrs: Vec<String>,
    _arch: std::marker::PhantomData<A>,
}

impl<'g, A: Arch> BlockGen<'g, A> {
    pub fn label(&self) -> BlockLabel {
        self.label
    }

    pub fn options(&self) -> &GenerationOptions {
        self.options
    }

    /// Append an instruction
    pub fn emit(&mut self, instr: String) {
        self.instrs.push(instr);
    }

    /// A fresh local name, without the leading `%`
    pub fn fresh(&mut self) -> String {
        let n = format!("t{}", self.next_tmp);
        *self.next_tmp += 1;
        n
    }

    /// Emit `%tN = rhs` and return `%tN` at type `tp`
    pub fn assign(&mut self, tp: Type, rhs: impl std::fmt::Display) -> Typed {
        let n = self.fresh();
        self.emit(format!("%{} = {}", n, rhs));
        Typed::new(tp, Operand::Local(n))
    }

    pub fn declare(&mut self, d: FunctionDecl) -> Result<(), LlvmGenError> {
        self.decls.declare(d)
    }

    /// Call a function returning a value
    pub fn call(&mut self, d: FunctionDecl, args: Vec<Typed>) -> Result<Typed, LlvmGenError> {
        let rhs = format!("call {} @{}({})", d.ret, d.name, args.iter().join(", "));
        let tp = d.ret.clone();
        self.declare(d)?;
        Ok(self.assign(tp, rhs))
    }

    /// Call a function returning `void`
    pub fn call_void(&mut self, d: FunctionDecl, args: Vec<Typed>) -> Result<(), LlvmGenError> {
        self.emit(format!("call void @{}({})", d.name, args.iter().join(", ")));
        self.declare(d)
    }

    /// Cast an integer address to a pointer
    pub fn inttoptr(&mut self, addr: Typed) -> Typed {
        self.assign(Type::Ptr, format!("inttoptr {} to ptr", addr))
    }

    fn bind(&mut self, id: AssignId, v: Typed) -> Result<(), LlvmGenError> {
        if self.values.insert(id, v).is_some() {
            return Err(IrError::DuplicateAssignment(id).into());
        }
        Ok(())
    }

    fn bound(&self, id: AssignId) -> Result<Typed, LlvmGenError> {
        self.values
            .get(&id)
            .cloned()
            .ok_or(LlvmGenError::UnboundValue(id))
    }

    /// The operand for a value
    pub fn value(&mut self, v: &Value<A>) -> Result<Typed, LlvmGenError> {
        match v {
            Value::BV(l) => Ok(Typed::int(l.width(), l.magnitude())),
            Value::Bool(b) => Ok(Typed::bool(*b)),
            Value::Assigned(a) => self.bound(a.id()),
            Value::Phi(p) => self.bound(p.id),
            Value::Return(r) => self.bound(r.id),
            Value::Initial(r) => Err(LlvmGenError::InitialRegister(r.to_string())),
            Value::Arg(i, tp) => {
                let expected = self
                    .fn_args
                    .get(*i)
                    .ok_or(LlvmGenError::ArgumentOutOfRange {
                        index: *i,
                        count: self.fn_args.len(),
                    })?;
                expect_type(|| format!("argument {}", i), expected, tp)?;
                Ok(Typed::new(llvm_type(tp), Operand::Local(format!("arg{}", i))))
            }
            Value::FunctionEntry(f) => {
                self.declare(FunctionDecl::new(
                    f.name.clone(),
                    return_type(&f.fn_type),
                    f.fn_type.args.iter().map(llvm_type).collect(),
                ))?;
                Ok(Typed::new(
                    Type::Int(64),
                    Operand::Inline(format!("ptrtoint (ptr @{} to i64)", f.name)),
                ))
            }
        }
    }

    /// Convert `v` to an integer of the same width
    fn as_int(&mut self, v: Typed) -> Result<Typed, LlvmGenError> {
        if v.tp.is_int() {
            return Ok(v);
        }
        let w = v.tp.bit_width().ok_or_else(|| {
            LlvmGenError::Unsupported(format!("comparison of aggregate values of type {}", v.tp))
        })?;
        Ok(self.assign(Type::Int(w), format!("bitcast {} to i{}", v, w)))
    }

    /// Byte-swap a value between memory order and register order, if the access is
    /// multi-byte and its endianness differs from the target's
    fn swap_bytes(&mut self, v: Typed, repr: &MemRepr) -> Result<Typed, LlvmGenError> {
        if repr.endian() == self.endian {
            return Ok(v);
        }
        match repr {
            MemRepr::BV { .. } => self.reverse_bytes(v),
            MemRepr::Float { .. } => {
                let tp = v.tp.clone();
                let i = self.as_int(v)?;
                let s = self.reverse_bytes(i)?;
                Ok(self.assign(tp.clone(), format!("bitcast {} to {}", s, tp)))
            }
            MemRepr::PackedVec { elem, .. } => match elem.as_ref() {
                MemRepr::BV { bytes: 1, .. } => Ok(v),
                MemRepr::BV { bytes, .. } if bytes % 2 == 0 => {
                    self.call(intrinsics::bswap(&v.tp), vec![v])
                }
                _ => Err(LlvmGenError::Unsupported(format!(
                    "byte-swapped access of {}",
                    repr
                ))),
            },
        }
    }

    /// Reverse the bytes of an integer whose width is a multiple of 8. `llvm.bswap` only
    /// takes an even number of bytes, so an odd count is widened by a zero byte first.
    fn reverse_bytes(&mut self, v: Typed) -> Result<Typed, LlvmGenError> {
        let w = match v.tp {
            Type::Int(w) if w % 8 == 0 => w,
            _ => {
                return Err(LlvmGenError::Unsupported(format!(
                    "byte reversal of {}",
                    v.tp
                )))
            }
        };
        if w == 8 {
            return Ok(v);
        }
        if w % 16 == 0 {
            return self.call(intrinsics::bswap(&v.tp), vec![v]);
        }
        let wide = Type::Int(w + 8);
        let x = self.cast("zext", v, wide.clone());
        let x = self.call(intrinsics::bswap(&wide), vec![x])?;
        let x = self.binop("lshr", x, Typed::int(w + 8, 8));
        Ok(self.cast("trunc", x, Type::Int(w)))
    }

    fn addr_ptr(&mut self, addr: &Value<A>) -> Result<Typed, LlvmGenError> {
        let a = self.value(addr)?;
        Ok(self.inttoptr(a))
    }

    fn read_mem(&mut self, addr: &Value<A>, repr: &MemRepr) -> Result<Typed, LlvmGenError> {
        let p = self.addr_ptr(addr)?;
        let tp = llvm_type(&repr.type_repr());
        let v = self.assign(tp.clone(), format!("load {}, {}, align 1", tp, p));
        self.swap_bytes(v, repr)
    }

    fn cond_read_mem(
        &mut self,
        repr: &MemRepr,
        cond: &Value<A>,
        addr: &Value<A>,
        default: &Value<A>,
    ) -> Result<Typed, LlvmGenError> {
        if let MemRepr::PackedVec { .. } = repr {
            return Err(LlvmGenError::Unsupported(format!(
                "conditional read of packed vector {}",
                repr
            )));
        }
        let tp = llvm_type(&repr.type_repr());
        let vtp = Type::Vector(1, Box::new(tp.clone()));
        let c = self.value(cond)?;
        let mask = self.assign(
            Type::Vector(1, Box::new(Type::Int(1))),
            format!("bitcast {} to <1 x i1>", c),
        );
        let p = self.addr_ptr(addr)?;
        // The pass-through value is put in memory order, so that the result can be swapped
        // back uniformly
        let d = self.value(default)?;
        let d = self.swap_bytes(d, repr)?;
        let passthru = self.assign(
            vtp.clone(),
            format!("insertelement {} undef, {}, i32 0", vtp, d),
        );
        let r = self.call(
            intrinsics::masked_load(&tp),
            vec![p, Typed::int(32, 1), mask, passthru],
        )?;
        let x = self.assign(tp, format!("extractelement {}, i32 0", r));
        self.swap_bytes(x, repr)
    }

    fn write_mem(
        &mut self,
        cond: Option<&Value<A>>,
        addr: &Value<A>,
        repr: &MemRepr,
        value: &Value<A>,
    ) -> Result<(), LlvmGenError> {
        let v = self.value(value)?;
        let v = self.swap_bytes(v, repr)?;
        match cond {
            None => {
                let p = self.addr_ptr(addr)?;
                self.emit(format!("store {}, {}, align 1", v, p));
                Ok(())
            }
            Some(cond) => {
                if let MemRepr::PackedVec { .. } = repr {
                    return Err(LlvmGenError::Unsupported(format!(
                        "conditional write of packed vector {}",
                        repr
                    )));
                }
                let c = self.value(cond)?;
                let mask = self.assign(
                    Type::Vector(1, Box::new(Type::Int(1))),
                    format!("bitcast {} to <1 x i1>", c),
                );
                let p = self.addr_ptr(addr)?;
                let vtp = Type::Vector(1, Box::new(v.tp.clone()));
                let elem = v.tp.clone();
                let v1 = self.assign(
                    vtp.clone(),
                    format!("insertelement {} undef, {}, i32 0", vtp, v),
                );
                self.call_void(
                    intrinsics::masked_store(&elem),
                    vec![v1, p, Typed::int(32, 1), mask],
                )
            }
        }
    }

    /// `lhs op rhs` at the type of `lhs`
    fn binop(&mut self, op: &str, lhs: Typed, rhs: Typed) -> Typed {
        let tp = lhs.tp.clone();
        self.assign(tp, format!("{} {}, {}", op, lhs, rhs.value))
    }

    fn icmp(&mut self, pred: &str, lhs: Typed, rhs: Typed) -> Typed {
        self.assign(
            Type::Int(1),
            format!("icmp {} {}, {}", pred, lhs, rhs.value),
        )
    }

    fn cast(&mut self, op: &str, v: Typed, to: Type) -> Typed {
        self.assign(to.clone(), format!("{} {} to {}", op, v, to))
    }

    fn select(&mut self, c: Typed, t: Typed, f: Typed) -> Typed {
        let tp = t.tp.clone();
        self.assign(tp, format!("select {}, {}, {}", c, t, f))
    }

    /// Whether `amt` is a literal in `[0, w)`; such shift amounts need no guard
    fn in_range_literal(amt: &Value<A>, w: u32) -> bool {
        amt.as_bv_literal()
            .map_or(false, |l| l.magnitude() < w as u128)
    }

    /// A shift with bitvector semantics for amounts of at least the width
    fn shift(
        &mut self,
        op: &str,
        w: u32,
        x: &Value<A>,
        amt: &Value<A>,
    ) -> Result<Typed, LlvmGenError> {
        let xv = self.value(x)?;
        let av = self.value(amt)?;
        if Self::in_range_literal(amt, w) {
            return Ok(self.binop(op, xv, av));
        }
        let ok = self.icmp("ult", av.clone(), Typed::int(w, w as u128));
        if op == "ashr" {
            // Out-of-range arithmetic shifts fill with the sign bit, as a shift by w - 1 does
            let a = self.select(ok, av, Typed::int(w, (w - 1) as u128));
            Ok(self.binop(op, xv, a))
        } else {
            let r = self.binop(op, xv, av);
            Ok(self.select(ok, r, Typed::int(w, 0)))
        }
    }

    fn overflow(
        &mut self,
        kind: OverflowKind,
        sub: bool,
        w: u32,
        a: &Value<A>,
        b: &Value<A>,
        carry: &Value<A>,
    ) -> Result<Typed, LlvmGenError> {
        let decl = intrinsics::with_overflow(kind == OverflowKind::Signed, sub, w);
        let av = self.value(a)?;
        let bv = self.value(b)?;
        let r1 = self.call(decl.clone(), vec![av, bv])?;
        let o1 = self.assign(Type::Int(1), format!("extractvalue {}, 1", r1));
        if carry.as_bool_literal() == Some(false) {
            return Ok(o1);
        }
        let c = self.value(carry)?;
        let cz = self.cast("zext", c, Type::Int(w));
        let s1 = self.assign(Type::Int(w), format!("extractvalue {}, 0", r1));
        let r2 = self.call(decl, vec![s1, cz])?;
        let o2 = self.assign(Type::Int(1), format!("extractvalue {}, 1", r2));
        Ok(self.binop(kind.combine_instr(), o1, o2))
    }

    fn app<H: ArchLlvmHooks<A>>(&mut self, hooks: &H, app: &App<A>) -> Result<Typed, LlvmGenError> {
        use App::*;
        let allow_ub = self.options.allow_undefined_behavior_on_impossible_paths;
        macro_rules! bin {
            ($op:expr, $a:expr, $b:expr) => {{
                let a = self.value($a)?;
                let b = self.value($b)?;
                self.binop($op, a, b)
            }};
        }
        macro_rules! cmp {
            ($pred:expr, $a:expr, $b:expr) => {{
                let a = self.value($a)?;
                let b = self.value($b)?;
                self.icmp($pred, a, b)
            }};
        }
        macro_rules! fcmp {
            ($pred:expr, $a:expr, $b:expr) => {{
                let a = self.value($a)?;
                let b = self.value($b)?;
                self.assign(
                    Type::Int(1),
                    format!("fcmp {} {}, {}", $pred, a, b.value),
                )
            }};
        }
        let res = match app {
            Eq(a, b) => {
                let a = self.value(a)?;
                let a = self.as_int(a)?;
                let b = self.value(b)?;
                let b = self.as_int(b)?;
                self.icmp("eq", a, b)
            }
            Mux(_, c, t, f) => {
                let c = self.value(c)?;
                let t = self.value(t)?;
                let f = self.value(f)?;
                self.select(c, t, f)
            }
            AndApp(a, b) => bin!("and", a, b),
            OrApp(a, b) => bin!("or", a, b),
            XorApp(a, b) => bin!("xor", a, b),
            NotApp(a) => {
                let a = self.value(a)?;
                self.binop("xor", a, Typed::bool(true))
            }
            Trunc { value, to, .. } => {
                let v = self.value(value)?;
                self.cast("trunc", v, Type::Int(*to))
            }
            SExt { value, to, .. } => {
                let v = self.value(value)?;
                self.cast("sext", v, Type::Int(*to))
            }
            UExt { value, to, .. } => {
                let v = self.value(value)?;
                self.cast("zext", v, Type::Int(*to))
            }
            Bitcast { value, to, .. } => {
                let v = self.value(value)?;
                let to = llvm_type(to);
                if v.tp == to {
                    v
                } else {
                    self.cast("bitcast", v, to)
                }
            }
            TupleField { fields, tuple, index } => {
                let t = self.value(tuple)?;
                self.assign(
                    llvm_type(&fields[*index]),
                    format!("extractvalue {}, {}", t, index),
                )
            }
            Concat {
                hi_width,
                lo_width,
                hi,
                lo,
            } => {
                let w = Type::Int(hi_width + lo_width);
                let h = self.value(hi)?;
                let h = self.cast("zext", h, w.clone());
                let l = self.value(lo)?;
                let l = self.cast("zext", l, w);
                let h = self.binop("shl", h, Typed::int(hi_width + lo_width, *lo_width as u128));
                self.binop("or", h, l)
            }
            UpperHalf(w, a) => {
                let v = self.value(a)?;
                let s = self.binop("lshr", v, Typed::int(2 * w, *w as u128));
                self.cast("trunc", s, Type::Int(*w))
            }
            LowerHalf(w, a) => {
                let v = self.value(a)?;
                self.cast("trunc", v, Type::Int(*w))
            }
            BVAdd(_, a, b) => bin!("add", a, b),
            BVAdc(w, a, b, c) => {
                let s = bin!("add", a, b);
                let c = self.value(c)?;
                let c = self.cast("zext", c, Type::Int(*w));
                self.binop("add", s, c)
            }
            BVSub(_, a, b) => bin!("sub", a, b),
            BVSbb(w, a, b, c) => {
                let s = bin!("sub", a, b);
                let c = self.value(c)?;
                let c = self.cast("zext", c, Type::Int(*w));
                self.binop("sub", s, c)
            }
            BVMul(_, a, b) => bin!("mul", a, b),
            // Division by zero traps on the machine, so it cannot reach here
            BVUnsignedDiv(_, a, b) => bin!("udiv", a, b),
            BVUnsignedRem(_, a, b) => bin!("urem", a, b),
            BVSignedDiv(_, a, b) => bin!("sdiv", a, b),
            BVSignedRem(_, a, b) => bin!("srem", a, b),
            BVUnsignedLt(_, a, b) => cmp!("ult", a, b),
            BVUnsignedLe(_, a, b) => cmp!("ule", a, b),
            BVSignedLt(_, a, b) => cmp!("slt", a, b),
            BVSignedLe(_, a, b) => cmp!("sle", a, b),
            BVTestBit(w, x, i) => {
                let xv = self.value(x)?;
                let iv = self.value(i)?;
                let s = self.binop("lshr", xv, iv.clone());
                let b = self.cast("trunc", s, Type::Int(1));
                if Self::in_range_literal(i, *w) {
                    b
                } else {
                    let ok = self.icmp("ult", iv, Typed::int(*w, *w as u128));
                    self.select(ok, b, Typed::bool(false))
                }
            }
            BVComplement(w, a) => {
                let v = self.value(a)?;
                self.binop("xor", v, Typed::new(Type::Int(*w), Operand::AllOnes))
            }
            BVAnd(_, a, b) => bin!("and", a, b),
            BVOr(_, a, b) => bin!("or", a, b),
            BVXor(_, a, b) => bin!("xor", a, b),
            BVShl(w, a, b) => self.shift("shl", *w, a, b)?,
            BVShr(w, a, b) => self.shift("lshr", *w, a, b)?,
            BVSar(w, a, b) => self.shift("ashr", *w, a, b)?,
            UadcOverflows(w, a, b, c) => {
                self.overflow(OverflowKind::Unsigned, false, *w, a, b, c)?
            }
            SadcOverflows(w, a, b, c) => self.overflow(OverflowKind::Signed, false, *w, a, b, c)?,
            UsbbOverflows(w, a, b, c) => self.overflow(OverflowKind::Unsigned, true, *w, a, b, c)?,
            SsbbOverflows(w, a, b, c) => self.overflow(OverflowKind::Signed, true, *w, a, b, c)?,
            PopCount(w, a) => {
                let v = self.value(a)?;
                hooks.lower_popcount(self, *w, v)?
            }
            ReverseBytes(_, a) => {
                let v = self.value(a)?;
                self.reverse_bytes(v)?
            }
            // With a false poison flag, cttz and ctlz of zero return the width, which gives
            // w for bsf and (w - 1) - w = all ones for bsr
            Bsf(w, a) => {
                let v = self.value(a)?;
                self.call(intrinsics::cttz(*w), vec![v, Typed::bool(allow_ub)])?
            }
            Bsr(w, a) => {
                let v = self.value(a)?;
                let z = self.call(intrinsics::ctlz(*w), vec![v, Typed::bool(allow_ub)])?;
                self.assign(
                    Type::Int(*w),
                    format!("sub i{} {}, {}", w, w - 1, z.value),
                )
            }
            EvenParity(a) => {
                let v = self.value(a)?;
                let p = self.call(intrinsics::ctpop(8), vec![v])?;
                let odd = self.cast("trunc", p, Type::Int(1));
                self.binop("xor", odd, Typed::bool(true))
            }
            FPAdd(_, a, b) => bin!("fadd", a, b),
            FPSub(_, a, b) => bin!("fsub", a, b),
            FPMul(_, a, b) => bin!("fmul", a, b),
            FPDiv(_, a, b) => bin!("fdiv", a, b),
            FPSqrt(fi, a) => {
                let v = self.value(a)?;
                self.call(intrinsics::sqrt(&float_type(*fi)), vec![v])?
            }
            FPLt(_, a, b) => fcmp!("olt", a, b),
            FPEq(_, a, b) => fcmp!("oeq", a, b),
            FPIsNaN(_, a) => fcmp!("uno", a, a),
            FPCvt { from, value, to } => {
                let v = self.value(value)?;
                let op = match from.bit_width().cmp(&to.bit_width()) {
                    std::cmp::Ordering::Less => "fpext",
                    std::cmp::Ordering::Greater => "fptrunc",
                    std::cmp::Ordering::Equal => return Ok(v),
                };
                self.cast(op, v, float_type(*to))
            }
            FPFromSignedBV { value, to, .. } => {
                let v = self.value(value)?;
                self.cast("sitofp", v, float_type(*to))
            }
            FPToSignedBV { value, width, .. } => {
                let v = self.value(value)?;
                self.cast("fptosi", v, Type::Int(*width))
            }
        };
        Ok(res)
    }

    fn assignment<H: ArchLlvmHooks<A>>(
        &mut self,
        hooks: &H,
        a: &Assignment<A>,
    ) -> Result<(), LlvmGenError> {
        let v = match a.rhs() {
            AssignRhs::EvalApp(app) => self.app(hooks, app)?,
            AssignRhs::SetUndefined(tp) => Typed::new(llvm_type(tp), Operand::Undef),
            AssignRhs::ReadMem { addr, repr } => self.read_mem(addr, repr)?,
            AssignRhs::CondReadMem {
                repr,
                cond,
                addr,
                default,
            } => self.cond_read_mem(repr, cond, addr, default)?,
            AssignRhs::EvalArchFn(f) => hooks.lower_arch_fn(self, f)?,
        };
        self.bind(a.id(), v)
    }

    /// Check a call against its destination, returning the callee operand
    fn callee(&mut self, dest: &Value<A>, fn_type: &FunctionType) -> Result<Operand, LlvmGenError> {
        if fn_type.var_args {
            return Err(LlvmGenError::VarArgsCall(self.label));
        }
        match dest {
            Value::FunctionEntry(f) => {
                if f.fn_type != *fn_type {
                    return Err(LlvmGenError::FunctionTypeMismatch {
                        name: f.name.clone(),
                        expected: f.fn_type.clone(),
                        found: fn_type.clone(),
                    });
                }
                self.declare(FunctionDecl::new(
                    f.name.clone(),
                    return_type(fn_type),
                    fn_type.args.iter().map(llvm_type).collect(),
                ))?;
                Ok(Operand::Global(f.name.clone()))
            }
            _ => {
                expect_type(|| "call destination".into(), &TypeRepr::BV(64), &dest.type_repr())?;
                let d = self.value(dest)?;
                Ok(self.inttoptr(d).value)
            }
        }
    }

    /// Emit a call, returning its (struct) result
    fn emit_call(
        &mut self,
        dest: &Value<A>,
        fn_type: &FunctionType,
        args: &[Value<A>],
        tail: bool,
    ) -> Result<Typed, LlvmGenError> {
        let callee = self.callee(dest, fn_type)?;
        if args.len() != fn_type.args.len() {
            return Err(LlvmGenError::ArgumentOutOfRange {
                index: args.len(),
                count: fn_type.args.len(),
            });
        }
        let args = args
            .iter()
            .zip(&fn_type.args)
            .enumerate()
            .map(|(i, (a, tp))| {
                expect_type(|| format!("call argument {}", i), tp, &a.type_repr())?;
                self.value(a)
            })
            .collect::<Result<Vec<_>, LlvmGenError>>()?;
        let ret = return_type(fn_type);
        Ok(self.assign(
            ret.clone(),
            format!(
                "{}call {} {}({})",
                if tail { "tail " } else { "" },
                ret,
                callee,
                args.iter().join(", ")
            ),
        ))
    }

    fn call_stmt(&mut self, c: &CallStmt<A>) -> Result<(), LlvmGenError> {
        let r = self.emit_call(&c.dest, &c.fn_type, &c.args, false)?;
        if c.returns.len() > c.fn_type.rets.len() {
            return Err(LlvmGenError::ReturnArity {
                label: self.label,
                expected: c.fn_type.rets.len(),
                found: c.returns.len(),
            });
        }
        for (i, (rv, tp)) in c.returns.iter().zip(&c.fn_type.rets).enumerate() {
            expect_type(|| format!("return value {}", rv.id), tp, &rv.tp)?;
            let v = self.assign(llvm_type(tp), format!("extractvalue {}, {}", r, i));
            self.bind(rv.id, v)?;
        }
        Ok(())
    }

    fn stmt<H: ArchLlvmHooks<A>>(&mut self, hooks: &H, s: &Stmt<A>) -> Result<(), LlvmGenError> {
        match s {
            Stmt::Assign(a) => self.assignment(hooks, a),
            Stmt::WriteMem { addr, repr, value } => self.write_mem(None, addr, repr, value),
            Stmt::CondWriteMem {
                cond,
                addr,
                repr,
                value,
            } => self.write_mem(Some(cond), addr, repr, value),
            Stmt::Call(c) => self.call_stmt(c),
            Stmt::Arch(s) => hooks.lower_arch_stmt(self, s),
            Stmt::Comment(c) => {
                if self.options.emit_instruction_comments {
                    self.emit(format!("; {}", c));
                }
                Ok(())
            }
            Stmt::InstructionStart { offset, mnemonic } => {
                if self.options.emit_instruction_comments {
                    self.emit(format!("; {:#x}: {}", self.label.0 + offset, mnemonic));
                }
                Ok(())
            }
        }
    }
}

/// A translated block, waiting for its phis to be resolved
struct PendingBlock {
    bb: BasicBlock,
    /// Exit values of registers read by the phis of successors; `None` if unavailable
    exits: UnorderedMap<String, Option<(TypeRepr, Typed)>>,
}

/// Label of the shared block that out-of-range lookup table indices go to
const LOOKUP_FAILURE_LABEL: &str = "lookup_failure";

/// The lowering of a single function
pub struct FunctionGen<'a, A: Arch, H: ArchLlvmHooks<A>> {
    hooks: &'a H,
    options: &'a GenerationOptions,
    func: &'a Function<A>,
    decls: Declarations,
    next_tmp: u64,
    lookup_failure_needed: bool,
}

impl<'a, A: Arch, H: ArchLlvmHooks<A>> FunctionGen<'a, A, H> {
    pub fn new(hooks: &'a H, options: &'a GenerationOptions, func: &'a Function<A>) -> Self {
        Self {
            hooks,
            options,
            func,
            decls: Default::default(),
            next_tmp: 0,
            lookup_failure_needed: false,
        }
    }

    fn block(
        &mut self,
        map: &BlockMap<FnBlock<A>>,
        b: &FnBlock<A>,
    ) -> Result<PendingBlock, LlvmGenError> {
        debug!("Lowering block"; "label" => %b.label);
        let mut gen = BlockGen {
            label: b.label,
            options: self.options,
            endian: self.hooks.endianness(),
            fn_args: &self.func.fn_type.args,
            decls: &mut self.decls,
            next_tmp: &mut self.next_tmp,
            values: Default::default(),
            instrs: vec![],
            _arch: std::marker::PhantomData,
        };

        // Phis are bound to placeholders here, and filled in once all blocks are done
        for p in &b.phis {
            gen.bind(
                p.var.id,
                Typed::new(llvm_type(&p.var.tp), Operand::Local(p.var.id.to_string())),
            )?;
        }
        for s in &b.stmts {
            gen.stmt(self.hooks, s)?;
        }

        let mut exits: UnorderedMap<String, Option<(TypeRepr, Typed)>> = Default::default();
        for succ in b.term.successors() {
            for p in &map.get(succ)?.phis {
                let key = p.reg.to_string();
                if exits.contains_key(&key) {
                    continue;
                }
                let v = match b.exit_regs.get(&p.reg) {
                    Some(FnRegValue::Value(v)) => Some((v.type_repr(), gen.value(v)?)),
                    Some(FnRegValue::CalleeSaved(_)) | None => None,
                };
                exits.insert(key, v);
            }
        }

        let term = match &b.term {
            FnTermStmt::Jump(l) => format!("br label %{}", l),
            FnTermStmt::Branch {
                cond,
                then_label,
                else_label,
            } => {
                expect_type(
                    || format!("branch condition in {}", b.label),
                    &TypeRepr::Bool,
                    &cond.type_repr(),
                )?;
                let c = gen.value(cond)?;
                format!("br {}, label %{}, label %{}", c, then_label, else_label)
            }
            FnTermStmt::LookupTable { index, targets } => {
                let w = crate::il::expect_bv(|| "lookup table index".into(), &index.type_repr())?;
                if w < 64 && targets.len() as u64 > 1u64 << w {
                    return Err(LlvmGenError::LookupTableTooLarge {
                        label: b.label,
                        width: w,
                        targets: targets.len(),
                    });
                }
                let i = gen.value(index)?;
                self.lookup_failure_needed = true;
                format!(
                    "switch {}, label %{} [ {} ]",
                    i,
                    LOOKUP_FAILURE_LABEL,
                    targets
                        .iter()
                        .enumerate()
                        .map(|(n, t)| format!("i{} {}, label %{}", w, n, t))
                        .join(" ")
                )
            }
            FnTermStmt::Ret(slots) => {
                let rets = &self.func.fn_type.rets;
                if slots.len() != rets.len() {
                    return Err(LlvmGenError::ReturnArity {
                        label: b.label,
                        expected: rets.len(),
                        found: slots.len(),
                    });
                }
                let ret_tp = return_type(&self.func.fn_type);
                let mut acc = Typed::new(ret_tp.clone(), Operand::Undef);
                for (i, (slot, tp)) in slots.iter().zip(rets).enumerate() {
                    if let Some(v) = slot {
                        expect_type(|| format!("return slot {}", i), tp, &v.type_repr())?;
                        let v = gen.value(v)?;
                        acc = gen.assign(ret_tp.clone(), format!("insertvalue {}, {}, {}", acc, v, i));
                    }
                }
                format!("ret {}", acc)
            }
            FnTermStmt::TailCall {
                dest,
                fn_type,
                args,
            } => {
                if fn_type.rets != self.func.fn_type.rets {
                    return Err(LlvmGenError::TailCallReturnMismatch {
                        label: b.label,
                        caller: self.func.fn_type.rets.iter().join(", "),
                        callee: fn_type.rets.iter().join(", "),
                    });
                }
                let r = gen.emit_call(dest, fn_type, args, true)?;
                format!("ret {}", r)
            }
        };

        Ok(PendingBlock {
            bb: BasicBlock {
                label: b.label.to_string(),
                phis: vec![],
                instrs: gen.instrs,
                term,
            },
            exits,
        })
    }

    /// Lower the function, returning its definition and the declarations it needs
    pub fn generate(mut self) -> Result<(FunctionDef, Declarations), LlvmGenError> {
        info!("Lowering function"; "name" => &self.func.name, "addr" => format!("{:#x}", self.func.addr));
        self.func.validate()?;
        let map = self.func.block_map()?;

        let order: Vec<&FnBlock<A>> = std::iter::once(map.get(self.func.entry)?)
            .chain(map.iter().filter(|b| b.label != self.func.entry))
            .collect();

        let mut pending: UnorderedMap<BlockLabel, PendingBlock> = Default::default();
        for b in &order {
            let p = self.block(&map, b)?;
            pending.insert(b.label, p);
        }

        // Resolve phis, once per incoming edge
        let mut resolved: Vec<(BlockLabel, Vec<Phi>)> = vec![];
        for b in &order {
            if b.phis.is_empty() {
                continue;
            }
            let preds = map.predecessors(b.label)?;
            if preds.is_empty() {
                return Err(LlvmGenError::PhisWithoutPredecessors(b.label));
            }
            let mut phis = vec![];
            for p in &b.phis {
                let mut incoming = vec![];
                for pred in preds {
                    let unavailable = || LlvmGenError::PhiValueUnavailable {
                        var: p.var.id,
                        reg: p.reg.to_string(),
                        pred: *pred,
                    };
                    let (tp, v) = pending
                        .get(pred)
                        .and_then(|pb| pb.exits.get(&p.reg.to_string()))
                        .cloned()
                        .flatten()
                        .ok_or_else(unavailable)?;
                    expect_type(|| format!("phi {}", p.var.id), &p.var.tp, &tp)?;
                    incoming.push((v.value, pred.to_string()));
                }
                phis.push(Phi {
                    name: p.var.id.to_string(),
                    tp: llvm_type(&p.var.tp),
                    incoming,
                });
            }
            resolved.push((b.label, phis));
        }
        for (label, phis) in resolved {
            if let Some(pb) = pending.get_mut(&label) {
                pb.bb.phis = phis;
            }
        }

        let mut blocks = vec![];
        if !map.predecessors(self.func.entry)?.is_empty() {
            // LLVM entry blocks cannot have predecessors
            blocks.push(BasicBlock {
                label: "init".into(),
                phis: vec![],
                instrs: vec![],
                term: format!("br label %{}", self.func.entry),
            });
        }
        for b in &order {
            if let Some(pb) = pending.remove(&b.label) {
                blocks.push(pb.bb);
            }
        }
        if self.lookup_failure_needed {
            let mut instrs = vec![];
            if !self.options.allow_undefined_behavior_on_impossible_paths {
                let d = intrinsics::lookup_table_failure();
                instrs.push(format!("call void @{}()", d.name));
                self.decls.declare(d)?;
            }
            blocks.push(BasicBlock {
                label: LOOKUP_FAILURE_LABEL.into(),
                phis: vec![],
                instrs,
                term: "unreachable".into(),
            });
        }

        let def = FunctionDef {
            name: self.func.name.clone(),
            ret: return_type(&self.func.fn_type),
            params: self
                .func
                .fn_type
                .args
                .iter()
                .enumerate()
                .map(|(i, tp)| (llvm_type(tp), format!("arg{}", i)))
                .collect(),
            blocks,
        };
        Ok((def, self.decls))
    }
}

/// Lower a single function
pub fn generate_function<A: Arch, H: ArchLlvmHooks<A>>(
    hooks: &H,
    options: &GenerationOptions,
    func: &Function<A>,
) -> Result<(FunctionDef, Declarations), LlvmGenError> {
    FunctionGen::new(hooks, options, func).generate()
}

/// Assembles lowered functions into a module
#[derive(Default)]
pub struct ModuleGen {
    functions: Vec<FunctionDef>,
    decls: Declarations,
}

impl ModuleGen {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lower `func` and add it to the module
    pub fn add_function<A: Arch, H: ArchLlvmHooks<A>>(
        &mut self,
        hooks: &H,
        options: &GenerationOptions,
        func: &Function<A>,
    ) -> Result<(), LlvmGenError> {
        let (def, decls) = generate_function(hooks, options, func)?;
        self.add_lowered(def, decls)
    }

    /// Add an already lowered function
    pub fn add_lowered(&mut self, def: FunctionDef, decls: Declarations) -> Result<(), LlvmGenError> {
        self.decls.merge(decls)?;
        self.functions.push(def);
        Ok(())
    }

    /// Merge a module assembled independently
    pub fn merge(&mut self, other: ModuleGen) -> Result<(), LlvmGenError> {
        self.decls.merge(other.decls)?;
        self.functions.extend(other.functions);
        Ok(())
    }

    /// The module. Functions are ordered by name; declarations of functions defined in the
    /// module are dropped.
    pub fn finish(mut self) -> Module {
        self.functions.sort_by(|a, b| a.name.cmp(&b.name));
        let defined: Vec<&str> = self.functions.iter().map(|f| f.name.as_str()).collect();
        let decls = self
            .decls
            .iter()
            .filter(|d| !defined.contains(&d.name.as_str()))
            .cloned()
            .collect();
        Module {
            decls,
            functions: self.functions,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn conflicting_declarations_are_rejected() {
        let mut d = Declarations::default();
        d.declare(intrinsics::ctpop(8)).unwrap();
        d.declare(intrinsics::ctpop(8)).unwrap();
        assert_eq!(d.len(), 1);
        let bogus = FunctionDecl::new("llvm.ctpop.i8", Type::Int(16), vec![]);
        assert_eq!(
            d.declare(bogus).unwrap_err(),
            LlvmGenError::ConflictingDeclaration("llvm.ctpop.i8".into())
        );
    }

    #[test]
    fn overflow_combination_matches_bitvector_semantics() {
        // Exhaustively check, at 3 bits, that combining the two overflow flags of
        // `(a op b) op carry` gives the overflow of the whole operation
        let w = 3u32;
        let m = 1i64 << w;
        let sx = |x: i64| if x >= m / 2 { x - m } else { x };
        for kind in [OverflowKind::Unsigned, OverflowKind::Signed] {
            for sub in [false, true] {
                for a in 0..m {
                    for b in 0..m {
                        for c in 0..2i64 {
                            let (fa, fb) = match kind {
                                OverflowKind::Unsigned => (a, b),
                                OverflowKind::Signed => (sx(a), sx(b)),
                            };
                            let in_range = |x: i64| match kind {
                                OverflowKind::Unsigned => (0..m).contains(&x),
                                OverflowKind::Signed => (-m / 2..m / 2).contains(&x),
                            };
                            let op = |x: i64, y: i64| if sub { x - y } else { x + y };
                            let wrap = |x: i64| match kind {
                                OverflowKind::Unsigned => x.rem_euclid(m),
                                OverflowKind::Signed => sx(x.rem_euclid(m)),
                            };
                            let s1 = op(fa, fb);
                            let o1 = !in_range(s1);
                            let o2 = !in_range(op(wrap(s1), c));
                            let combined = match kind.combine_instr() {
                                "or" => o1 | o2,
                                "xor" => o1 ^ o2,
                                i => unreachable!("{}", i),
                            };
                            assert_eq!(
                                combined,
                                !in_range(op(op(fa, fb), c)),
                                "{:?} sub={} a={} b={} c={}",
                                kind,
                                sub,
                                a,
                                b,
                                c
                            );
                        }
                    }
                }
            }
        }
    }
}
