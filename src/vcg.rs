//! Lowering of machine blocks to verification events.
//!
//! A block is translated, statement by statement, into a sequence of [`Event`]s: SMT
//! definitions for each assignment, memory accesses tagged with their classification,
//! instruction boundaries, and finally the symbolic register state handed to the next block.
//! Anything that cannot be encoded exactly either fails the block ([`VcgError`]) or, for
//! approximations that are sound to leave unconstrained, produces a [`Event::Warning`] and an
//! unconstrained declaration.

use crate::annotations::{MemoryAccessKind, MemoryClassifier};
use crate::app::App;
use crate::arch::Arch;
use crate::containers::unordered::UnorderedMap;
use crate::function::{BlockTerm, MachineBlock};
use crate::il::{AssignId, AssignRhs, Assignment, IrError, Stmt, Value};
use crate::log::*;
use crate::smt::{Command, Sort, Term};
use crate::types::{MemRepr, TypeRepr};

/// Failures of the verification backend. All of them are fatal for the block.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VcgError {
    #[error(transparent)]
    Ir(#[from] IrError),
    #[error("no initial value for register {0}")]
    MissingInitialRegister(String),
    #[error("function-level value {0} in a machine block")]
    FunctionLevelValue(String),
    #[error("assignment {0} used before it is defined")]
    UnboundAssignment(AssignId),
    #[error("value {0} has no term representation")]
    OpaqueValue(String),
    #[error("no memory access classification for instruction at {0:#x}")]
    MissingClassification(u64),
    #[error("conditional memory read {0} is not supported")]
    UnsupportedConditionalRead(AssignId),
    #[error("conditional memory write at {0:#x} is not supported")]
    UnsupportedConditionalWrite(u64),
    #[error("call at {0:#x} inside a machine block")]
    UnsupportedCall(u64),
    #[error("unsupported statement at {addr:#x}: {stmt}")]
    UnsupportedArchStmt { addr: u64, stmt: String },
    #[error("translation error at {addr:#x}: {message}")]
    TranslateError { addr: u64, message: String },
    #[error("block ends in architecture terminator {term} at {addr:#x}")]
    ArchTerminator { addr: u64, term: String },
}

/// A verification event
#[derive(Clone, Debug, PartialEq)]
pub enum Event<A: Arch> {
    /// An SMT command to add to the verification context
    Command(Command),
    /// The translation approximated something; the verification result may be weaker than
    /// expected
    Warning(String),
    /// Execution reached the instruction at the given address
    Instruction(u64),
    /// A memory read; `var` is not yet defined, the consumer binds it to the value read
    MemRead {
        addr: Term,
        repr: MemRepr,
        var: String,
        class: MemoryAccessKind,
    },
    /// A memory write of `value`
    MemWrite {
        addr: Term,
        repr: MemRepr,
        value: Term,
        class: MemoryAccessKind,
    },
    /// The block ends; execution continues from the given register state
    FetchAndExecute(UnorderedMap<A::Reg, Term>),
}

/// The sort of values of a type; tuples have none
pub fn sort_of(tp: &TypeRepr) -> Option<Sort> {
    match tp {
        TypeRepr::Bool => Some(Sort::Bool),
        TypeRepr::Tuple(_) => None,
        _ => tp.bit_width().map(Sort::BitVec),
    }
}

/// Architecture-specific encoding of functions and statements
pub trait ArchSmtHooks<A: Arch> {
    /// An exact term for an architecture function, or `None` if the function must be
    /// approximated by an unconstrained value
    fn arch_fn_term(&self, gen: &mut BlockEventGen<A>, f: &A::Fn) -> Result<Option<Term>, VcgError>;

    /// Emit the events for an architecture statement
    fn arch_stmt(&self, gen: &mut BlockEventGen<A>, s: &A::Stmt) -> Result<(), VcgError>;
}

/// What an assignment is bound to
#[derive(Clone, Debug)]
enum Binding {
    Term(Term),
    /// A value without a term, such as a tuple
    Opaque,
}

/// The state of the translation of a single machine block
pub struct BlockEventGen<'a, A: Arch> {
    events: Vec<Event<A>>,
    next_local: u64,
    start_addr: u64,
    curr_addr: u64,
    initial_regs: &'a UnorderedMap<A::Reg, Term>,
    classifier: &'a MemoryClassifier,
    bindings: UnorderedMap<AssignId, Binding>,
}

/// The result of translating a machine block
#[derive(Debug)]
pub struct BlockEvents<A: Arch> {
    pub events: Vec<Event<A>>,
    /// First local index not used by the block
    pub next_local: u64,
    /// Number of bytes of machine code in the block
    pub size: u64,
}

impl<'a, A: Arch> BlockEventGen<'a, A> {
    fn new(
        initial_regs: &'a UnorderedMap<A::Reg, Term>,
        start_addr: u64,
        next_local: u64,
        classifier: &'a MemoryClassifier,
    ) -> Self {
        Self {
            events: vec![],
            next_local,
            start_addr,
            curr_addr: start_addr,
            initial_regs,
            classifier,
            bindings: Default::default(),
        }
    }

    /// Address of the instruction currently being translated
    pub fn curr_addr(&self) -> u64 {
        self.curr_addr
    }

    pub fn emit(&mut self, e: Event<A>) {
        self.events.push(e);
    }

    /// A fresh local name
    pub fn fresh_name(&mut self) -> String {
        let n = format!("x{}", self.next_local);
        self.next_local += 1;
        n
    }

    /// Define a fresh local equal to `body`, returning it
    pub fn define(&mut self, sort: Sort, body: Term) -> Term {
        let name = self.fresh_name();
        self.emit(Event::Command(Command::DefineFun {
            name: name.clone(),
            params: vec![],
            sort,
            body,
        }));
        Term::Var(name)
    }

    /// Declare a fresh unconstrained local, returning it
    pub fn declare(&mut self, sort: Sort) -> Term {
        let name = self.fresh_name();
        self.emit(Event::Command(Command::DeclareFun {
            name: name.clone(),
            params: vec![],
            sort,
        }));
        Term::Var(name)
    }

    /// Record an approximation
    pub fn warn(&mut self, msg: String) {
        warn!("Approximating"; "addr" => format!("{:#x}", self.curr_addr), "what" => &msg);
        self.emit(Event::Warning(msg));
    }

    /// The classification of the memory access at the current instruction
    pub fn classify(&self) -> Result<MemoryAccessKind, VcgError> {
        self.classifier
            .classify(self.curr_addr)
            .cloned()
            .ok_or(VcgError::MissingClassification(self.curr_addr))
    }

    /// The term for a value
    pub fn value_term(&self, v: &Value<A>) -> Result<Term, VcgError> {
        match v {
            Value::BV(l) => Ok(Term::bv(l.width(), l.magnitude())),
            Value::Bool(b) => Ok(Term::Bool(*b)),
            Value::Assigned(a) => match self.bindings.get(&a.id()) {
                Some(Binding::Term(t)) => Ok(t.clone()),
                Some(Binding::Opaque) => Err(VcgError::OpaqueValue(a.id().to_string())),
                None => Err(VcgError::UnboundAssignment(a.id())),
            },
            Value::Initial(r) => self
                .initial_regs
                .get(r)
                .cloned()
                .ok_or_else(|| VcgError::MissingInitialRegister(r.to_string())),
            Value::Phi(_) | Value::Return(_) | Value::Arg(..) | Value::FunctionEntry(_) => {
                Err(VcgError::FunctionLevelValue(v.to_string()))
            }
        }
    }

    fn bind(&mut self, id: AssignId, b: Binding) -> Result<(), VcgError> {
        if self.bindings.insert(id, b).is_some() {
            return Err(IrError::DuplicateAssignment(id).into());
        }
        Ok(())
    }

    /// Bind an approximated assignment to an unconstrained value
    fn approximate(&mut self, a: &Assignment<A>, what: String) -> Result<(), VcgError> {
        self.warn(format!("{}: {}", a.id(), what));
        let b = match sort_of(a.type_repr()) {
            Some(sort) => Binding::Term(self.declare(sort)),
            None => Binding::Opaque,
        };
        self.bind(a.id(), b)
    }

    fn assignment<H: ArchSmtHooks<A>>(
        &mut self,
        hooks: &H,
        a: &Assignment<A>,
    ) -> Result<(), VcgError> {
        trace!("Translating assignment"; "assignment" => %a);
        match a.rhs() {
            AssignRhs::EvalApp(app) => match self.app_term(app)? {
                Some(t) => {
                    let sort = sort_of(a.type_repr()).ok_or_else(|| {
                        VcgError::OpaqueValue(a.id().to_string())
                    })?;
                    let v = self.define(sort, t);
                    self.bind(a.id(), Binding::Term(v))
                }
                None => self.approximate(a, format!("{} is not encoded exactly", app.mnemonic())),
            },
            AssignRhs::SetUndefined(tp) => {
                let b = match sort_of(tp) {
                    Some(sort) => Binding::Term(self.declare(sort)),
                    None => Binding::Opaque,
                };
                self.bind(a.id(), b)
            }
            AssignRhs::ReadMem { addr, repr } => {
                let addr = self.value_term(addr)?;
                let class = self.classify()?;
                let var = self.fresh_name();
                self.emit(Event::MemRead {
                    addr,
                    repr: repr.clone(),
                    var: var.clone(),
                    class,
                });
                self.bind(a.id(), Binding::Term(Term::Var(var)))
            }
            AssignRhs::CondReadMem { .. } => Err(VcgError::UnsupportedConditionalRead(a.id())),
            AssignRhs::EvalArchFn(f) => match hooks.arch_fn_term(self, f)? {
                Some(t) => {
                    let sort = sort_of(a.type_repr())
                        .ok_or_else(|| VcgError::OpaqueValue(a.id().to_string()))?;
                    let v = self.define(sort, t);
                    self.bind(a.id(), Binding::Term(v))
                }
                None => self.approximate(a, format!("{} is not encoded", f)),
            },
        }
    }

    /// The exact term for an application, or `None` if it is approximated
    fn app_term(&self, app: &App<A>) -> Result<Option<Term>, VcgError> {
        use App::*;
        let t = |v: &Value<A>| self.value_term(v);
        let bin = |name: &'static str,
                   a: &Value<A>,
                   b: &Value<A>|
         -> Result<Option<Term>, VcgError> {
            Ok(Some(Term::bvop(name, t(a)?, t(b)?)))
        };
        let res = match app {
            Eq(a, b) => Term::eq(t(a)?, t(b)?),
            // Tuples have no sort, so a choice between two of them is opaque too
            Mux(tp, ..) if sort_of(tp).is_none() => return Ok(None),
            Mux(_, c, x, y) => Term::ite(t(c)?, t(x)?, t(y)?),
            AndApp(a, b) => Term::and(t(a)?, t(b)?),
            OrApp(a, b) => Term::or(t(a)?, t(b)?),
            XorApp(a, b) => Term::xor(t(a)?, t(b)?),
            NotApp(a) => Term::not(t(a)?),
            Trunc { value, to, .. } => Term::extract(to - 1, 0, t(value)?),
            SExt { value, from, to } => Term::sign_extend(to - from, t(value)?),
            UExt { value, from, to } => Term::zero_extend(to - from, t(value)?),
            Bitcast { value, from, to } => {
                // Non-boolean flat types are all bitvectors of the same width
                match (from, to) {
                    (TypeRepr::Bool, TypeRepr::Bool) => t(value)?,
                    (TypeRepr::Bool, _) => Term::bool_to_bv(1, t(value)?),
                    (_, TypeRepr::Bool) => Term::bit(0, t(value)?),
                    _ => t(value)?,
                }
            }
            TupleField { .. } => return Ok(None),
            Concat { hi, lo, .. } => Term::concat(t(hi)?, t(lo)?),
            UpperHalf(w, a) => Term::extract(2 * w - 1, *w, t(a)?),
            LowerHalf(w, a) => Term::extract(w - 1, 0, t(a)?),
            BVAdd(_, a, b) => return bin("bvadd", a, b),
            BVAdc(w, a, b, c) => Term::bvop(
                "bvadd",
                Term::bvop("bvadd", t(a)?, t(b)?),
                Term::bool_to_bv(*w, t(c)?),
            ),
            BVSub(_, a, b) => return bin("bvsub", a, b),
            BVSbb(w, a, b, c) => Term::bvop(
                "bvsub",
                Term::bvop("bvsub", t(a)?, t(b)?),
                Term::bool_to_bv(*w, t(c)?),
            ),
            BVMul(_, a, b) => return bin("bvmul", a, b),
            BVUnsignedDiv(_, a, b) => return bin("bvudiv", a, b),
            BVUnsignedRem(_, a, b) => return bin("bvurem", a, b),
            BVSignedDiv(_, a, b) => return bin("bvsdiv", a, b),
            BVSignedRem(_, a, b) => return bin("bvsrem", a, b),
            BVUnsignedLt(_, a, b) => return bin("bvult", a, b),
            BVUnsignedLe(_, a, b) => return bin("bvule", a, b),
            BVSignedLt(_, a, b) => return bin("bvslt", a, b),
            BVSignedLe(_, a, b) => return bin("bvsle", a, b),
            BVTestBit(_, x, i) => Term::bit(0, Term::bvop("bvlshr", t(x)?, t(i)?)),
            BVComplement(_, a) => Term::bvnot(t(a)?),
            BVAnd(_, a, b) => return bin("bvand", a, b),
            BVOr(_, a, b) => return bin("bvor", a, b),
            BVXor(_, a, b) => return bin("bvxor", a, b),
            BVShl(_, a, b) => return bin("bvshl", a, b),
            BVShr(_, a, b) => return bin("bvlshr", a, b),
            BVSar(_, a, b) => return bin("bvashr", a, b),
            UadcOverflows(w, a, b, c) => {
                overflow_term(OverflowOp::Add, false, *w, t(a)?, t(b)?, t(c)?)
            }
            SadcOverflows(w, a, b, c) => {
                overflow_term(OverflowOp::Add, true, *w, t(a)?, t(b)?, t(c)?)
            }
            UsbbOverflows(w, a, b, c) => {
                overflow_term(OverflowOp::Sub, false, *w, t(a)?, t(b)?, t(c)?)
            }
            SsbbOverflows(w, a, b, c) => {
                overflow_term(OverflowOp::Sub, true, *w, t(a)?, t(b)?, t(c)?)
            }
            PopCount(w, a) => {
                let x = t(a)?;
                (0..*w)
                    .map(|i| {
                        let b = Term::extract(i, i, x.clone());
                        if *w == 1 {
                            b
                        } else {
                            Term::zero_extend(w - 1, b)
                        }
                    })
                    .reduce(|acc, b| Term::bvop("bvadd", acc, b))
                    .unwrap_or_else(|| Term::bv(*w, 0))
            }
            ReverseBytes(w, a) => {
                let x = t(a)?;
                // Least significant byte first, so it ends up most significant
                (0..w / 8)
                    .map(|i| Term::extract(8 * i + 7, 8 * i, x.clone()))
                    .reduce(Term::concat)
                    .unwrap_or(x)
            }
            Bsf(w, a) => {
                let x = t(a)?;
                (0..*w).rev().fold(Term::bv(*w, *w as u128), |acc, i| {
                    Term::ite(Term::bit(i, x.clone()), Term::bv(*w, i as u128), acc)
                })
            }
            Bsr(w, a) => {
                let x = t(a)?;
                (0..*w).fold(Term::ones(*w), |acc, i| {
                    Term::ite(Term::bit(i, x.clone()), Term::bv(*w, i as u128), acc)
                })
            }
            EvenParity(a) => {
                let x = t(a)?;
                let parity = (0..8)
                    .map(|i| Term::extract(i, i, x.clone()))
                    .reduce(|acc, b| Term::bvop("bvxor", acc, b))
                    .unwrap_or_else(|| Term::bv(1, 0));
                Term::eq(parity, Term::bv(1, 0))
            }
            FPAdd(..) | FPSub(..) | FPMul(..) | FPDiv(..) | FPSqrt(..) | FPLt(..) | FPEq(..)
            | FPIsNaN(..) | FPCvt { .. } | FPFromSignedBV { .. } | FPToSignedBV { .. } => {
                return Ok(None)
            }
        };
        Ok(Some(res))
    }

    fn stmt<H: ArchSmtHooks<A>>(&mut self, hooks: &H, s: &Stmt<A>) -> Result<(), VcgError> {
        match s {
            Stmt::Assign(a) => self.assignment(hooks, a),
            Stmt::WriteMem { addr, repr, value } => {
                let addr = self.value_term(addr)?;
                let value = self.value_term(value)?;
                let class = self.classify()?;
                self.emit(Event::MemWrite {
                    addr,
                    repr: repr.clone(),
                    value,
                    class,
                });
                Ok(())
            }
            Stmt::CondWriteMem { .. } => Err(VcgError::UnsupportedConditionalWrite(self.curr_addr)),
            Stmt::Call(_) => Err(VcgError::UnsupportedCall(self.curr_addr)),
            Stmt::Arch(s) => hooks.arch_stmt(self, s),
            Stmt::Comment(_) => Ok(()),
            Stmt::InstructionStart { offset, mnemonic } => {
                self.curr_addr = self.start_addr + offset;
                debug!("Instruction"; "addr" => format!("{:#x}", self.curr_addr), "mnemonic" => mnemonic);
                self.emit(Event::Instruction(self.curr_addr));
                Ok(())
            }
        }
    }

    fn term(&mut self, term: &BlockTerm<A>) -> Result<(), VcgError> {
        match term {
            BlockTerm::FetchAndExecute(regs) => {
                let regs = regs
                    .iter()
                    .map(|(r, v)| Ok((r.clone(), self.value_term(v)?)))
                    .collect::<Result<UnorderedMap<_, _>, VcgError>>()?;
                self.emit(Event::FetchAndExecute(regs));
                Ok(())
            }
            BlockTerm::TranslateError { message, .. } => Err(VcgError::TranslateError {
                addr: self.curr_addr,
                message: message.clone(),
            }),
            BlockTerm::Arch { stmt, .. } => Err(VcgError::ArchTerminator {
                addr: self.curr_addr,
                term: stmt.to_string(),
            }),
        }
    }
}

/// Whether an overflow is of an addition or of a subtraction
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum OverflowOp {
    Add,
    Sub,
}

/// Overflow of `a op b op carry` at width `w`, computed at width `w + 1`. An unsigned
/// operation overflows iff bit `w` of the zero-extended result is set; a signed one iff bits
/// `w` and `w - 1` of the sign-extended result differ.
fn overflow_term(op: OverflowOp, signed: bool, w: u32, a: Term, b: Term, carry: Term) -> Term {
    let ext = |x| {
        if signed {
            Term::sign_extend(1, x)
        } else {
            Term::zero_extend(1, x)
        }
    };
    let name = match op {
        OverflowOp::Add => "bvadd",
        OverflowOp::Sub => "bvsub",
    };
    let r = Term::bvop(
        name,
        Term::bvop(name, ext(a), ext(b)),
        Term::bool_to_bv(w + 1, carry),
    );
    if signed {
        Term::distinct(Term::extract(w, w, r.clone()), Term::extract(w - 1, w - 1, r))
    } else {
        Term::bit(w, r)
    }
}

/// Translate a machine block into verification events.
///
/// `initial_regs` gives the symbolic value of every register on entry, `start_addr` is the
/// address of the block, and locals are numbered from `next_local`.
pub fn block_events<A: Arch, H: ArchSmtHooks<A>>(
    hooks: &H,
    block: &MachineBlock<A>,
    initial_regs: &UnorderedMap<A::Reg, Term>,
    start_addr: u64,
    next_local: u64,
    classifier: &MemoryClassifier,
) -> Result<BlockEvents<A>, VcgError> {
    debug!("Generating events for block"; "addr" => format!("{:#x}", start_addr));
    let mut gen = BlockEventGen::new(initial_regs, start_addr, next_local, classifier);
    for s in &block.stmts {
        gen.stmt(hooks, s)?;
    }
    gen.term(&block.term)?;
    Ok(BlockEvents {
        events: gen.events,
        next_local: gen.next_local,
        size: block.size,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::il::IdGen;
    use crate::types::FloatInfo;
    use crate::x86_64::{X86Reg, X86SmtHooks, X86_64};

    fn regs() -> UnorderedMap<X86Reg, Term> {
        vec![(X86Reg::RAX, Term::var("rax0")), (X86Reg::RDI, Term::var("rdi0"))]
            .into_iter()
            .collect()
    }

    fn run(
        stmts: Vec<Stmt<X86_64>>,
        out: Vec<(X86Reg, Value<X86_64>)>,
    ) -> Result<BlockEvents<X86_64>, VcgError> {
        let block = MachineBlock {
            addr: 0x1000,
            size: 8,
            stmts,
            term: BlockTerm::FetchAndExecute(out.into_iter().collect()),
        };
        let classifier: MemoryClassifier =
            vec![(0x1004, MemoryAccessKind::Heap)].into_iter().collect();
        block_events(&X86SmtHooks, &block, &regs(), 0x1000, 7, &classifier)
    }

    #[test]
    fn assignments_define_fresh_locals() {
        let mut ids = IdGen::default();
        let (s, v) = ids
            .app(App::BVAdd(64, Value::Initial(X86Reg::RAX), Value::bv(64, 1)))
            .unwrap();
        let res = run(vec![s], vec![(X86Reg::RAX, v)]).unwrap();
        assert_eq!(res.next_local, 8);
        assert_eq!(res.size, 8);
        assert_eq!(
            res.events[0],
            Event::Command(Command::DefineFun {
                name: "x7".into(),
                params: vec![],
                sort: Sort::BitVec(64),
                body: Term::bvop("bvadd", Term::var("rax0"), Term::bv(64, 1)),
            })
        );
        match &res.events[1] {
            Event::FetchAndExecute(r) => assert_eq!(r.get(&X86Reg::RAX), Some(&Term::var("x7"))),
            e => panic!("Unexpected event {:?}", e),
        }
    }

    #[test]
    fn memory_accesses_use_the_instruction_address() {
        let mut ids = IdGen::default();
        let rd = ids
            .assign(AssignRhs::ReadMem {
                addr: Value::Initial(X86Reg::RDI),
                repr: MemRepr::le(8),
            })
            .unwrap();
        let stmts = vec![
            Stmt::InstructionStart {
                offset: 4,
                mnemonic: "mov rax, [rdi]".into(),
            },
            Stmt::Assign(rd.clone()),
        ];
        let res = run(stmts, vec![(X86Reg::RAX, Value::Assigned(rd))]).unwrap();
        assert_eq!(res.events[0], Event::Instruction(0x1004));
        assert_eq!(
            res.events[1],
            Event::MemRead {
                addr: Term::var("rdi0"),
                repr: MemRepr::le(8),
                var: "x7".into(),
                class: MemoryAccessKind::Heap,
            }
        );

        // Same read without the instruction marker is at the block start, which is unclassified
        let mut ids = IdGen::default();
        let rd = ids
            .assign(AssignRhs::ReadMem {
                addr: Value::Initial(X86Reg::RDI),
                repr: MemRepr::le(8),
            })
            .unwrap();
        assert_eq!(
            run(vec![Stmt::Assign(rd)], vec![]).unwrap_err(),
            VcgError::MissingClassification(0x1000)
        );
    }

    #[test]
    fn floating_point_is_approximated() {
        let mut ids = IdGen::default();
        let x = ids
            .assign(AssignRhs::SetUndefined(TypeRepr::Float(FloatInfo::Double)))
            .unwrap();
        let (s, _) = ids
            .app(App::FPSqrt(FloatInfo::Double, Value::Assigned(x.clone())))
            .unwrap();
        let res = run(vec![Stmt::Assign(x), s], vec![]).unwrap();
        assert_eq!(
            res.events[0],
            Event::Command(Command::DeclareFun {
                name: "x7".into(),
                params: vec![],
                sort: Sort::BitVec(64),
            })
        );
        assert!(matches!(res.events[1], Event::Warning(_)));
        assert!(matches!(
            res.events[2],
            Event::Command(Command::DeclareFun { .. })
        ));
    }

    #[test]
    fn choices_between_tuples_are_approximated() {
        let tuple = TypeRepr::Tuple(vec![TypeRepr::BV(32), TypeRepr::BV(32)]);
        let mut ids = IdGen::default();
        let x = ids.assign(AssignRhs::SetUndefined(tuple.clone())).unwrap();
        let y = ids.assign(AssignRhs::SetUndefined(tuple)).unwrap();
        let (s, _) = ids
            .app(App::mux(
                Value::Bool(true),
                Value::Assigned(x.clone()),
                Value::Assigned(y.clone()),
            ).unwrap())
            .unwrap();
        let res = run(vec![Stmt::Assign(x), Stmt::Assign(y), s], vec![]).unwrap();
        assert_eq!(res.events.len(), 2);
        assert!(matches!(&res.events[0], Event::Warning(w) if w.contains("mux")));
        assert!(matches!(res.events[1], Event::FetchAndExecute(_)));
        assert_eq!(res.next_local, 7);
    }

    #[test]
    fn unsupported_forms_are_fatal() {
        assert_eq!(
            run(vec![], vec![(X86Reg::RBX, Value::Initial(X86Reg::RBX))]).unwrap_err(),
            VcgError::MissingInitialRegister("rbx".into())
        );
        let mut ids = IdGen::default();
        let rd = ids
            .assign::<X86_64>(AssignRhs::CondReadMem {
                repr: MemRepr::le(8),
                cond: Value::Bool(true),
                addr: Value::Initial(X86Reg::RDI),
                default: Value::bv(64, 0),
            })
            .unwrap();
        assert_eq!(
            run(vec![Stmt::Assign(rd.clone())], vec![]).unwrap_err(),
            VcgError::UnsupportedConditionalRead(rd.id())
        );
    }
}
