//! SMT-LIB terms and commands, as consumed by the verification backend.

use itertools::Itertools;

/// Sort of an SMT term
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum Sort {
    Bool,
    BitVec(u32),
}

impl std::fmt::Display for Sort {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Sort::Bool => write!(f, "Bool"),
            Sort::BitVec(w) => write!(f, "(_ BitVec {})", w),
        }
    }
}

/// The function symbol of an application
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum SmtFn {
    /// A plain symbol, such as `bvadd` or `ite`
    Named(&'static str),
    /// `(_ extract hi lo)`
    Extract { hi: u32, lo: u32 },
    /// `(_ zero_extend n)`
    ZeroExtend(u32),
    /// `(_ sign_extend n)`
    SignExtend(u32),
}

impl std::fmt::Display for SmtFn {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SmtFn::Named(n) => write!(f, "{}", n),
            SmtFn::Extract { hi, lo } => write!(f, "(_ extract {} {})", hi, lo),
            SmtFn::ZeroExtend(n) => write!(f, "(_ zero_extend {})", n),
            SmtFn::SignExtend(n) => write!(f, "(_ sign_extend {})", n),
        }
    }
}

/// An SMT term
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Term {
    Var(String),
    Bool(bool),
    /// A bitvector literal; `value < 2^width`
    BV { width: u32, value: u128 },
    App { func: SmtFn, args: Vec<Term> },
}

fn mask(width: u32) -> u128 {
    if width >= 128 {
        u128::MAX
    } else {
        (1u128 << width) - 1
    }
}

impl Term {
    pub fn var(name: impl Into<String>) -> Self {
        Term::Var(name.into())
    }

    /// A bitvector literal; `value` is reduced modulo `2^width`.
    ///
    /// Panics if `width` is zero. Widths come from validated IL, where zero-width types are
    /// rejected when assignments are validated.
    pub fn bv(width: u32, value: u128) -> Self {
        assert!(width > 0, "Zero-width bitvector term");
        Term::BV {
            width,
            value: value & mask(width),
        }
    }

    /// The all-ones bitvector
    pub fn ones(width: u32) -> Self {
        Self::bv(width, u128::MAX)
    }

    pub fn app(name: &'static str, args: Vec<Term>) -> Self {
        Term::App {
            func: SmtFn::Named(name),
            args,
        }
    }

    fn indexed(func: SmtFn, arg: Term) -> Self {
        Term::App {
            func,
            args: vec![arg],
        }
    }

    pub fn not(a: Term) -> Self {
        Self::app("not", vec![a])
    }
    pub fn and(a: Term, b: Term) -> Self {
        Self::app("and", vec![a, b])
    }
    pub fn or(a: Term, b: Term) -> Self {
        Self::app("or", vec![a, b])
    }
    pub fn xor(a: Term, b: Term) -> Self {
        Self::app("xor", vec![a, b])
    }
    pub fn eq(a: Term, b: Term) -> Self {
        Self::app("=", vec![a, b])
    }
    pub fn distinct(a: Term, b: Term) -> Self {
        Self::app("distinct", vec![a, b])
    }
    pub fn ite(c: Term, t: Term, f: Term) -> Self {
        Self::app("ite", vec![c, t, f])
    }

    /// A binary bitvector operation, such as `bvadd`
    pub fn bvop(name: &'static str, a: Term, b: Term) -> Self {
        Self::app(name, vec![a, b])
    }
    pub fn bvnot(a: Term) -> Self {
        Self::app("bvnot", vec![a])
    }
    pub fn concat(hi: Term, lo: Term) -> Self {
        Self::app("concat", vec![hi, lo])
    }
    /// Bits `hi` down to `lo` of `a`, inclusive. Panics if `hi < lo`; callers derive both
    /// from validated widths.
    pub fn extract(hi: u32, lo: u32, a: Term) -> Self {
        assert!(hi >= lo, "Empty extraction");
        Self::indexed(SmtFn::Extract { hi, lo }, a)
    }
    pub fn zero_extend(n: u32, a: Term) -> Self {
        Self::indexed(SmtFn::ZeroExtend(n), a)
    }
    pub fn sign_extend(n: u32, a: Term) -> Self {
        Self::indexed(SmtFn::SignExtend(n), a)
    }

    /// `true` iff bit `i` of `a` is set
    pub fn bit(i: u32, a: Term) -> Self {
        Self::eq(Self::extract(i, i, a), Self::bv(1, 1))
    }

    /// The boolean `c` as a `width`-bit 0 or 1
    pub fn bool_to_bv(width: u32, c: Term) -> Self {
        Self::ite(c, Self::bv(width, 1), Self::bv(width, 0))
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Term::Var(v) => write!(f, "{}", v),
            Term::Bool(b) => write!(f, "{}", b),
            Term::BV { width, value } => {
                if width % 4 == 0 {
                    write!(f, "#x{:0w$x}", value, w = (*width / 4) as usize)
                } else {
                    write!(f, "#b{:0w$b}", value, w = *width as usize)
                }
            }
            Term::App { func, args } => write!(f, "({} {})", func, args.iter().join(" ")),
        }
    }
}

/// A top-level SMT-LIB command
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Command {
    DefineFun {
        name: String,
        params: Vec<(String, Sort)>,
        sort: Sort,
        body: Term,
    },
    DeclareFun {
        name: String,
        params: Vec<Sort>,
        sort: Sort,
    },
}

impl Command {
    /// The symbol introduced by the command
    pub fn name(&self) -> &str {
        match self {
            Command::DefineFun { name, .. } | Command::DeclareFun { name, .. } => name,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Command::DefineFun {
                name,
                params,
                sort,
                body,
            } => write!(
                f,
                "(define-fun {} ({}) {} {})",
                name,
                params
                    .iter()
                    .map(|(n, s)| format!("({} {})", n, s))
                    .join(" "),
                sort,
                body
            ),
            Command::DeclareFun { name, params, sort } => {
                write!(f, "(declare-fun {} ({}) {})", name, params.iter().join(" "), sort)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::containers::unordered::UnorderedMap;

    /// A concrete value of a term
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub(crate) enum Val {
        Bool(bool),
        BV(u32, u128),
    }

    impl Val {
        pub(crate) fn bool(self) -> bool {
            match self {
                Val::Bool(b) => b,
                _ => panic!("Expected a boolean, got {:?}", self),
            }
        }
        pub(crate) fn bv(self) -> (u32, u128) {
            match self {
                Val::BV(w, v) => (w, v),
                _ => panic!("Expected a bitvector, got {:?}", self),
            }
        }
    }

    fn sext(w: u32, v: u128) -> i128 {
        if w < 128 && v >> (w - 1) & 1 == 1 {
            (v | !mask(w)) as i128
        } else {
            v as i128
        }
    }

    /// Evaluate the (bitvector/boolean) fragment of SMT-LIB that the verification backend emits.
    /// Only supports widths below 128 bits.
    pub(crate) fn eval(t: &Term, env: &UnorderedMap<String, Val>) -> Val {
        match t {
            Term::Var(v) => *env.get(v).unwrap_or_else(|| panic!("Unbound {}", v)),
            Term::Bool(b) => Val::Bool(*b),
            Term::BV { width, value } => Val::BV(*width, *value),
            Term::App { func, args } => {
                let args: Vec<Val> = args.iter().map(|a| eval(a, env)).collect();
                match func {
                    SmtFn::Extract { hi, lo } => {
                        let (_, v) = args[0].bv();
                        Val::BV(hi - lo + 1, (v >> lo) & mask(hi - lo + 1))
                    }
                    SmtFn::ZeroExtend(n) => {
                        let (w, v) = args[0].bv();
                        Val::BV(w + n, v)
                    }
                    SmtFn::SignExtend(n) => {
                        let (w, v) = args[0].bv();
                        Val::BV(w + n, sext(w, v) as u128 & mask(w + n))
                    }
                    SmtFn::Named(name) => eval_named(name, &args),
                }
            }
        }
    }

    fn eval_named(name: &str, args: &[Val]) -> Val {
        let bin = |f: fn(u128, u128, u32) -> u128| {
            let (w, a) = args[0].bv();
            let (_, b) = args[1].bv();
            Val::BV(w, f(a, b, w) & mask(w))
        };
        match name {
            "not" => Val::Bool(!args[0].bool()),
            "and" => Val::Bool(args.iter().all(|a| a.bool())),
            "or" => Val::Bool(args.iter().any(|a| a.bool())),
            "xor" => Val::Bool(args[0].bool() ^ args[1].bool()),
            "=" => Val::Bool(args[0] == args[1]),
            "distinct" => Val::Bool(args[0] != args[1]),
            "ite" => {
                if args[0].bool() {
                    args[1]
                } else {
                    args[2]
                }
            }
            "concat" => {
                let (wh, h) = args[0].bv();
                let (wl, l) = args[1].bv();
                Val::BV(wh + wl, (h << wl) | l)
            }
            "bvnot" => {
                let (w, a) = args[0].bv();
                Val::BV(w, !a & mask(w))
            }
            "bvadd" => bin(|a, b, _| a.wrapping_add(b)),
            "bvsub" => bin(|a, b, _| a.wrapping_sub(b)),
            "bvmul" => bin(|a, b, _| a.wrapping_mul(b)),
            "bvand" => bin(|a, b, _| a & b),
            "bvor" => bin(|a, b, _| a | b),
            "bvxor" => bin(|a, b, _| a ^ b),
            "bvshl" => bin(|a, b, w| if b >= w as u128 { 0 } else { a << b }),
            "bvlshr" => bin(|a, b, w| if b >= w as u128 { 0 } else { a >> b }),
            "bvashr" => bin(|a, b, w| {
                let s = sext(w, a);
                (if b >= w as u128 { s >> (w - 1) } else { s >> b }) as u128
            }),
            "bvult" => Val::Bool(args[0].bv().1 < args[1].bv().1),
            "bvule" => Val::Bool(args[0].bv().1 <= args[1].bv().1),
            "bvslt" => {
                let (w, a) = args[0].bv();
                Val::Bool(sext(w, a) < sext(w, args[1].bv().1))
            }
            "bvsle" => {
                let (w, a) = args[0].bv();
                Val::Bool(sext(w, a) <= sext(w, args[1].bv().1))
            }
            _ => panic!("No evaluation rule for {}", name),
        }
    }

    #[test]
    fn literal_printing() {
        assert_eq!(Term::bv(8, 0x2a).to_string(), "#x2a");
        assert_eq!(Term::bv(64, 1).to_string(), "#x0000000000000001");
        assert_eq!(Term::bv(3, 5).to_string(), "#b101");
        assert_eq!(Term::bv(1, 2).to_string(), "#b0");
        assert_eq!(
            Term::extract(7, 0, Term::var("x1")).to_string(),
            "((_ extract 7 0) x1)"
        );
    }

    #[test]
    fn command_printing() {
        let c = Command::DefineFun {
            name: "x0".into(),
            params: vec![],
            sort: Sort::BitVec(32),
            body: Term::bvop("bvadd", Term::var("x1"), Term::bv(32, 1)),
        };
        assert_eq!(
            c.to_string(),
            "(define-fun x0 () (_ BitVec 32) (bvadd x1 #x00000001))"
        );
        let d = Command::DeclareFun {
            name: "x2".into(),
            params: vec![],
            sort: Sort::Bool,
        };
        assert_eq!(d.to_string(), "(declare-fun x2 () Bool)");
        assert_eq!(d.name(), "x2");
    }

    #[test]
    fn evaluator_agrees_with_bitvector_semantics() {
        let env = UnorderedMap::new();
        let t = Term::sign_extend(4, Term::bv(4, 0b1001));
        assert_eq!(eval(&t, &env), Val::BV(8, 0b1111_1001));
        let t = Term::bvop("bvashr", Term::bv(4, 0b1000), Term::bv(4, 9));
        assert_eq!(eval(&t, &env), Val::BV(4, 0b1111));
        let t = Term::concat(Term::bv(4, 0xa), Term::bv(8, 0xbc));
        assert_eq!(eval(&t, &env), Val::BV(12, 0xabc));
    }

    #[test]
    #[should_panic(expected = "Zero-width bitvector term")]
    fn zero_width_literals_are_rejected() {
        Term::bv(0, 0);
    }

    #[test]
    #[should_panic(expected = "Empty extraction")]
    fn extraction_bounds_must_be_ordered() {
        Term::extract(2, 3, Term::var("x"));
    }
}
