//! A minimal model of textual LLVM IR (opaque pointers): just enough structure to assemble
//! modules and print them.

use itertools::Itertools;

/// An LLVM type
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum Type {
    Int(u32),
    Half,
    Float,
    Double,
    X86Fp80,
    Ptr,
    Void,
    Vector(u32, Box<Type>),
    Struct(Vec<Type>),
}

impl Type {
    /// The suffix used to name overloaded intrinsics at this type (e.g., `i32`, `v1f64`)
    pub fn mangle(&self) -> String {
        match self {
            Type::Int(w) => format!("i{}", w),
            Type::Half => "f16".into(),
            Type::Float => "f32".into(),
            Type::Double => "f64".into(),
            Type::X86Fp80 => "f80".into(),
            Type::Ptr => "p0".into(),
            Type::Void => "isVoid".into(),
            Type::Vector(n, e) => format!("v{}{}", n, e.mangle()),
            Type::Struct(ts) => format!("sl_{}s", ts.iter().map(|t| t.mangle()).join("")),
        }
    }

    /// Number of bits of a first-class, non-aggregate value of this type
    pub fn bit_width(&self) -> Option<u32> {
        match self {
            Type::Int(w) => Some(*w),
            Type::Half => Some(16),
            Type::Float => Some(32),
            Type::Double => Some(64),
            Type::X86Fp80 => Some(80),
            Type::Vector(n, e) => Some(n * e.bit_width()?),
            Type::Ptr | Type::Void | Type::Struct(_) => None,
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Type::Int(_))
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Type::Int(w) => write!(f, "i{}", w),
            Type::Half => write!(f, "half"),
            Type::Float => write!(f, "float"),
            Type::Double => write!(f, "double"),
            Type::X86Fp80 => write!(f, "x86_fp80"),
            Type::Ptr => write!(f, "ptr"),
            Type::Void => write!(f, "void"),
            Type::Vector(n, e) => write!(f, "<{} x {}>", n, e),
            Type::Struct(ts) if ts.is_empty() => write!(f, "{{}}"),
            Type::Struct(ts) => write!(f, "{{ {} }}", ts.iter().join(", ")),
        }
    }
}

/// An operand, without its type
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Operand {
    /// `%name`
    Local(String),
    /// `@name`
    Global(String),
    /// An integer constant, printed as an unsigned decimal
    Int(u128),
    /// The all-ones integer constant of any width
    AllOnes,
    Bool(bool),
    Undef,
    /// A constant expression, printed verbatim
    Inline(String),
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Operand::Local(n) => write!(f, "%{}", n),
            Operand::Global(n) => write!(f, "@{}", n),
            Operand::Int(v) => write!(f, "{}", v),
            Operand::AllOnes => write!(f, "-1"),
            Operand::Bool(b) => write!(f, "{}", b),
            Operand::Undef => write!(f, "undef"),
            Operand::Inline(s) => write!(f, "{}", s),
        }
    }
}

/// An operand together with its type
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Typed {
    pub tp: Type,
    pub value: Operand,
}

impl Typed {
    pub fn new(tp: Type, value: Operand) -> Self {
        Self { tp, value }
    }

    /// An integer constant
    pub fn int(width: u32, v: u128) -> Self {
        Self::new(Type::Int(width), Operand::Int(v))
    }

    pub fn bool(b: bool) -> Self {
        Self::new(Type::Int(1), Operand::Bool(b))
    }
}

impl std::fmt::Display for Typed {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} {}", self.tp, self.value)
    }
}

/// A phi node
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Phi {
    /// Name of the result, without the leading `%`
    pub name: String,
    pub tp: Type,
    /// (value, predecessor label) pairs, one per incoming edge
    pub incoming: Vec<(Operand, String)>,
}

impl std::fmt::Display for Phi {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "%{} = phi {} {}",
            self.name,
            self.tp,
            self.incoming
                .iter()
                .map(|(v, l)| format!("[ {}, %{} ]", v, l))
                .join(", ")
        )
    }
}

/// A basic block. Instructions and the terminator are kept as text.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BasicBlock {
    pub label: String,
    pub phis: Vec<Phi>,
    pub instrs: Vec<String>,
    pub term: String,
}

impl std::fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "{}:", self.label)?;
        for p in &self.phis {
            writeln!(f, "  {}", p)?;
        }
        for i in &self.instrs {
            writeln!(f, "  {}", i)?;
        }
        writeln!(f, "  {}", self.term)
    }
}

/// A function definition
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub ret: Type,
    /// (type, name without `%`)
    pub params: Vec<(Type, String)>,
    /// The first block is the entry block
    pub blocks: Vec<BasicBlock>,
}

impl std::fmt::Display for FunctionDef {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(
            f,
            "define {} @{}({}) {{",
            self.ret,
            self.name,
            self.params
                .iter()
                .map(|(t, n)| format!("{} %{}", t, n))
                .join(", ")
        )?;
        for (i, b) in self.blocks.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", b)?;
        }
        writeln!(f, "}}")
    }
}

/// A declaration of an external function or intrinsic
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct FunctionDecl {
    pub name: String,
    pub ret: Type,
    pub args: Vec<Type>,
    /// Function attributes, such as `noreturn`
    pub attrs: Vec<String>,
}

impl FunctionDecl {
    pub fn new(name: impl Into<String>, ret: Type, args: Vec<Type>) -> Self {
        Self {
            name: name.into(),
            ret,
            args,
            attrs: vec![],
        }
    }
}

impl std::fmt::Display for FunctionDecl {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "declare {} @{}({})",
            self.ret,
            self.name,
            self.args.iter().join(", ")
        )?;
        for a in &self.attrs {
            write!(f, " {}", a)?;
        }
        Ok(())
    }
}

/// A module: declarations (printed sorted by name) followed by function definitions
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Module {
    pub decls: Vec<FunctionDecl>,
    pub functions: Vec<FunctionDef>,
}

impl std::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for d in self.decls.iter().sorted_by(|a, b| a.name.cmp(&b.name)) {
            writeln!(f, "{}", d)?;
        }
        for func in &self.functions {
            writeln!(f)?;
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn types_print_and_mangle() {
        let v = Type::Vector(1, Box::new(Type::Double));
        assert_eq!(v.to_string(), "<1 x double>");
        assert_eq!(v.mangle(), "v1f64");
        assert_eq!(Type::Struct(vec![]).to_string(), "{}");
        assert_eq!(
            Type::Struct(vec![Type::Int(64), Type::Int(1)]).to_string(),
            "{ i64, i1 }"
        );
        assert_eq!(Type::X86Fp80.bit_width(), Some(80));
    }

    #[test]
    fn module_printing() {
        let m = Module {
            decls: vec![
                FunctionDecl::new("llvm.ctpop.i8", Type::Int(8), vec![Type::Int(8)]),
                FunctionDecl::new("llvm.bswap.i32", Type::Int(32), vec![Type::Int(32)]),
            ],
            functions: vec![FunctionDef {
                name: "f".into(),
                ret: Type::Struct(vec![]),
                params: vec![(Type::Int(64), "arg0".into())],
                blocks: vec![BasicBlock {
                    label: "block_10".into(),
                    phis: vec![],
                    instrs: vec![],
                    term: "ret {} undef".into(),
                }],
            }],
        };
        assert_eq!(
            m.to_string(),
            "declare i32 @llvm.bswap.i32(i32)\n\
             declare i8 @llvm.ctpop.i8(i8)\n\
             \n\
             define {} @f(i64 %arg0) {\n\
             block_10:\n  ret {} undef\n}\n"
        );
    }
}
