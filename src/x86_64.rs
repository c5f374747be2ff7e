//! The x86-64 architecture: registers, architecture-specific functions and statements, and
//! their lowering for both backends.

use crate::arch::Arch;
use crate::il::Value;
use crate::llvm::{Type, Typed};
use crate::llvm_gen::{ArchLlvmHooks, BlockGen, LlvmGenError};
use crate::llvm_intrinsics as intrinsics;
use crate::smt::Term;
use crate::types::{Endian, TypeRepr};
use crate::vcg::{ArchSmtHooks, BlockEventGen, VcgError};

/// The x86-64 architecture tag
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct X86_64;

/// Status flags
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum X86Flag {
    Cf,
    Pf,
    Af,
    Zf,
    Sf,
    Df,
    Of,
}

impl X86Flag {
    const ALL: [X86Flag; 7] = [
        X86Flag::Cf,
        X86Flag::Pf,
        X86Flag::Af,
        X86Flag::Zf,
        X86Flag::Sf,
        X86Flag::Df,
        X86Flag::Of,
    ];
}

impl std::fmt::Display for X86Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            X86Flag::Cf => "cf",
            X86Flag::Pf => "pf",
            X86Flag::Af => "af",
            X86Flag::Zf => "zf",
            X86Flag::Sf => "sf",
            X86Flag::Df => "df",
            X86Flag::Of => "of",
        };
        write!(f, "{}", s)
    }
}

/// A machine register
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum X86Reg {
    Rip,
    /// General purpose register, numbered as in the instruction encoding
    Gp(u8),
    Flag(X86Flag),
    /// Vector register, in its full 256-bit form
    Ymm(u8),
}

impl X86Reg {
    pub const RAX: X86Reg = X86Reg::Gp(0);
    pub const RCX: X86Reg = X86Reg::Gp(1);
    pub const RDX: X86Reg = X86Reg::Gp(2);
    pub const RBX: X86Reg = X86Reg::Gp(3);
    pub const RSP: X86Reg = X86Reg::Gp(4);
    pub const RBP: X86Reg = X86Reg::Gp(5);
    pub const RSI: X86Reg = X86Reg::Gp(6);
    pub const RDI: X86Reg = X86Reg::Gp(7);
    pub const R8: X86Reg = X86Reg::Gp(8);
    pub const R9: X86Reg = X86Reg::Gp(9);
    pub const R10: X86Reg = X86Reg::Gp(10);
    pub const R11: X86Reg = X86Reg::Gp(11);
    pub const R12: X86Reg = X86Reg::Gp(12);
    pub const R13: X86Reg = X86Reg::Gp(13);
    pub const R14: X86Reg = X86Reg::Gp(14);
    pub const R15: X86Reg = X86Reg::Gp(15);
}

const GP_NAMES: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];

impl std::fmt::Display for X86Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            X86Reg::Rip => write!(f, "rip"),
            X86Reg::Gp(n) => match GP_NAMES.get(*n as usize) {
                Some(s) => write!(f, "{}", s),
                None => write!(f, "gp{}", n),
            },
            X86Reg::Flag(fl) => write!(f, "{}", fl),
            X86Reg::Ymm(n) => write!(f, "ymm{}", n),
        }
    }
}

lazy_static::lazy_static! {
    /// Every register of the machine state, in a fixed order
    pub static ref X86_REGS: Vec<X86Reg> = std::iter::once(X86Reg::Rip)
        .chain((0..16).map(X86Reg::Gp))
        .chain(X86Flag::ALL.iter().copied().map(X86Reg::Flag))
        .chain((0..16).map(X86Reg::Ymm))
        .collect();
}

/// Operations that produce a value but have no closed-form encoding
#[derive(Clone, PartialEq, Debug)]
pub enum X86Fn {
    ReadFsBase,
    ReadGsBase,
    /// `cpuid`, returning `(eax, ebx, ecx, edx)`
    CpuId {
        leaf: Value<X86_64>,
        subleaf: Value<X86_64>,
    },
    /// Time stamp counter
    Rdtsc,
    /// `xgetbv` of the given extended control register, as `edx:eax`
    XGetBv(Value<X86_64>),
    /// Byte shuffle of `width_bytes`-byte vectors
    PShufb {
        width_bytes: u32,
        src: Value<X86_64>,
        idx: Value<X86_64>,
    },
}

impl std::fmt::Display for X86Fn {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            X86Fn::ReadFsBase => write!(f, "read_fs_base"),
            X86Fn::ReadGsBase => write!(f, "read_gs_base"),
            X86Fn::CpuId { leaf, subleaf } => write!(f, "cpuid {} {}", leaf, subleaf),
            X86Fn::Rdtsc => write!(f, "rdtsc"),
            X86Fn::XGetBv(v) => write!(f, "xgetbv {}", v),
            X86Fn::PShufb {
                width_bytes,
                src,
                idx,
            } => write!(f, "pshufb<{}> {} {}", width_bytes, src, idx),
        }
    }
}

/// Statements with effects beyond memory and registers
#[derive(Clone, PartialEq, Debug)]
pub enum X86Stmt {
    /// `fnstcw` to the given address
    StoreX87Control(Value<X86_64>),
    /// `rep movs` of `count` elements of `bytes` bytes each; `df` is the direction flag
    RepMovs {
        bytes: u32,
        dest: Value<X86_64>,
        src: Value<X86_64>,
        count: Value<X86_64>,
        df: Value<X86_64>,
    },
    /// `rep stos` of `count` copies of `value`
    RepStos {
        bytes: u32,
        dest: Value<X86_64>,
        value: Value<X86_64>,
        count: Value<X86_64>,
        df: Value<X86_64>,
    },
    Emms,
}

impl std::fmt::Display for X86Stmt {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            X86Stmt::StoreX87Control(a) => write!(f, "fnstcw {}", a),
            X86Stmt::RepMovs {
                bytes,
                dest,
                src,
                count,
                df,
            } => write!(f, "rep_movs<{}> {} {} {} {}", bytes, dest, src, count, df),
            X86Stmt::RepStos {
                bytes,
                dest,
                value,
                count,
                df,
            } => write!(f, "rep_stos<{}> {} {} {} {}", bytes, dest, value, count, df),
            X86Stmt::Emms => write!(f, "emms"),
        }
    }
}

/// Terminators that leave the recovered code
#[derive(Clone, PartialEq, Debug)]
pub enum X86TermStmt {
    Hlt,
    Ud2,
    Syscall,
}

impl std::fmt::Display for X86TermStmt {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            X86TermStmt::Hlt => write!(f, "hlt"),
            X86TermStmt::Ud2 => write!(f, "ud2"),
            X86TermStmt::Syscall => write!(f, "syscall"),
        }
    }
}

impl Arch for X86_64 {
    type Reg = X86Reg;
    type Fn = X86Fn;
    type Stmt = X86Stmt;
    type TermStmt = X86TermStmt;

    fn endianness() -> Endian {
        Endian::Little
    }

    fn reg_type(reg: &X86Reg) -> TypeRepr {
        match reg {
            X86Reg::Rip | X86Reg::Gp(_) => TypeRepr::BV(64),
            X86Reg::Flag(_) => TypeRepr::Bool,
            X86Reg::Ymm(_) => TypeRepr::BV(256),
        }
    }

    fn fn_type(f: &X86Fn) -> TypeRepr {
        match f {
            X86Fn::ReadFsBase | X86Fn::ReadGsBase | X86Fn::Rdtsc | X86Fn::XGetBv(_) => {
                TypeRepr::BV(64)
            }
            X86Fn::CpuId { .. } => TypeRepr::Tuple(vec![TypeRepr::BV(32); 4]),
            X86Fn::PShufb { width_bytes, .. } => TypeRepr::BV(8 * width_bytes),
        }
    }

    fn fn_operands(f: &X86Fn) -> Vec<&Value<X86_64>> {
        match f {
            X86Fn::ReadFsBase | X86Fn::ReadGsBase | X86Fn::Rdtsc => vec![],
            X86Fn::CpuId { leaf, subleaf } => vec![leaf, subleaf],
            X86Fn::XGetBv(v) => vec![v],
            X86Fn::PShufb { src, idx, .. } => vec![src, idx],
        }
    }

    fn stmt_operands(s: &X86Stmt) -> Vec<&Value<X86_64>> {
        match s {
            X86Stmt::StoreX87Control(a) => vec![a],
            X86Stmt::RepMovs {
                dest,
                src,
                count,
                df,
                ..
            } => vec![dest, src, count, df],
            X86Stmt::RepStos {
                dest,
                value,
                count,
                df,
                ..
            } => vec![dest, value, count, df],
            X86Stmt::Emms => vec![],
        }
    }
}

/// Target IR lowering of x86-64 operations
#[derive(Clone, Copy, Debug, Default)]
pub struct X86LlvmHooks;

impl X86LlvmHooks {
    /// String operations are only lowered when they provably run forwards
    fn forwards(s: &X86Stmt, df: &Value<X86_64>) -> Result<(), LlvmGenError> {
        match df.as_bool_literal() {
            Some(false) => Ok(()),
            _ => Err(LlvmGenError::Unsupported(format!(
                "{} with a direction flag that may be set",
                s
            ))),
        }
    }

    /// `count * bytes` as an i64
    fn byte_len(
        gen: &mut BlockGen<X86_64>,
        count: &Value<X86_64>,
        bytes: u32,
    ) -> Result<Typed, LlvmGenError> {
        let c = gen.value(count)?;
        if bytes == 1 {
            return Ok(c);
        }
        Ok(gen.assign(Type::Int(64), format!("mul {}, {}", c, bytes)))
    }
}

impl ArchLlvmHooks<X86_64> for X86LlvmHooks {
    fn lower_arch_fn(
        &self,
        gen: &mut BlockGen<X86_64>,
        f: &X86Fn,
    ) -> Result<Typed, LlvmGenError> {
        match f {
            X86Fn::ReadFsBase => Ok(gen.assign(
                Type::Int(64),
                "call i64 asm sideeffect \"rdfsbase $0\", \"=r\"()",
            )),
            X86Fn::ReadGsBase => Ok(gen.assign(
                Type::Int(64),
                "call i64 asm sideeffect \"rdgsbase $0\", \"=r\"()",
            )),
            X86Fn::CpuId { leaf, subleaf } => {
                let l = gen.value(leaf)?;
                let s = gen.value(subleaf)?;
                let tp = Type::Struct(vec![Type::Int(32); 4]);
                Ok(gen.assign(
                    tp.clone(),
                    format!(
                        "call {} asm sideeffect \"cpuid\", \"={{ax}},={{bx}},={{cx}},={{dx}},{{ax}},{{cx}}\"({}, {})",
                        tp, l, s
                    ),
                ))
            }
            X86Fn::Rdtsc => gen.call(intrinsics::readcyclecounter(), vec![]),
            X86Fn::XGetBv(v) => {
                let x = gen.value(v)?;
                let tp = Type::Struct(vec![Type::Int(32); 2]);
                let r = gen.assign(
                    tp.clone(),
                    format!(
                        "call {} asm sideeffect \"xgetbv\", \"={{ax}},={{dx}},{{cx}}\"({})",
                        tp, x
                    ),
                );
                let lo = gen.assign(Type::Int(32), format!("extractvalue {}, 0", r));
                let hi = gen.assign(Type::Int(32), format!("extractvalue {}, 1", r));
                let lo = gen.assign(Type::Int(64), format!("zext {} to i64", lo));
                let hi = gen.assign(Type::Int(64), format!("zext {} to i64", hi));
                let hi = gen.assign(Type::Int(64), format!("shl {}, 32", hi));
                Ok(gen.assign(Type::Int(64), format!("or {}, {}", hi, lo.value)))
            }
            X86Fn::PShufb {
                width_bytes: 16,
                src,
                idx,
            } => {
                let v = Type::Vector(16, Box::new(Type::Int(8)));
                let s = gen.value(src)?;
                let s = gen.assign(v.clone(), format!("bitcast {} to {}", s, v));
                let i = gen.value(idx)?;
                let i = gen.assign(v.clone(), format!("bitcast {} to {}", i, v));
                let r = gen.call(intrinsics::pshufb128(), vec![s, i])?;
                Ok(gen.assign(Type::Int(128), format!("bitcast {} to i128", r)))
            }
            X86Fn::PShufb { width_bytes, .. } => Err(LlvmGenError::Unsupported(format!(
                "pshufb on {}-byte vectors",
                width_bytes
            ))),
        }
    }

    fn lower_arch_stmt(
        &self,
        gen: &mut BlockGen<X86_64>,
        s: &X86Stmt,
    ) -> Result<(), LlvmGenError> {
        match s {
            X86Stmt::StoreX87Control(addr) => {
                let a = gen.value(addr)?;
                let p = gen.inttoptr(a);
                gen.emit(format!(
                    "call void asm sideeffect \"fnstcw $0\", \"=*m\"(ptr elementtype(i16) {})",
                    p.value
                ));
                Ok(())
            }
            X86Stmt::RepMovs {
                bytes,
                dest,
                src,
                count,
                df,
            } => {
                Self::forwards(s, df)?;
                let d = gen.value(dest)?;
                let d = gen.inttoptr(d);
                let sv = gen.value(src)?;
                let sp = gen.inttoptr(sv);
                let len = Self::byte_len(gen, count, *bytes)?;
                gen.call_void(intrinsics::memmove(), vec![d, sp, len, Typed::bool(false)])
            }
            X86Stmt::RepStos {
                bytes: 1,
                dest,
                value,
                count,
                df,
            } => {
                Self::forwards(s, df)?;
                let d = gen.value(dest)?;
                let d = gen.inttoptr(d);
                let v = gen.value(value)?;
                let len = Self::byte_len(gen, count, 1)?;
                gen.call_void(intrinsics::memset(), vec![d, v, len, Typed::bool(false)])
            }
            X86Stmt::RepStos { bytes, .. } => Err(LlvmGenError::Unsupported(format!(
                "rep stos of {}-byte elements",
                bytes
            ))),
            X86Stmt::Emms => {
                gen.emit("call void asm sideeffect \"emms\", \"\"()".into());
                Ok(())
            }
        }
    }
}

/// Verification encoding of x86-64 operations
#[derive(Clone, Copy, Debug, Default)]
pub struct X86SmtHooks;

/// Exact `pshufb` on 128-bit vectors: byte `i` of the result is zero if bit 7 of index byte
/// `i` is set, and otherwise the byte of `src` selected by the low four bits of the index byte.
pub fn pshufb128_term(src: Term, idx: Term) -> Term {
    let byte = |i: u32| {
        let b = Term::extract(8 * i + 7, 8 * i, idx.clone());
        let shift = Term::bvop(
            "bvmul",
            Term::bvop("bvand", b.clone(), Term::bv(8, 0x0f)),
            Term::bv(8, 8),
        );
        let selected = Term::extract(
            7,
            0,
            Term::bvop("bvlshr", src.clone(), Term::zero_extend(120, shift)),
        );
        Term::ite(Term::bit(7, b), Term::bv(8, 0), selected)
    };
    (1..16).fold(byte(0), |acc, i| Term::concat(byte(i), acc))
}

impl ArchSmtHooks<X86_64> for X86SmtHooks {
    fn arch_fn_term(
        &self,
        gen: &mut BlockEventGen<X86_64>,
        f: &X86Fn,
    ) -> Result<Option<Term>, VcgError> {
        match f {
            X86Fn::PShufb {
                width_bytes: 16,
                src,
                idx,
            } => Ok(Some(pshufb128_term(
                gen.value_term(src)?,
                gen.value_term(idx)?,
            ))),
            _ => Ok(None),
        }
    }

    fn arch_stmt(&self, gen: &mut BlockEventGen<X86_64>, s: &X86Stmt) -> Result<(), VcgError> {
        match s {
            // No effect on the state tracked by verification
            X86Stmt::Emms => {
                gen.warn("emms ignored".into());
                Ok(())
            }
            _ => Err(VcgError::UnsupportedArchStmt {
                addr: gen.curr_addr(),
                stmt: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::containers::unordered::UnorderedMap;
    use crate::function::{BlockLabel, FnBlock, FnTermStmt, Function};
    use crate::generation_config::GenerationOptions;
    use crate::il::{AssignRhs, IdGen, Stmt};
    use crate::llvm_gen::generate_function;
    use crate::smt::test::{eval, Val};

    #[test]
    fn registers() {
        assert_eq!(X86Reg::R12.to_string(), "r12");
        assert_eq!(X86Reg::Flag(X86Flag::Zf).to_string(), "zf");
        assert_eq!(X86_64::reg_type(&X86Reg::Flag(X86Flag::Cf)), TypeRepr::Bool);
        assert_eq!(X86_64::reg_type(&X86Reg::Ymm(3)), TypeRepr::BV(256));
        assert_eq!(X86_REGS.len(), 1 + 16 + 7 + 16);
        assert!(X86_REGS.contains(&X86Reg::RSP));
    }

    #[test]
    fn pshufb_term_matches_the_instruction() {
        let src: u128 = 0x0f0e_0d0c_0b0a_0908_0706_0504_0302_0100 ^ 0xa5a5_a5a5_a5a5_a5a5_a5a5_a5a5_a5a5_a5a5;
        let idx_bytes: [u8; 16] = [
            0x00, 0x0f, 0x80, 0x13, 0x07, 0xff, 0x01, 0x0e, 0x7a, 0x05, 0x90, 0x02, 0x0b, 0x0c,
            0x03, 0x44,
        ];
        let idx = idx_bytes
            .iter()
            .rev()
            .fold(0u128, |acc, b| (acc << 8) | *b as u128);
        let expected = idx_bytes.iter().rev().fold(0u128, |acc, b| {
            let r = if b & 0x80 != 0 {
                0
            } else {
                (src >> (8 * (b & 0x0f) as u32)) & 0xff
            };
            (acc << 8) | r
        });

        let env: UnorderedMap<String, Val> = vec![
            ("src".to_string(), Val::BV(128, src)),
            ("idx".to_string(), Val::BV(128, idx)),
        ]
        .into_iter()
        .collect();
        let t = pshufb128_term(Term::var("src"), Term::var("idx"));
        assert_eq!(eval(&t, &env), Val::BV(128, expected));
    }

    fn single_block(stmts: Vec<Stmt<X86_64>>) -> Function<X86_64> {
        Function {
            name: "f".into(),
            addr: 0x1000,
            fn_type: Default::default(),
            entry: BlockLabel(0x1000),
            blocks: vec![FnBlock {
                label: BlockLabel(0x1000),
                size: 4,
                phis: vec![],
                stmts,
                term: FnTermStmt::Ret(vec![]),
                exit_regs: Default::default(),
            }],
        }
    }

    #[test]
    fn string_operations_need_a_clear_direction_flag() {
        let movs = |df| {
            single_block(vec![Stmt::Arch(X86Stmt::RepMovs {
                bytes: 8,
                dest: Value::bv(64, 0x2000),
                src: Value::bv(64, 0x3000),
                count: Value::bv(64, 4),
                df,
            })])
        };
        let opts = GenerationOptions::default();
        let (def, decls) = generate_function(&X86LlvmHooks, &opts, &movs(Value::Bool(false))).unwrap();
        let text = def.to_string();
        assert!(text.contains("mul i64 4, 8"), "{}", text);
        assert!(text.contains("call void @llvm.memmove.p0.p0.i64("), "{}", text);
        assert!(decls.get("llvm.memmove.p0.p0.i64").is_some());

        assert!(matches!(
            generate_function(&X86LlvmHooks, &opts, &movs(Value::Bool(true))),
            Err(LlvmGenError::Unsupported(_))
        ));
    }

    #[test]
    fn narrow_pshufb_is_unsupported() {
        let mut ids = IdGen::default();
        let a = ids
            .assign(AssignRhs::EvalArchFn(X86Fn::PShufb {
                width_bytes: 8,
                src: Value::bv(64, 0),
                idx: Value::bv(64, 0),
            }))
            .unwrap();
        let f = single_block(vec![Stmt::Assign(a)]);
        assert!(matches!(
            generate_function(&X86LlvmHooks, &GenerationOptions::default(), &f),
            Err(LlvmGenError::Unsupported(_))
        ));
    }
}
