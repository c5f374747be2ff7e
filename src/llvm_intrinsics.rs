//! Declarations of the LLVM intrinsics (and runtime functions) the target-IR backend calls.

use crate::llvm::{FunctionDecl, Type};

/// Name of the function called when a lookup table index is out of range
pub const LOOKUP_TABLE_FAILURE: &str = "rivet.lookup_table_failure";

/// `llvm.{s,u}{add,sub}.with.overflow.iN`
pub fn with_overflow(signed: bool, sub: bool, width: u32) -> FunctionDecl {
    let name = format!(
        "llvm.{}{}.with.overflow.i{}",
        if signed { "s" } else { "u" },
        if sub { "sub" } else { "add" },
        width
    );
    FunctionDecl::new(
        name,
        Type::Struct(vec![Type::Int(width), Type::Int(1)]),
        vec![Type::Int(width), Type::Int(width)],
    )
}

/// Count leading zeros; the flag argument makes a zero input poison
pub fn ctlz(width: u32) -> FunctionDecl {
    FunctionDecl::new(
        format!("llvm.ctlz.i{}", width),
        Type::Int(width),
        vec![Type::Int(width), Type::Int(1)],
    )
}

/// Count trailing zeros; the flag argument makes a zero input poison
pub fn cttz(width: u32) -> FunctionDecl {
    FunctionDecl::new(
        format!("llvm.cttz.i{}", width),
        Type::Int(width),
        vec![Type::Int(width), Type::Int(1)],
    )
}

pub fn ctpop(width: u32) -> FunctionDecl {
    FunctionDecl::new(
        format!("llvm.ctpop.i{}", width),
        Type::Int(width),
        vec![Type::Int(width)],
    )
}

/// Byte swap of an integer, or of each element of an integer vector
pub fn bswap(tp: &Type) -> FunctionDecl {
    FunctionDecl::new(
        format!("llvm.bswap.{}", tp.mangle()),
        tp.clone(),
        vec![tp.clone()],
    )
}

/// Single-element masked load: `(ptr, align, mask, passthru) -> <1 x T>`
pub fn masked_load(elem: &Type) -> FunctionDecl {
    let v = Type::Vector(1, Box::new(elem.clone()));
    FunctionDecl::new(
        format!("llvm.masked.load.{}.p0", v.mangle()),
        v.clone(),
        vec![
            Type::Ptr,
            Type::Int(32),
            Type::Vector(1, Box::new(Type::Int(1))),
            v,
        ],
    )
}

/// Single-element masked store: `(value, ptr, align, mask)`
pub fn masked_store(elem: &Type) -> FunctionDecl {
    let v = Type::Vector(1, Box::new(elem.clone()));
    FunctionDecl::new(
        format!("llvm.masked.store.{}.p0", v.mangle()),
        Type::Void,
        vec![
            v,
            Type::Ptr,
            Type::Int(32),
            Type::Vector(1, Box::new(Type::Int(1))),
        ],
    )
}

pub fn sqrt(tp: &Type) -> FunctionDecl {
    FunctionDecl::new(
        format!("llvm.sqrt.{}", tp.mangle()),
        tp.clone(),
        vec![tp.clone()],
    )
}

pub fn readcyclecounter() -> FunctionDecl {
    FunctionDecl::new("llvm.readcyclecounter", Type::Int(64), vec![])
}

/// `memmove(dest, src, len, is_volatile)`
pub fn memmove() -> FunctionDecl {
    FunctionDecl::new(
        "llvm.memmove.p0.p0.i64",
        Type::Void,
        vec![Type::Ptr, Type::Ptr, Type::Int(64), Type::Int(1)],
    )
}

/// `memset(dest, byte, len, is_volatile)`
pub fn memset() -> FunctionDecl {
    FunctionDecl::new(
        "llvm.memset.p0.i64",
        Type::Void,
        vec![Type::Ptr, Type::Int(8), Type::Int(64), Type::Int(1)],
    )
}

/// SSSE3 `pshufb` on 128-bit registers
pub fn pshufb128() -> FunctionDecl {
    let v = Type::Vector(16, Box::new(Type::Int(8)));
    FunctionDecl::new("llvm.x86.ssse3.pshuf.b.128", v.clone(), vec![v.clone(), v])
}

pub fn lookup_table_failure() -> FunctionDecl {
    let mut d = FunctionDecl::new(LOOKUP_TABLE_FAILURE, Type::Void, vec![]);
    d.attrs.push("noreturn".into());
    d
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn names_follow_llvm_overloading() {
        assert_eq!(
            with_overflow(true, false, 32).to_string(),
            "declare { i32, i1 } @llvm.sadd.with.overflow.i32(i32, i32)"
        );
        assert_eq!(with_overflow(false, true, 8).name, "llvm.usub.with.overflow.i8");
        assert_eq!(
            masked_load(&Type::Int(64)).to_string(),
            "declare <1 x i64> @llvm.masked.load.v1i64.p0(ptr, i32, <1 x i1>, <1 x i64>)"
        );
        assert_eq!(
            masked_store(&Type::Double).name,
            "llvm.masked.store.v1f64.p0"
        );
        assert_eq!(
            bswap(&Type::Vector(2, Box::new(Type::Int(64)))).name,
            "llvm.bswap.v2i64"
        );
        assert_eq!(
            lookup_table_failure().to_string(),
            "declare void @rivet.lookup_table_failure() noreturn"
        );
    }
}
