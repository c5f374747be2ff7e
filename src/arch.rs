//! The architecture capability interface.
//!
//! The IL is parameterized by an architecture tag implementing [`Arch`]. Registers,
//! architecture-specific functions (pure-ish operations without a closed-form [`App`]
//! encoding), architecture-specific statements and terminators are opaque to the rest of the
//! crate; only the architecture itself (and its backend hooks) can interpret them.
//!
//! [`App`]: crate::app::App

use crate::il::Value;
use crate::types::{Endian, TypeRepr};

/// An architecture the IL can be recovered for.
pub trait Arch: Sized + Clone + Copy + PartialEq + Eq + std::fmt::Debug + 'static {
    /// Machine registers
    type Reg: Clone + PartialEq + Eq + PartialOrd + Ord + std::hash::Hash + std::fmt::Debug
        + std::fmt::Display;
    /// Architecture-specific functions that produce a value
    type Fn: Clone + PartialEq + std::fmt::Debug + std::fmt::Display;
    /// Architecture-specific statements that have effects but produce no value
    type Stmt: Clone + PartialEq + std::fmt::Debug + std::fmt::Display;
    /// Architecture-specific block terminators (e.g., `hlt`, `syscall`)
    type TermStmt: Clone + PartialEq + std::fmt::Debug + std::fmt::Display;

    /// Byte order of the architecture's memory
    fn endianness() -> Endian;

    /// The type of a register
    fn reg_type(reg: &Self::Reg) -> TypeRepr;

    /// The result type of an architecture function
    fn fn_type(f: &Self::Fn) -> TypeRepr;

    /// The values an architecture function reads
    fn fn_operands(f: &Self::Fn) -> Vec<&Value<Self>>;

    /// The values an architecture statement reads
    fn stmt_operands(s: &Self::Stmt) -> Vec<&Value<Self>>;
}
