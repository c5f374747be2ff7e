//! Types of IL values, and the descriptors used for memory accesses.

use itertools::Itertools;

/// Endianness
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum Endian {
    Big,
    Little,
}

/// A supported floating-point format.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum FloatInfo {
    /// IEEE-754 binary16
    Half,
    /// IEEE-754 binary32
    Single,
    /// IEEE-754 binary64
    Double,
    /// The x87 80-bit extended precision format
    X86_80,
}

impl FloatInfo {
    /// Number of bits used to store a value of this format
    pub fn bit_width(self) -> u32 {
        match self {
            FloatInfo::Half => 16,
            FloatInfo::Single => 32,
            FloatInfo::Double => 64,
            FloatInfo::X86_80 => 80,
        }
    }
}

impl std::fmt::Display for FloatInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FloatInfo::Half => write!(f, "f16"),
            FloatInfo::Single => write!(f, "f32"),
            FloatInfo::Double => write!(f, "f64"),
            FloatInfo::X86_80 => write!(f, "f80"),
        }
    }
}

/// The type of an IL value.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum TypeRepr {
    /// A truth value. Kept distinct from a 1-bit bitvector.
    Bool,
    /// A bitvector of the given (non-zero) width in bits
    BV(u32),
    /// A floating point value
    Float(FloatInfo),
    /// A tuple of values; only produced by architecture functions
    Tuple(Vec<TypeRepr>),
    /// A packed vector of `n` elements
    Vector(u32, Box<TypeRepr>),
}

impl TypeRepr {
    /// Number of bits needed to hold a value of this type. Tuples have no flat representation.
    pub fn bit_width(&self) -> Option<u32> {
        match self {
            TypeRepr::Bool => Some(1),
            TypeRepr::BV(w) => Some(*w),
            TypeRepr::Float(fi) => Some(fi.bit_width()),
            TypeRepr::Tuple(_) => None,
            TypeRepr::Vector(n, elem) => Some(n * elem.bit_width()?),
        }
    }

    /// The width, if this is a bitvector type
    pub fn bv_width(&self) -> Option<u32> {
        match self {
            TypeRepr::BV(w) => Some(*w),
            _ => None,
        }
    }

    /// Returns `true` iff the type is [`TypeRepr::Bool`]
    pub fn is_bool(&self) -> bool {
        matches!(self, TypeRepr::Bool)
    }

    /// Returns `true` iff the type (or an element of it) is floating point
    pub fn contains_float(&self) -> bool {
        match self {
            TypeRepr::Bool | TypeRepr::BV(_) => false,
            TypeRepr::Float(_) => true,
            TypeRepr::Tuple(ts) => ts.iter().any(|t| t.contains_float()),
            TypeRepr::Vector(_, e) => e.contains_float(),
        }
    }
}

impl std::fmt::Display for TypeRepr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TypeRepr::Bool => write!(f, "bool"),
            TypeRepr::BV(w) => write!(f, "bv{}", w),
            TypeRepr::Float(fi) => write!(f, "{}", fi),
            TypeRepr::Tuple(ts) => write!(f, "({})", ts.iter().join(", ")),
            TypeRepr::Vector(n, e) => write!(f, "<{} x {}>", n, e),
        }
    }
}

/// Describes how a value is laid out in memory: its width, and its endianness.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum MemRepr {
    /// An integer of `bytes` bytes
    BV { bytes: u32, endian: Endian },
    /// A floating point value
    Float { info: FloatInfo, endian: Endian },
    /// A packed vector of `count` elements laid out contiguously
    PackedVec { count: u32, elem: Box<MemRepr> },
}

impl MemRepr {
    /// A little-endian integer of `bytes` bytes
    pub fn le(bytes: u32) -> Self {
        MemRepr::BV {
            bytes,
            endian: Endian::Little,
        }
    }

    /// The type of value read or written through this representation
    pub fn type_repr(&self) -> TypeRepr {
        match self {
            MemRepr::BV { bytes, .. } => TypeRepr::BV(8 * bytes),
            MemRepr::Float { info, .. } => TypeRepr::Float(*info),
            MemRepr::PackedVec { count, elem } => {
                TypeRepr::Vector(*count, Box::new(elem.type_repr()))
            }
        }
    }

    /// Number of bytes touched by an access
    pub fn byte_size(&self) -> u32 {
        match self {
            MemRepr::BV { bytes, .. } => *bytes,
            // x87 values occupy 10 bytes in memory
            MemRepr::Float { info, .. } => info.bit_width() / 8,
            MemRepr::PackedVec { count, elem } => count * elem.byte_size(),
        }
    }

    /// Endianness of the access; packed vectors use the endianness of their elements
    pub fn endian(&self) -> Endian {
        match self {
            MemRepr::BV { endian, .. } | MemRepr::Float { endian, .. } => *endian,
            MemRepr::PackedVec { elem, .. } => elem.endian(),
        }
    }
}

impl std::fmt::Display for MemRepr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let e = |e: &Endian| match e {
            Endian::Big => "be",
            Endian::Little => "le",
        };
        match self {
            MemRepr::BV { bytes, endian } => write!(f, "bv{}{}", bytes * 8, e(endian)),
            MemRepr::Float { info, endian } => write!(f, "{}{}", info, e(endian)),
            MemRepr::PackedVec { count, elem } => write!(f, "{}x{}", count, elem),
        }
    }
}

/// The type of a function: its argument types, return types, and whether it is variadic.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Default)]
pub struct FunctionType {
    pub args: Vec<TypeRepr>,
    pub rets: Vec<TypeRepr>,
    pub var_args: bool,
}

impl std::fmt::Display for FunctionType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "({}", self.args.iter().join(", "))?;
        if self.var_args {
            write!(f, ", ...")?;
        }
        write!(f, ") -> ({})", self.rets.iter().join(", "))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn widths_of_composite_types() {
        let v = TypeRepr::Vector(4, Box::new(TypeRepr::Float(FloatInfo::Single)));
        assert_eq!(v.bit_width(), Some(128));
        assert!(v.contains_float());
        assert_eq!(
            TypeRepr::Tuple(vec![TypeRepr::BV(32), TypeRepr::Bool]).bit_width(),
            None
        );
        let m = MemRepr::PackedVec {
            count: 2,
            elem: Box::new(MemRepr::le(8)),
        };
        assert_eq!(m.byte_size(), 16);
        assert_eq!(
            m.type_repr(),
            TypeRepr::Vector(2, Box::new(TypeRepr::BV(64)))
        );
        assert_eq!(m.to_string(), "2xbv64le");
    }
}
