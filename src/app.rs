//! The closed set of pure operations over [`Value`]s.
//!
//! Every [`App`] carries the widths needed to fix its result type, so [`App::type_repr`] never
//! needs to look at its operands. [`App::validate`] checks that the operands agree with those
//! widths; every [`Assignment`](crate::il::Assignment) runs it on construction.

use crate::arch::Arch;
use crate::il::{expect_bv, expect_type, IrError, Value};
use crate::types::{FloatInfo, TypeRepr};
use itertools::Itertools;

/// A pure operation
#[derive(Clone, Debug, PartialEq)]
pub enum App<A: Arch> {
    /// Equality of two values of the same type
    Eq(Value<A>, Value<A>),
    /// `if c then t else f`, for values of the given type
    Mux(TypeRepr, Value<A>, Value<A>, Value<A>),
    /// Boolean conjunction
    AndApp(Value<A>, Value<A>),
    /// Boolean disjunction
    OrApp(Value<A>, Value<A>),
    /// Boolean exclusive-or
    XorApp(Value<A>, Value<A>),
    /// Boolean negation
    NotApp(Value<A>),

    /// Keep the low `to` bits of a `from`-bit value (`from > to`)
    Trunc { value: Value<A>, from: u32, to: u32 },
    /// Sign-extend a `from`-bit value to `to` bits (`from < to`)
    SExt { value: Value<A>, from: u32, to: u32 },
    /// Zero-extend a `from`-bit value to `to` bits (`from < to`)
    UExt { value: Value<A>, from: u32, to: u32 },
    /// Reinterpret the bits of a value at another type of the same bit width
    Bitcast {
        value: Value<A>,
        from: TypeRepr,
        to: TypeRepr,
    },
    /// Field `index` of a tuple with the given field types
    TupleField {
        fields: Vec<TypeRepr>,
        tuple: Value<A>,
        index: usize,
    },
    /// `hi` followed by `lo`; `hi` forms the most significant bits
    Concat {
        hi_width: u32,
        lo_width: u32,
        hi: Value<A>,
        lo: Value<A>,
    },
    /// The upper `n` bits of a `2n`-bit value
    UpperHalf(u32, Value<A>),
    /// The lower `n` bits of a `2n`-bit value
    LowerHalf(u32, Value<A>),

    BVAdd(u32, Value<A>, Value<A>),
    /// `a + b + carry`, where carry is a boolean
    BVAdc(u32, Value<A>, Value<A>, Value<A>),
    BVSub(u32, Value<A>, Value<A>),
    /// `a - b - borrow`, where borrow is a boolean
    BVSbb(u32, Value<A>, Value<A>, Value<A>),
    BVMul(u32, Value<A>, Value<A>),
    BVUnsignedDiv(u32, Value<A>, Value<A>),
    BVUnsignedRem(u32, Value<A>, Value<A>),
    BVSignedDiv(u32, Value<A>, Value<A>),
    BVSignedRem(u32, Value<A>, Value<A>),
    BVUnsignedLt(u32, Value<A>, Value<A>),
    BVUnsignedLe(u32, Value<A>, Value<A>),
    BVSignedLt(u32, Value<A>, Value<A>),
    BVSignedLe(u32, Value<A>, Value<A>),
    /// Whether bit `idx` of `a` is set; false if `idx` is out of range
    BVTestBit(u32, Value<A>, Value<A>),
    BVComplement(u32, Value<A>),
    BVAnd(u32, Value<A>, Value<A>),
    BVOr(u32, Value<A>, Value<A>),
    BVXor(u32, Value<A>, Value<A>),
    /// Left shift; amounts of at least the width produce zero
    BVShl(u32, Value<A>, Value<A>),
    /// Logical right shift; amounts of at least the width produce zero
    BVShr(u32, Value<A>, Value<A>),
    /// Arithmetic right shift; amounts of at least the width fill with the sign bit
    BVSar(u32, Value<A>, Value<A>),

    /// Whether `a + b + carry` overflows as an unsigned addition
    UadcOverflows(u32, Value<A>, Value<A>, Value<A>),
    /// Whether `a + b + carry` overflows as a signed addition
    SadcOverflows(u32, Value<A>, Value<A>, Value<A>),
    /// Whether `a - b - borrow` underflows as an unsigned subtraction
    UsbbOverflows(u32, Value<A>, Value<A>, Value<A>),
    /// Whether `a - b - borrow` overflows as a signed subtraction
    SsbbOverflows(u32, Value<A>, Value<A>, Value<A>),

    PopCount(u32, Value<A>),
    /// Reverse the order of bytes; width must be a multiple of 8
    ReverseBytes(u32, Value<A>),
    /// Index of the least significant set bit; `width` when the input is zero
    Bsf(u32, Value<A>),
    /// Index of the most significant set bit; all ones when the input is zero
    Bsr(u32, Value<A>),
    /// Whether an 8-bit value has an even number of set bits
    EvenParity(Value<A>),

    FPAdd(FloatInfo, Value<A>, Value<A>),
    FPSub(FloatInfo, Value<A>, Value<A>),
    FPMul(FloatInfo, Value<A>, Value<A>),
    FPDiv(FloatInfo, Value<A>, Value<A>),
    FPSqrt(FloatInfo, Value<A>),
    FPLt(FloatInfo, Value<A>, Value<A>),
    FPEq(FloatInfo, Value<A>, Value<A>),
    FPIsNaN(FloatInfo, Value<A>),
    /// Convert between float formats
    FPCvt {
        from: FloatInfo,
        value: Value<A>,
        to: FloatInfo,
    },
    /// Convert a signed integer to a float
    FPFromSignedBV {
        width: u32,
        value: Value<A>,
        to: FloatInfo,
    },
    /// Convert a float to a signed integer, rounding toward zero
    FPToSignedBV {
        from: FloatInfo,
        value: Value<A>,
        width: u32,
    },
}

impl<A: Arch> App<A> {
    /// Build a two-operand bitvector operation, taking its width from `a`
    pub fn with_width(
        ctor: fn(u32, Value<A>, Value<A>) -> Self,
        a: Value<A>,
        b: Value<A>,
    ) -> Result<Self, IrError> {
        let w = expect_bv(|| "first operand".into(), &a.type_repr())?;
        let app = ctor(w, a, b);
        app.validate()?;
        Ok(app)
    }

    /// Build a bitvector operation with a carry/borrow input, taking its width from `a`
    pub fn with_width_and_carry(
        ctor: fn(u32, Value<A>, Value<A>, Value<A>) -> Self,
        a: Value<A>,
        b: Value<A>,
        carry: Value<A>,
    ) -> Result<Self, IrError> {
        let w = expect_bv(|| "first operand".into(), &a.type_repr())?;
        let app = ctor(w, a, b, carry);
        app.validate()?;
        Ok(app)
    }

    /// Build a one-operand bitvector operation, taking its width from `a`
    pub fn unary_with_width(ctor: fn(u32, Value<A>) -> Self, a: Value<A>) -> Result<Self, IrError> {
        let w = expect_bv(|| "operand".into(), &a.type_repr())?;
        let app = ctor(w, a);
        app.validate()?;
        Ok(app)
    }

    /// Truncate `value` to `to` bits
    pub fn trunc(value: Value<A>, to: u32) -> Result<Self, IrError> {
        let from = expect_bv(|| "trunc".into(), &value.type_repr())?;
        let app = App::Trunc { value, from, to };
        app.validate()?;
        Ok(app)
    }

    /// Zero-extend `value` to `to` bits
    pub fn uext(value: Value<A>, to: u32) -> Result<Self, IrError> {
        let from = expect_bv(|| "uext".into(), &value.type_repr())?;
        let app = App::UExt { value, from, to };
        app.validate()?;
        Ok(app)
    }

    /// Sign-extend `value` to `to` bits
    pub fn sext(value: Value<A>, to: u32) -> Result<Self, IrError> {
        let from = expect_bv(|| "sext".into(), &value.type_repr())?;
        let app = App::SExt { value, from, to };
        app.validate()?;
        Ok(app)
    }

    /// Select between `t` and `f`
    pub fn mux(c: Value<A>, t: Value<A>, f: Value<A>) -> Result<Self, IrError> {
        let app = App::Mux(t.type_repr(), c, t, f);
        app.validate()?;
        Ok(app)
    }

    /// The type of the result. Depends only on the operation and its embedded widths.
    ///
    /// Panics if a [`App::TupleField`] index is out of range; validated apps never are.
    pub fn type_repr(&self) -> TypeRepr {
        use App::*;
        match self {
            Eq(..) | AndApp(..) | OrApp(..) | XorApp(..) | NotApp(..) => TypeRepr::Bool,
            BVUnsignedLt(..) | BVUnsignedLe(..) | BVSignedLt(..) | BVSignedLe(..) => {
                TypeRepr::Bool
            }
            BVTestBit(..) | EvenParity(..) => TypeRepr::Bool,
            UadcOverflows(..) | SadcOverflows(..) | UsbbOverflows(..) | SsbbOverflows(..) => {
                TypeRepr::Bool
            }
            FPLt(..) | FPEq(..) | FPIsNaN(..) => TypeRepr::Bool,
            Mux(tp, ..) => tp.clone(),
            Trunc { to, .. } | SExt { to, .. } | UExt { to, .. } => TypeRepr::BV(*to),
            Bitcast { to, .. } => to.clone(),
            TupleField { fields, index, .. } => fields[*index].clone(),
            Concat {
                hi_width, lo_width, ..
            } => TypeRepr::BV(hi_width + lo_width),
            UpperHalf(w, _) | LowerHalf(w, _) => TypeRepr::BV(*w),
            BVAdd(w, ..)
            | BVAdc(w, ..)
            | BVSub(w, ..)
            | BVSbb(w, ..)
            | BVMul(w, ..)
            | BVUnsignedDiv(w, ..)
            | BVUnsignedRem(w, ..)
            | BVSignedDiv(w, ..)
            | BVSignedRem(w, ..)
            | BVComplement(w, ..)
            | BVAnd(w, ..)
            | BVOr(w, ..)
            | BVXor(w, ..)
            | BVShl(w, ..)
            | BVShr(w, ..)
            | BVSar(w, ..)
            | PopCount(w, ..)
            | ReverseBytes(w, ..)
            | Bsf(w, ..)
            | Bsr(w, ..) => TypeRepr::BV(*w),
            FPAdd(fi, ..) | FPSub(fi, ..) | FPMul(fi, ..) | FPDiv(fi, ..) | FPSqrt(fi, ..) => {
                TypeRepr::Float(*fi)
            }
            FPCvt { to, .. } | FPFromSignedBV { to, .. } => TypeRepr::Float(*to),
            FPToSignedBV { width, .. } => TypeRepr::BV(*width),
        }
    }

    /// The values read by the operation, in order
    pub fn operands(&self) -> Vec<&Value<A>> {
        use App::*;
        match self {
            NotApp(a)
            | UpperHalf(_, a)
            | LowerHalf(_, a)
            | BVComplement(_, a)
            | PopCount(_, a)
            | ReverseBytes(_, a)
            | Bsf(_, a)
            | Bsr(_, a)
            | EvenParity(a)
            | FPSqrt(_, a)
            | FPIsNaN(_, a) => vec![a],
            Trunc { value, .. }
            | SExt { value, .. }
            | UExt { value, .. }
            | Bitcast { value, .. }
            | FPCvt { value, .. }
            | FPFromSignedBV { value, .. }
            | FPToSignedBV { value, .. } => vec![value],
            TupleField { tuple, .. } => vec![tuple],
            Eq(a, b) | AndApp(a, b) | OrApp(a, b) | XorApp(a, b) => vec![a, b],
            Concat { hi, lo, .. } => vec![hi, lo],
            BVAdd(_, a, b)
            | BVSub(_, a, b)
            | BVMul(_, a, b)
            | BVUnsignedDiv(_, a, b)
            | BVUnsignedRem(_, a, b)
            | BVSignedDiv(_, a, b)
            | BVSignedRem(_, a, b)
            | BVUnsignedLt(_, a, b)
            | BVUnsignedLe(_, a, b)
            | BVSignedLt(_, a, b)
            | BVSignedLe(_, a, b)
            | BVTestBit(_, a, b)
            | BVAnd(_, a, b)
            | BVOr(_, a, b)
            | BVXor(_, a, b)
            | BVShl(_, a, b)
            | BVShr(_, a, b)
            | BVSar(_, a, b)
            | FPAdd(_, a, b)
            | FPSub(_, a, b)
            | FPMul(_, a, b)
            | FPDiv(_, a, b)
            | FPLt(_, a, b)
            | FPEq(_, a, b) => vec![a, b],
            Mux(_, c, t, f) => vec![c, t, f],
            BVAdc(_, a, b, c)
            | BVSbb(_, a, b, c)
            | UadcOverflows(_, a, b, c)
            | SadcOverflows(_, a, b, c)
            | UsbbOverflows(_, a, b, c)
            | SsbbOverflows(_, a, b, c) => vec![a, b, c],
        }
    }

    /// A short name for the operation
    pub fn mnemonic(&self) -> &'static str {
        use App::*;
        match self {
            Eq(..) => "eq",
            Mux(..) => "mux",
            AndApp(..) => "and",
            OrApp(..) => "or",
            XorApp(..) => "xor",
            NotApp(..) => "not",
            Trunc { .. } => "trunc",
            SExt { .. } => "sext",
            UExt { .. } => "uext",
            Bitcast { .. } => "bitcast",
            TupleField { .. } => "tuple_field",
            Concat { .. } => "concat",
            UpperHalf(..) => "upper_half",
            LowerHalf(..) => "lower_half",
            BVAdd(..) => "bv_add",
            BVAdc(..) => "bv_adc",
            BVSub(..) => "bv_sub",
            BVSbb(..) => "bv_sbb",
            BVMul(..) => "bv_mul",
            BVUnsignedDiv(..) => "bv_udiv",
            BVUnsignedRem(..) => "bv_urem",
            BVSignedDiv(..) => "bv_sdiv",
            BVSignedRem(..) => "bv_srem",
            BVUnsignedLt(..) => "bv_ult",
            BVUnsignedLe(..) => "bv_ule",
            BVSignedLt(..) => "bv_slt",
            BVSignedLe(..) => "bv_sle",
            BVTestBit(..) => "bv_test_bit",
            BVComplement(..) => "bv_complement",
            BVAnd(..) => "bv_and",
            BVOr(..) => "bv_or",
            BVXor(..) => "bv_xor",
            BVShl(..) => "bv_shl",
            BVShr(..) => "bv_shr",
            BVSar(..) => "bv_sar",
            UadcOverflows(..) => "uadc_overflows",
            SadcOverflows(..) => "sadc_overflows",
            UsbbOverflows(..) => "usbb_overflows",
            SsbbOverflows(..) => "ssbb_overflows",
            PopCount(..) => "popcount",
            ReverseBytes(..) => "reverse_bytes",
            Bsf(..) => "bsf",
            Bsr(..) => "bsr",
            EvenParity(..) => "even_parity",
            FPAdd(..) => "fp_add",
            FPSub(..) => "fp_sub",
            FPMul(..) => "fp_mul",
            FPDiv(..) => "fp_div",
            FPSqrt(..) => "fp_sqrt",
            FPLt(..) => "fp_lt",
            FPEq(..) => "fp_eq",
            FPIsNaN(..) => "fp_is_nan",
            FPCvt { .. } => "fp_cvt",
            FPFromSignedBV { .. } => "fp_from_sbv",
            FPToSignedBV { .. } => "fp_to_sbv",
        }
    }

    /// Check that the operands agree with the embedded widths, and that the widths are related
    /// the way the operation requires.
    pub fn validate(&self) -> Result<(), IrError> {
        use App::*;
        let name = self.mnemonic();
        let has = |i: usize, expected: &TypeRepr, v: &Value<A>| {
            expect_type(
                || format!("operand {} of {}", i, name),
                expected,
                &v.type_repr(),
            )
        };
        let bv = |w: u32| {
            if w == 0 {
                Err(IrError::ZeroWidth(name.into()))
            } else {
                Ok(TypeRepr::BV(w))
            }
        };
        match self {
            Eq(a, b) => {
                if a.type_repr().bit_width().is_none() {
                    return Err(IrError::ExpectedBitvector {
                        context: "operand 0 of eq".into(),
                        found: a.type_repr(),
                    });
                }
                has(1, &a.type_repr(), b)
            }
            Mux(tp, c, t, f) => {
                has(0, &TypeRepr::Bool, c)?;
                has(1, tp, t)?;
                has(2, tp, f)
            }
            AndApp(a, b) | OrApp(a, b) | XorApp(a, b) => {
                has(0, &TypeRepr::Bool, a)?;
                has(1, &TypeRepr::Bool, b)
            }
            NotApp(a) => has(0, &TypeRepr::Bool, a),
            Trunc { value, from, to } => {
                has(0, &bv(*from)?, value)?;
                bv(*to)?;
                if from <= to {
                    return Err(IrError::InvalidWidths {
                        op: name,
                        from: *from,
                        to: *to,
                    });
                }
                Ok(())
            }
            SExt { value, from, to } | UExt { value, from, to } => {
                has(0, &bv(*from)?, value)?;
                if from >= to {
                    return Err(IrError::InvalidWidths {
                        op: name,
                        from: *from,
                        to: *to,
                    });
                }
                Ok(())
            }
            Bitcast { value, from, to } => {
                has(0, from, value)?;
                match (from.bit_width(), to.bit_width()) {
                    (Some(f), Some(t)) if f == t && f > 0 => Ok(()),
                    (f, t) => Err(IrError::InvalidWidths {
                        op: name,
                        from: f.unwrap_or(0),
                        to: t.unwrap_or(0),
                    }),
                }
            }
            TupleField {
                fields,
                tuple,
                index,
            } => {
                has(0, &TypeRepr::Tuple(fields.clone()), tuple)?;
                if *index >= fields.len() {
                    return Err(IrError::TupleIndexOutOfRange {
                        index: *index,
                        len: fields.len(),
                    });
                }
                Ok(())
            }
            Concat {
                hi_width,
                lo_width,
                hi,
                lo,
            } => {
                has(0, &bv(*hi_width)?, hi)?;
                has(1, &bv(*lo_width)?, lo)
            }
            UpperHalf(w, a) | LowerHalf(w, a) => has(0, &bv(2 * *w)?, a),
            BVAdd(w, a, b)
            | BVSub(w, a, b)
            | BVMul(w, a, b)
            | BVUnsignedDiv(w, a, b)
            | BVUnsignedRem(w, a, b)
            | BVSignedDiv(w, a, b)
            | BVSignedRem(w, a, b)
            | BVUnsignedLt(w, a, b)
            | BVUnsignedLe(w, a, b)
            | BVSignedLt(w, a, b)
            | BVSignedLe(w, a, b)
            | BVTestBit(w, a, b)
            | BVAnd(w, a, b)
            | BVOr(w, a, b)
            | BVXor(w, a, b)
            | BVShl(w, a, b)
            | BVShr(w, a, b)
            | BVSar(w, a, b) => {
                let t = bv(*w)?;
                has(0, &t, a)?;
                has(1, &t, b)
            }
            BVAdc(w, a, b, c)
            | BVSbb(w, a, b, c)
            | UadcOverflows(w, a, b, c)
            | SadcOverflows(w, a, b, c)
            | UsbbOverflows(w, a, b, c)
            | SsbbOverflows(w, a, b, c) => {
                let t = bv(*w)?;
                has(0, &t, a)?;
                has(1, &t, b)?;
                has(2, &TypeRepr::Bool, c)
            }
            BVComplement(w, a) | PopCount(w, a) | Bsf(w, a) | Bsr(w, a) => has(0, &bv(*w)?, a),
            ReverseBytes(w, a) => {
                if w % 8 != 0 {
                    return Err(IrError::InvalidWidths {
                        op: name,
                        from: *w,
                        to: *w,
                    });
                }
                has(0, &bv(*w)?, a)
            }
            EvenParity(a) => has(0, &TypeRepr::BV(8), a),
            FPAdd(fi, a, b)
            | FPSub(fi, a, b)
            | FPMul(fi, a, b)
            | FPDiv(fi, a, b)
            | FPLt(fi, a, b)
            | FPEq(fi, a, b) => {
                has(0, &TypeRepr::Float(*fi), a)?;
                has(1, &TypeRepr::Float(*fi), b)
            }
            FPSqrt(fi, a) | FPIsNaN(fi, a) => has(0, &TypeRepr::Float(*fi), a),
            FPCvt { from, value, .. } => has(0, &TypeRepr::Float(*from), value),
            FPFromSignedBV { width, value, .. } => has(0, &bv(*width)?, value),
            FPToSignedBV { from, value, width } => {
                bv(*width)?;
                has(0, &TypeRepr::Float(*from), value)
            }
        }
    }
}

impl<A: Arch> std::fmt::Display for App<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.mnemonic())?;
        match self {
            App::Trunc { to, .. } | App::SExt { to, .. } | App::UExt { to, .. } => {
                write!(f, "<{}>", to)?
            }
            App::Bitcast { to, .. } => write!(f, "<{}>", to)?,
            App::TupleField { index, .. } => write!(f, "<{}>", index)?,
            App::FPCvt { to, .. } | App::FPFromSignedBV { to, .. } => write!(f, "<{}>", to)?,
            App::FPToSignedBV { width, .. } => write!(f, "<{}>", width)?,
            _ => {}
        }
        write!(f, " {}", self.operands().iter().join(" "))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::il::{AssignRhs, IdGen};
    use crate::x86_64::{X86Reg, X86_64};

    type V = Value<X86_64>;

    #[test]
    fn result_type_ignores_operand_order() {
        let a: V = Value::Initial(X86Reg::RAX);
        let b: V = Value::bv(64, 7);
        let c: V = Value::Bool(true);
        for ctor in [
            App::BVAdd as fn(u32, V, V) -> App<X86_64>,
            App::BVSub,
            App::BVSignedLt,
            App::BVTestBit,
            App::BVShl,
        ] {
            let x = ctor(64, a.clone(), b.clone());
            let y = ctor(64, b.clone(), a.clone());
            assert_eq!(x.type_repr(), y.type_repr());
            x.validate().unwrap();
            y.validate().unwrap();
        }
        let x = App::UadcOverflows(64, a.clone(), b.clone(), c.clone());
        let y = App::UadcOverflows(64, b, a, c);
        assert_eq!(x.type_repr(), TypeRepr::Bool);
        assert_eq!(x.type_repr(), y.type_repr());
    }

    #[test]
    fn width_relations_are_checked_on_construction() {
        let v: V = Value::bv(32, 1);
        assert!(App::trunc(v.clone(), 16).is_ok());
        assert_eq!(
            App::trunc(v.clone(), 32).unwrap_err(),
            IrError::InvalidWidths {
                op: "trunc",
                from: 32,
                to: 32
            }
        );
        assert!(App::uext(v.clone(), 16).is_err());
        assert!(App::sext(v.clone(), 64).is_ok());
        assert!(App::with_width(App::BVAdd, v.clone(), Value::bv(16, 1)).is_err());
        assert!(App::<X86_64>::ReverseBytes(12, Value::bv(12, 0)).validate().is_err());
        assert!(App::<X86_64>::UpperHalf(16, Value::bv(32, 0)).validate().is_ok());
        assert!(App::<X86_64>::UpperHalf(16, Value::bv(16, 0)).validate().is_err());

        // Invalid apps never make it into an assignment
        let mut ids = IdGen::default();
        assert!(ids
            .assign(AssignRhs::EvalApp(App::<X86_64>::Trunc {
                value: v,
                from: 32,
                to: 64
            }))
            .is_err());
    }

    #[test]
    fn tuple_fields() {
        let fields = vec![TypeRepr::BV(32), TypeRepr::BV(16)];
        let mut ids = IdGen::default();
        let t = ids
            .assign::<X86_64>(AssignRhs::SetUndefined(TypeRepr::Tuple(fields.clone())))
            .unwrap();
        let app = App::TupleField {
            fields: fields.clone(),
            tuple: Value::Assigned(t.clone()),
            index: 1,
        };
        app.validate().unwrap();
        assert_eq!(app.type_repr(), TypeRepr::BV(16));
        let bad = App::TupleField {
            fields,
            tuple: Value::Assigned(t),
            index: 2,
        };
        assert_eq!(
            bad.validate().unwrap_err(),
            IrError::TupleIndexOutOfRange { index: 2, len: 2 }
        );
    }
}
