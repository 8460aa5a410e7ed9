/// A single fixed-width tape instruction
///
/// Clauses operate on a small array of value slots; slot 0 is reserved as a
/// sentinel and is never written.  The encoding is *fused*: an operand that
/// was constant in the source graph is packed into the clause as an inline
/// `f32` immediate rather than being loaded from a separate table.
///
/// Arguments, in order, are
/// - Output slot
/// - LHS slot
/// - RHS slot (or immediate for `*Imm`)
///
/// Two meta-clauses structure the tape itself:
/// - [`Jump`](Clause::Jump) transfers evaluation across subtape chunk
///   boundaries; its payload is a signed offset in clauses
/// - [`End`](Clause::End) terminates the tape and names the result slot
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Clause {
    /// Marks the end of the tape; the argument is the result slot
    End(u8),

    /// Negate the given slot
    NegReg(u8, u8),
    /// Take the absolute value of the given slot
    AbsReg(u8, u8),
    /// Take the square root of the given slot
    SqrtReg(u8, u8),
    /// Square the given slot
    SquareReg(u8, u8),
    /// Sine of the given slot
    SinReg(u8, u8),
    /// Cosine of the given slot
    CosReg(u8, u8),
    /// Arcsine of the given slot
    AsinReg(u8, u8),
    /// Arccosine of the given slot
    AcosReg(u8, u8),
    /// Arctangent of the given slot
    AtanReg(u8, u8),
    /// Exponential of the given slot
    ExpReg(u8, u8),
    /// Natural log of the given slot
    LnReg(u8, u8),

    /// Copies the given slot
    CopyReg(u8, u8),
    /// Copy an immediate to a slot
    CopyImm(u8, f32),

    /// Add a slot and an immediate
    AddRegImm(u8, u8, f32),
    /// Multiply a slot and an immediate
    MulRegImm(u8, u8, f32),
    /// Divide a slot by an immediate
    DivRegImm(u8, u8, f32),
    /// Divide an immediate by a slot
    DivImmReg(u8, u8, f32),
    /// Subtract an immediate from a slot
    SubRegImm(u8, u8, f32),
    /// Subtract a slot from an immediate
    SubImmReg(u8, u8, f32),
    /// Compute the minimum of a slot and an immediate
    MinRegImm(u8, u8, f32),
    /// Compute the maximum of a slot and an immediate
    MaxRegImm(u8, u8, f32),

    /// Add two slots
    AddRegReg(u8, u8, u8),
    /// Multiply two slots
    MulRegReg(u8, u8, u8),
    /// Divide two slots
    DivRegReg(u8, u8, u8),
    /// Subtract two slots
    SubRegReg(u8, u8, u8),
    /// Take the minimum of two slots
    MinRegReg(u8, u8, u8),
    /// Take the maximum of two slots
    MaxRegReg(u8, u8, u8),

    /// Transfers evaluation to another subtape chunk
    ///
    /// The payload is the signed distance (in clauses) from this clause to
    /// the jump target, in the global clause coordinate space of the subtape
    /// pool.
    Jump(i32),
}

impl Clause {
    /// Returns the output slot, if this clause writes one
    pub fn output(&self) -> Option<u8> {
        match *self {
            Clause::NegReg(out, ..)
            | Clause::AbsReg(out, ..)
            | Clause::SqrtReg(out, ..)
            | Clause::SquareReg(out, ..)
            | Clause::SinReg(out, ..)
            | Clause::CosReg(out, ..)
            | Clause::AsinReg(out, ..)
            | Clause::AcosReg(out, ..)
            | Clause::AtanReg(out, ..)
            | Clause::ExpReg(out, ..)
            | Clause::LnReg(out, ..)
            | Clause::CopyReg(out, ..)
            | Clause::CopyImm(out, ..)
            | Clause::AddRegImm(out, ..)
            | Clause::MulRegImm(out, ..)
            | Clause::DivRegImm(out, ..)
            | Clause::DivImmReg(out, ..)
            | Clause::SubRegImm(out, ..)
            | Clause::SubImmReg(out, ..)
            | Clause::MinRegImm(out, ..)
            | Clause::MaxRegImm(out, ..)
            | Clause::AddRegReg(out, ..)
            | Clause::MulRegReg(out, ..)
            | Clause::DivRegReg(out, ..)
            | Clause::SubRegReg(out, ..)
            | Clause::MinRegReg(out, ..)
            | Clause::MaxRegReg(out, ..) => Some(out),
            Clause::End(..) | Clause::Jump(..) => None,
        }
    }

    /// Returns the number of choices recorded when evaluating this clause
    pub fn choice_count(&self) -> usize {
        match self {
            Clause::MinRegImm(..)
            | Clause::MaxRegImm(..)
            | Clause::MinRegReg(..)
            | Clause::MaxRegReg(..) => 1,
            _ => 0,
        }
    }

    /// Returns the slot-valued operands of this clause
    pub fn operands(&self) -> (Option<u8>, Option<u8>) {
        match *self {
            Clause::NegReg(_, a)
            | Clause::AbsReg(_, a)
            | Clause::SqrtReg(_, a)
            | Clause::SquareReg(_, a)
            | Clause::SinReg(_, a)
            | Clause::CosReg(_, a)
            | Clause::AsinReg(_, a)
            | Clause::AcosReg(_, a)
            | Clause::AtanReg(_, a)
            | Clause::ExpReg(_, a)
            | Clause::LnReg(_, a)
            | Clause::CopyReg(_, a)
            | Clause::AddRegImm(_, a, _)
            | Clause::MulRegImm(_, a, _)
            | Clause::DivRegImm(_, a, _)
            | Clause::DivImmReg(_, a, _)
            | Clause::SubRegImm(_, a, _)
            | Clause::SubImmReg(_, a, _)
            | Clause::MinRegImm(_, a, _)
            | Clause::MaxRegImm(_, a, _) => (Some(a), None),
            Clause::AddRegReg(_, a, b)
            | Clause::MulRegReg(_, a, b)
            | Clause::DivRegReg(_, a, b)
            | Clause::SubRegReg(_, a, b)
            | Clause::MinRegReg(_, a, b)
            | Clause::MaxRegReg(_, a, b) => (Some(a), Some(b)),
            Clause::CopyImm(..) | Clause::End(..) | Clause::Jump(..) => {
                (None, None)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_clause_size() {
        assert_eq!(std::mem::size_of::<Clause>(), 8);
    }
}
