//! Compilation from an expression graph to a [`Tape`]
use crate::{
    context::{BinaryOpcode, Context, Node, Op, UnaryOpcode},
    tape::{Clause, Tape, SLOT_NONE},
    Error,
};

/// Either a live slot or a constant folded at compile time
#[derive(Copy, Clone)]
enum Operand {
    Slot(u8),
    Imm(f32),
}

/// Slot allocator with free-list reclamation
///
/// Slot 0 is reserved as a sentinel, so the first allocation returns 1.
#[derive(Default)]
struct SlotAllocator {
    next: usize,
    free: Vec<u8>,
}

impl SlotAllocator {
    fn alloc(&mut self) -> Result<u8, Error> {
        if let Some(s) = self.free.pop() {
            Ok(s)
        } else {
            self.next += 1;
            u8::try_from(self.next).map_err(|_| Error::TooManySlots(self.next))
        }
    }

    fn release(&mut self, s: u8) {
        self.free.push(s);
    }

    /// Total slot count, including the reserved sentinel
    fn count(&self) -> usize {
        self.next + 1
    }
}

/// Compiles the subgraph rooted at `root` into a [`Tape`]
///
/// The graph is walked in the context's arena order, which is topological;
/// constant subtrees are folded, single-constant operands are fused into the
/// clause as immediates, and slots are reclaimed once their last reader has
/// passed.
pub fn build_tape(ctx: &Context, root: Node) -> Result<Tape, Error> {
    if ctx.is_empty() {
        return Err(Error::EmptyContext);
    }
    ctx.get_op(root).ok_or(Error::BadNode)?;

    // Mark the nodes reachable from the root, rejecting opcodes that the
    // tape evaluators cannot run
    let mut reachable = vec![false; ctx.len()];
    let mut todo = vec![root];
    while let Some(n) = todo.pop() {
        if std::mem::replace(&mut reachable[n.index()], true) {
            continue;
        }
        let op = ctx.get_op(n).ok_or(Error::BadNode)?;
        match op {
            Op::Unary(UnaryOpcode::Recip, ..) => {
                return Err(Error::UnsupportedOpcode("RECIP".to_owned()))
            }
            Op::Unary(UnaryOpcode::Tan, ..) => {
                return Err(Error::UnsupportedOpcode("TAN".to_owned()))
            }
            Op::Binary(BinaryOpcode::Mod, ..) => {
                return Err(Error::UnsupportedOpcode("MOD".to_owned()))
            }
            _ => (),
        }
        todo.extend(op.iter_children());
    }

    // Fold constant subtrees, bottom-up; a node is constant if all of its
    // children are
    let mut folded: Vec<Option<f64>> = vec![None; ctx.len()];
    for (n, op) in ctx.iter() {
        if !reachable[n.index()] {
            continue;
        }
        folded[n.index()] = match op {
            Op::Const(c) => Some(c.0),
            Op::Input(..) => None,
            Op::Unary(op, a) => {
                folded[a.index()].map(|a| fold_unary(*op, a))
            }
            Op::Binary(op, a, b) => match (folded[a.index()], folded[b.index()])
            {
                (Some(a), Some(b)) => Some(fold_binary(*op, a, b)),
                _ => None,
            },
        };
    }

    // A fully-constant root compiles to a two-clause tape
    if let Some(c) = folded[root.index()] {
        let mut alloc = SlotAllocator::default();
        let slot = alloc.alloc()?;
        let clauses =
            vec![Clause::CopyImm(slot, c as f32), Clause::End(slot)];
        return Ok(Tape::new(clauses, [SLOT_NONE; 3], alloc.count(), 0));
    }

    // Liveness prepass: the last (topologically latest) reader of each node
    let mut last_used = vec![0usize; ctx.len()];
    last_used[root.index()] = usize::MAX;
    for (n, op) in ctx.iter() {
        if !reachable[n.index()] || folded[n.index()].is_some() {
            continue;
        }
        for child in op.iter_children() {
            if folded[child.index()].is_none() {
                last_used[child.index()] =
                    last_used[child.index()].max(n.index());
            }
        }
    }

    let mut alloc = SlotAllocator::default();
    let mut slots: Vec<Option<u8>> = vec![None; ctx.len()];
    let mut axes = [SLOT_NONE; 3];
    let mut clauses = vec![];
    let mut choice_count = 0;

    for (n, op) in ctx.iter() {
        if !reachable[n.index()] || folded[n.index()].is_some() {
            continue;
        }
        let operand = |slots: &[Option<u8>], child: Node| {
            match folded[child.index()] {
                Some(c) => Operand::Imm(c as f32),
                None => Operand::Slot(
                    slots[child.index()].expect("operand bound by prior clause"),
                ),
            }
        };
        match op {
            Op::Const(..) => unreachable!("constants are always folded"),
            Op::Input(axis) => {
                let slot = alloc.alloc()?;
                axes[*axis as usize] = slot;
                slots[n.index()] = Some(slot);
            }
            Op::Unary(op, a) => {
                let Operand::Slot(lhs) = operand(&slots, *a) else {
                    unreachable!("unary of a constant is folded");
                };
                if last_used[a.index()] == n.index() {
                    alloc.release(lhs);
                }
                let out = alloc.alloc()?;
                slots[n.index()] = Some(out);
                let f = match op {
                    UnaryOpcode::Neg => Clause::NegReg,
                    UnaryOpcode::Abs => Clause::AbsReg,
                    UnaryOpcode::Sqrt => Clause::SqrtReg,
                    UnaryOpcode::Square => Clause::SquareReg,
                    UnaryOpcode::Sin => Clause::SinReg,
                    UnaryOpcode::Cos => Clause::CosReg,
                    UnaryOpcode::Asin => Clause::AsinReg,
                    UnaryOpcode::Acos => Clause::AcosReg,
                    UnaryOpcode::Atan => Clause::AtanReg,
                    UnaryOpcode::Exp => Clause::ExpReg,
                    UnaryOpcode::Ln => Clause::LnReg,
                    UnaryOpcode::Recip | UnaryOpcode::Tan => {
                        unreachable!("rejected in the reachability pass")
                    }
                };
                clauses.push(f(out, lhs));
            }
            Op::Binary(op, a, b) => {
                let lhs = operand(&slots, *a);
                let rhs = operand(&slots, *b);
                if let Operand::Slot(s) = lhs {
                    if last_used[a.index()] == n.index() {
                        alloc.release(s);
                    }
                }
                if let Operand::Slot(s) = rhs {
                    // Guard against a * a, where both operands share a slot
                    if last_used[b.index()] == n.index() && a != b {
                        alloc.release(s);
                    }
                }
                let out = alloc.alloc()?;
                slots[n.index()] = Some(out);

                type RegFn = fn(u8, u8, u8) -> Clause;
                type ImmFn = fn(u8, u8, f32) -> Clause;
                let f: (RegFn, ImmFn, ImmFn) = match op {
                    BinaryOpcode::Add => (
                        Clause::AddRegReg,
                        Clause::AddRegImm,
                        Clause::AddRegImm,
                    ),
                    BinaryOpcode::Sub => (
                        Clause::SubRegReg,
                        Clause::SubRegImm,
                        Clause::SubImmReg,
                    ),
                    BinaryOpcode::Mul => (
                        Clause::MulRegReg,
                        Clause::MulRegImm,
                        Clause::MulRegImm,
                    ),
                    BinaryOpcode::Div => (
                        Clause::DivRegReg,
                        Clause::DivRegImm,
                        Clause::DivImmReg,
                    ),
                    BinaryOpcode::Min => (
                        Clause::MinRegReg,
                        Clause::MinRegImm,
                        Clause::MinRegImm,
                    ),
                    BinaryOpcode::Max => (
                        Clause::MaxRegReg,
                        Clause::MaxRegImm,
                        Clause::MaxRegImm,
                    ),
                    BinaryOpcode::Mod => {
                        unreachable!("rejected in the reachability pass")
                    }
                };
                if matches!(op, BinaryOpcode::Min | BinaryOpcode::Max) {
                    choice_count += 1;
                }
                clauses.push(match (lhs, rhs) {
                    (Operand::Slot(a), Operand::Slot(b)) => f.0(out, a, b),
                    (Operand::Slot(a), Operand::Imm(i)) => f.1(out, a, i),
                    (Operand::Imm(i), Operand::Slot(b)) => f.2(out, b, i),
                    (Operand::Imm(..), Operand::Imm(..)) => {
                        unreachable!("fully-constant nodes are folded")
                    }
                });
            }
        }
    }

    let root_slot = slots[root.index()].expect("root must be bound");
    clauses.push(Clause::End(root_slot));
    Ok(Tape::new(clauses, axes, alloc.count(), choice_count))
}

fn fold_unary(op: UnaryOpcode, a: f64) -> f64 {
    match op {
        UnaryOpcode::Neg => -a,
        UnaryOpcode::Abs => a.abs(),
        UnaryOpcode::Recip => 1.0 / a,
        UnaryOpcode::Sqrt => a.sqrt(),
        UnaryOpcode::Square => a * a,
        UnaryOpcode::Sin => a.sin(),
        UnaryOpcode::Cos => a.cos(),
        UnaryOpcode::Tan => a.tan(),
        UnaryOpcode::Asin => a.asin(),
        UnaryOpcode::Acos => a.acos(),
        UnaryOpcode::Atan => a.atan(),
        UnaryOpcode::Exp => a.exp(),
        UnaryOpcode::Ln => a.ln(),
    }
}

fn fold_binary(op: BinaryOpcode, a: f64, b: f64) -> f64 {
    match op {
        BinaryOpcode::Add => a + b,
        BinaryOpcode::Sub => a - b,
        BinaryOpcode::Mul => a * b,
        BinaryOpcode::Div => a / b,
        BinaryOpcode::Min => a.min(b),
        BinaryOpcode::Max => a.max(b),
        BinaryOpcode::Mod => a.rem_euclid(b),
    }
}

////////////////////////////////////////////////////////////////////////////////
