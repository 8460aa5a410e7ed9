//! Pointwise evaluation of a tape or subtape chain
use crate::subtape::{SubtapeIter, SubtapePool, NO_SUBTAPE};
use crate::tape::{self, Clause, SlotArray, Tape, TapeValue, SLOT_NONE};

/// Evaluates the tape (or the subtape chain rooted at `handle`) at a point
///
/// `slots` is caller-provided scratch, at least `tape.slot_count()` long;
/// specialized subtapes share the root tape's slot numbering, so one scratch
/// array serves every chain.
pub(crate) fn eval_chain<T: TapeValue>(
    tape: &Tape,
    pool: &SubtapePool,
    handle: u32,
    x: T,
    y: T,
    z: T,
    slots: &mut [T],
) -> T {
    let mut v = SlotArray(slots);
    let [ax, ay, az] = tape.axes();
    if ax != SLOT_NONE {
        v[ax] = x;
    }
    if ay != SLOT_NONE {
        v[ay] = y;
    }
    if az != SLOT_NONE {
        v[az] = z;
    }
    if handle == NO_SUBTAPE {
        for &c in tape.clauses() {
            match c {
                Clause::End(root) => return v[root],
                Clause::Jump(..) => unreachable!("jump in root tape"),
                c => tape::step(c, &mut v),
            }
        }
    } else {
        for c in SubtapeIter::new(pool, handle) {
            match c {
                Clause::End(root) => return v[root],
                c => tape::step(c, &mut v),
            }
        }
    }
    unreachable!("tape must be terminated by an End clause")
}
