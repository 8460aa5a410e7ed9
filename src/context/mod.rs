//! Expression graph construction
//!
//! A [`Context`] is an arena of deduplicated expression nodes.  Shapes are
//! built by combining [`Node`] handles with arithmetic operations; the root
//! node is then handed to [`Renderer::build`](crate::render::Renderer::build),
//! which compiles the graph into a [`Tape`](crate::tape::Tape).
//!
//! Nodes are appended to the arena in creation order, which means children
//! always precede their parents; the tape compiler relies on that ordering.
use crate::Error;
use ordered_float::OrderedFloat;
use std::collections::HashMap;

mod op;
pub use op::{Axis, BinaryOpcode, Op, UnaryOpcode};

/// Handle to an expression node owned by a [`Context`]
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Node(usize);

impl Node {
    /// Returns the node's position in the arena
    pub fn index(&self) -> usize {
        self.0
    }
}

/// An arena of deduplicated expression nodes
#[derive(Default)]
pub struct Context {
    ops: Vec<Op>,
    dedup: HashMap<Op, Node>,
}

impl Context {
    /// Builds a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of nodes in the context
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Checks whether the context is empty
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Looks up the operation for the given node
    pub fn get_op(&self, n: Node) -> Option<&Op> {
        self.ops.get(n.0)
    }

    /// Returns the constant value of a node, if it is a constant
    pub fn const_value(&self, n: Node) -> Result<Option<f64>, Error> {
        match self.get_op(n) {
            Some(Op::Const(c)) => Ok(Some(c.0)),
            Some(..) => Ok(None),
            None => Err(Error::BadNode),
        }
    }

    /// Iterates over `(Node, &Op)` tuples in topological order
    pub fn iter(&self) -> impl Iterator<Item = (Node, &Op)> {
        self.ops.iter().enumerate().map(|(i, op)| (Node(i), op))
    }

    fn intern(&mut self, op: Op) -> Node {
        if let Some(n) = self.dedup.get(&op) {
            *n
        } else {
            let n = Node(self.ops.len());
            self.ops.push(op);
            self.dedup.insert(op, n);
            n
        }
    }

    fn check(&self, n: Node) -> Result<(), Error> {
        if n.0 < self.ops.len() {
            Ok(())
        } else {
            Err(Error::BadNode)
        }
    }

    /// Constructs or returns the node for the X input
    pub fn x(&mut self) -> Node {
        self.intern(Op::Input(Axis::X))
    }
    /// Constructs or returns the node for the Y input
    pub fn y(&mut self) -> Node {
        self.intern(Op::Input(Axis::Y))
    }
    /// Constructs or returns the node for the Z input
    pub fn z(&mut self) -> Node {
        self.intern(Op::Input(Axis::Z))
    }

    /// Constructs a constant node
    pub fn constant(&mut self, v: f64) -> Node {
        self.intern(Op::Const(OrderedFloat(v)))
    }

    fn op_unary(&mut self, op: UnaryOpcode, a: Node) -> Result<Node, Error> {
        self.check(a)?;
        Ok(self.intern(Op::Unary(op, a)))
    }

    fn op_binary(
        &mut self,
        op: BinaryOpcode,
        a: Node,
        b: Node,
    ) -> Result<Node, Error> {
        self.check(a)?;
        self.check(b)?;
        Ok(self.intern(Op::Binary(op, a, b)))
    }

    /// Builds a node computing `-a`
    pub fn neg(&mut self, a: Node) -> Result<Node, Error> {
        self.op_unary(UnaryOpcode::Neg, a)
    }
    /// Builds a node computing `|a|`
    pub fn abs(&mut self, a: Node) -> Result<Node, Error> {
        self.op_unary(UnaryOpcode::Abs, a)
    }
    /// Builds a node computing `1 / a`
    ///
    /// Note that the tape evaluators do not support this opcode; it exists so
    /// that front ends can construct it and receive a structured error from
    /// [`Renderer::build`](crate::render::Renderer::build).
    pub fn recip(&mut self, a: Node) -> Result<Node, Error> {
        self.op_unary(UnaryOpcode::Recip, a)
    }
    /// Builds a node computing `sqrt(a)`
    pub fn sqrt(&mut self, a: Node) -> Result<Node, Error> {
        self.op_unary(UnaryOpcode::Sqrt, a)
    }
    /// Builds a node computing `a * a`
    pub fn square(&mut self, a: Node) -> Result<Node, Error> {
        self.op_unary(UnaryOpcode::Square, a)
    }
    /// Builds a node computing `sin(a)`
    pub fn sin(&mut self, a: Node) -> Result<Node, Error> {
        self.op_unary(UnaryOpcode::Sin, a)
    }
    /// Builds a node computing `cos(a)`
    pub fn cos(&mut self, a: Node) -> Result<Node, Error> {
        self.op_unary(UnaryOpcode::Cos, a)
    }
    /// Builds a node computing `tan(a)` (unsupported by the evaluators)
    pub fn tan(&mut self, a: Node) -> Result<Node, Error> {
        self.op_unary(UnaryOpcode::Tan, a)
    }
    /// Builds a node computing `asin(a)`
    pub fn asin(&mut self, a: Node) -> Result<Node, Error> {
        self.op_unary(UnaryOpcode::Asin, a)
    }
    /// Builds a node computing `acos(a)`
    pub fn acos(&mut self, a: Node) -> Result<Node, Error> {
        self.op_unary(UnaryOpcode::Acos, a)
    }
    /// Builds a node computing `atan(a)`
    pub fn atan(&mut self, a: Node) -> Result<Node, Error> {
        self.op_unary(UnaryOpcode::Atan, a)
    }
    /// Builds a node computing `exp(a)`
    pub fn exp(&mut self, a: Node) -> Result<Node, Error> {
        self.op_unary(UnaryOpcode::Exp, a)
    }
    /// Builds a node computing `ln(a)`
    pub fn ln(&mut self, a: Node) -> Result<Node, Error> {
        self.op_unary(UnaryOpcode::Ln, a)
    }

    /// Builds a node computing `a + b`
    pub fn add(&mut self, a: Node, b: Node) -> Result<Node, Error> {
        self.op_binary(BinaryOpcode::Add, a, b)
    }
    /// Builds a node computing `a - b`
    pub fn sub(&mut self, a: Node, b: Node) -> Result<Node, Error> {
        self.op_binary(BinaryOpcode::Sub, a, b)
    }
    /// Builds a node computing `a * b`
    pub fn mul(&mut self, a: Node, b: Node) -> Result<Node, Error> {
        self.op_binary(BinaryOpcode::Mul, a, b)
    }
    /// Builds a node computing `a / b`
    pub fn div(&mut self, a: Node, b: Node) -> Result<Node, Error> {
        self.op_binary(BinaryOpcode::Div, a, b)
    }
    /// Builds a node computing `min(a, b)`
    pub fn min(&mut self, a: Node, b: Node) -> Result<Node, Error> {
        self.op_binary(BinaryOpcode::Min, a, b)
    }
    /// Builds a node computing `max(a, b)`
    pub fn max(&mut self, a: Node, b: Node) -> Result<Node, Error> {
        self.op_binary(BinaryOpcode::Max, a, b)
    }
    /// Builds a node computing `a mod b` (unsupported by the evaluators)
    pub fn modulo(&mut self, a: Node, b: Node) -> Result<Node, Error> {
        self.op_binary(BinaryOpcode::Mod, a, b)
    }
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_dedup() {
        let mut ctx = Context::new();
        let x1 = ctx.x();
        let x2 = ctx.x();
        assert_eq!(x1, x2);

        let a = ctx.constant(1.0);
        let b = ctx.constant(1.0);
        assert_eq!(a, b);

        let s1 = ctx.add(x1, a).unwrap();
        let s2 = ctx.add(x2, b).unwrap();
        assert_eq!(s1, s2);
        assert_eq!(ctx.len(), 3);
    }

    #[test]
    fn test_bad_node() {
        let mut ctx = Context::new();
        let x = ctx.x();

        let mut other = Context::new();
        let y = other.y();
        let z = other.z();
        let n = other.add(y, z).unwrap();
        assert!(ctx.square(n).is_err());
        assert!(ctx.add(x, n).is_err());
    }

    #[test]
    fn test_topological_order() {
        let mut ctx = Context::new();
        let x = ctx.x();
        let y = ctx.y();
        let s = ctx.add(x, y).unwrap();
        let m = ctx.mul(s, x).unwrap();
        for (n, op) in ctx.iter() {
            for c in op.iter_children() {
                assert!(c < n);
            }
        }
        assert!(s < m);
    }
}
