//! Canonicalization of a DCP program into the standard form of a
//! second-order cone program
//!
//! ```text
//!     minimize    c'z
//!     subject to  A z = b
//!                 h - G z ∈ K
//! ```
//!
//! where `K` is a linear cone of size `l` followed by second-order cones.
//! Nonlinear atoms are replaced by fresh variables bounded by their
//! epigraph (or hypograph), so that everything left is affine; the result
//! does not hold any number, only stuffing instructions telling how to fill
//! the matrices from the parameters values.
mod affine;
mod coeff;
mod epigraph;

pub use affine::{Affine, Constant, Term};
pub use coeff::{Coeff, Pattern};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Range;

use anyhow::*;
use itertools::Itertools;
use log::*;
use logging_timer::time;
use serde::{Deserialize, Serialize};

use crate::compiler::{Atom, Comparison, Expression, LeafKind, Node, Program, Sense};
use crate::errors::{excerpt, CompileError, ConfigError, InternalError};
use crate::structs::{NameAllocator, AUX_PREFIX};

/// The solver input a stuffing instruction writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Target {
    C,
    B,
    H,
    G,
    A,
}
impl Target {
    pub fn is_matrix(&self) -> bool {
        matches!(self, Target::G | Target::A)
    }
}
impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Target::C => "c",
                Target::B => "b",
                Target::H => "h",
                Target::G => "G",
                Target::A => "A",
            }
        )
    }
}

/// Add `coeff` to the rows `rows.start, rows.start + row_stride, ...` below
/// `rows.end` of `target`, and to the columns `cols` for matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stuffing {
    pub target: Target,
    pub rows: Range<usize>,
    pub row_stride: usize,
    pub cols: Option<Range<usize>>,
    pub coeff: Coeff,
}
impl Stuffing {
    /// How many rows are touched
    pub fn height(&self) -> usize {
        (self.rows.end - self.rows.start) / self.row_stride
    }
}
impl fmt::Display for Stuffing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = if self.row_stride == 1 {
            format!("{}:{}", self.rows.start, self.rows.end)
        } else {
            format!("{}:{}:{}", self.rows.start, self.rows.end, self.row_stride)
        };
        match &self.cols {
            Some(cols) => write!(
                f,
                "{}[{}, {}:{}] += {}",
                self.target, rows, cols.start, cols.end, self.coeff
            ),
            None => write!(f, "{}[{}] += {}", self.target, rows, self.coeff),
        }
    }
}

/// The position of a variable in the solver vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub name: String,
    pub start: usize,
    pub len: usize,
    /// Whether this variable was introduced by canonicalization
    pub auxiliary: bool,
}
impl Slot {
    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.len
    }
}

/// `count` consecutive second-order cones of dimension `size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConeBlock {
    pub count: usize,
    pub size: usize,
}

/// A canonicalized problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocpForm {
    pub dims: BTreeMap<String, usize>,
    /// The parameters and their concrete shapes
    pub parameters: BTreeMap<String, (usize, usize)>,
    pub slots: Vec<Slot>,
    pub n: usize,
    pub m: usize,
    pub p: usize,
    /// Size of the linear cone
    pub linear: usize,
    pub cones: Vec<ConeBlock>,
    pub instructions: Vec<Stuffing>,
    /// -1 if the problem was a maximization, 1 otherwise
    pub multiplier: f64,
    /// The constant part of the objective
    pub offset: Option<Coeff>,
}
impl SocpForm {
    /// The size of every second-order cone, in order.
    pub fn cone_sizes(&self) -> Vec<usize> {
        self.cones
            .iter()
            .flat_map(|b| std::iter::repeat(b.size).take(b.count))
            .collect()
    }

    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots.iter().find(|s| s.name == name)
    }

    /// The slots of the declared variables.
    pub fn variables(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|s| !s.auxiliary)
    }
}
impl fmt::Display for SocpForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "n = {}, m = {}, p = {}, l = {}, q = [{}]",
            self.n,
            self.m,
            self.p,
            self.linear,
            self.cone_sizes().iter().join(", ")
        )?;
        writeln!(
            f,
            "z = [{}]",
            self.slots
                .iter()
                .map(|s| format!("{}[{}:{}]", s.name, s.start, s.start + s.len))
                .join(", ")
        )?;
        for i in self.instructions.iter() {
            writeln!(f, "{}", i)?;
        }
        if let Some(offset) = &self.offset {
            writeln!(f, "offset = {}", offset)?;
        }
        if self.multiplier != 1.0 {
            writeln!(f, "multiplier = {}", self.multiplier)?;
        }
        std::fmt::Result::Ok(())
    }
}

/// How the rows of second-order cone constraints are laid out.
#[derive(Debug, Clone)]
enum ConeLayout {
    /// A single cone `(t, x)`, the stacked expression being `[t; x]`
    Single(Affine),
    /// `k` cones `(a_i, b_i, ...)` for `i` in `0..k`, the parts being the
    /// `k`-long columns `a`, `b`, ...
    Strided(Vec<Affine>),
}
impl ConeLayout {
    fn block(&self) -> ConeBlock {
        match self {
            ConeLayout::Single(e) => ConeBlock {
                count: 1,
                size: e.rows,
            },
            ConeLayout::Strided(parts) => ConeBlock {
                count: parts.first().map(|p| p.rows).unwrap_or(0),
                size: parts.len(),
            },
        }
    }
}

struct Canonicalizer<'a> {
    dims: &'a HashMap<String, usize>,
    names: NameAllocator,
    slots: Vec<Slot>,
    index: HashMap<String, usize>,
    n: usize,
    equalities: Vec<Affine>,
    linear: Vec<Affine>,
    cones: Vec<ConeLayout>,
}

impl<'a> Canonicalizer<'a> {
    fn new(program: &Program, dims: &'a HashMap<String, usize>) -> Result<Self> {
        let mut r = Canonicalizer {
            dims,
            names: NameAllocator::new(AUX_PREFIX),
            slots: Vec::new(),
            index: HashMap::new(),
            n: 0,
            equalities: Vec::new(),
            linear: Vec::new(),
            cones: Vec::new(),
        };
        for p in program.parameters.iter() {
            r.names.reserve(&p.name);
        }
        for v in program.variables.iter() {
            r.names.reserve(&v.name);
            let (len, _) = v.shape.eval(dims)?;
            r.allocate(&v.name, len, false);
        }
        Ok(r)
    }

    fn allocate(&mut self, name: &str, len: usize, auxiliary: bool) -> usize {
        let id = self.slots.len();
        self.index.insert(name.to_owned(), id);
        self.slots.push(Slot {
            name: name.to_owned(),
            start: self.n,
            len,
            auxiliary,
        });
        self.n += len;
        id
    }

    /// A new auxiliary variable of length `len`.
    fn fresh(&mut self, len: usize) -> Affine {
        let name = self.names.fresh();
        trace!("introducing {} of length {}", name, len);
        let id = self.allocate(&name, len, true);
        Affine::variable(id, len)
    }

    fn slot(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!(CompileError::Undeclared(name.to_owned())))
    }

    fn rows(&self, node: &Node) -> Result<usize> {
        node.shape().eval(self.dims).map(|(r, _)| r)
    }

    /// Reduce `node` to an affine expression, expanding its atoms into
    /// auxiliary variables and cone constraints.
    fn affine(&mut self, node: &Node) -> Result<Affine> {
        let rows = self.rows(node)?;
        if node.is_constant() {
            if !node.shape().is_columnar() {
                bail!(CompileError::Unsupported(format!(
                    "matrix-valued expression {}",
                    excerpt(node)
                )))
            }
            return Ok(Affine::constant(Coeff::from_node(node, self.dims)?, rows));
        }

        match node.e() {
            Expression::Variable(name) => {
                let id = self.slot(name)?;
                Ok(Affine::variable(id, self.slots[id].len))
            }
            Expression::Add(l, r) => {
                let l = self.affine(l)?;
                let r = self.affine(r)?;
                l.add(r)
            }
            Expression::Multiply(l, r) => {
                let c = Coeff::from_node(l, self.dims)?;
                Ok(self.affine(r)?.premultiply(c, rows))
            }
            Expression::Negate(x) => Ok(self.affine(x)?.neg()),
            Expression::Transpose(x) if x.shape().is_scalar() => self.affine(x),
            Expression::Slice {
                inner,
                kind: LeafKind::Variable,
                begin,
                end,
                dim,
            } => {
                let name = inner
                    .leaf_kind()
                    .map(|(_, name)| name)
                    .ok_or_else(|| anyhow!(InternalError::NotAffine(excerpt(node))))?;
                let id = self.slot(name)?;
                let len = self.slots[id].len;
                let extent = if *dim == 0 { len } else { 1 };
                if *end > extent {
                    bail!(CompileError::InvalidSlice(
                        excerpt(inner),
                        format!("{}:{} is out of bounds for a size of {}", begin, end, extent)
                    ))
                }
                if *dim == 1 {
                    return Ok(Affine::variable(id, len));
                }
                Ok(Affine {
                    rows: end - begin,
                    terms: vec![Term {
                        slot: id,
                        row: 0,
                        coeff: if len == 1 {
                            Coeff::Number(1.0)
                        } else {
                            Coeff::Eye(len).slice(*begin, *end, 0)
                        },
                    }],
                    constants: Vec::new(),
                })
            }
            Expression::ToVector(x) | Expression::ToMatrix(x) => self.affine(x),
            Expression::Vstack(args) => {
                let parts = args
                    .iter()
                    .map(|a| self.affine(a))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Affine::stack(parts))
            }
            Expression::Norm(args) => self.norm(args),
            Expression::Abs(x) => self.abs(x),
            Expression::Atom { atom, args } => match atom {
                Atom::Sum => Ok(self.affine(&args[0])?.sum()),
                Atom::Norm => self.norm(args),
                Atom::Abs => self.abs(&args[0]),
                Atom::Pos => self.pos(&args[0]),
                Atom::Neg => self.neg(&args[0]),
                Atom::Square => self.square(&args[0]),
                Atom::Sqrt => self.sqrt(&args[0]),
            },
            _ => bail!(InternalError::NotAffine(excerpt(node))),
        }
    }

    fn place(
        &self,
        instructions: &mut Vec<Stuffing>,
        e: &Affine,
        (matrix, vector): (Target, Target),
        base: usize,
        stride: usize,
    ) {
        for t in e.terms.iter() {
            let start = base + t.row * stride;
            let height = t.coeff.shape().0;
            instructions.push(Stuffing {
                target: matrix,
                rows: start..start + height * stride,
                row_stride: stride,
                cols: Some(self.slots[t.slot].range()),
                coeff: match matrix {
                    Target::G => t.coeff.clone().neg(),
                    _ => t.coeff.clone(),
                },
            });
        }
        for k in e.constants.iter() {
            let start = base + k.row * stride;
            let height = k.coeff.shape().0;
            instructions.push(Stuffing {
                target: vector,
                rows: start..start + height * stride,
                row_stride: stride,
                cols: None,
                coeff: match vector {
                    Target::B => k.coeff.clone().neg(),
                    _ => k.coeff.clone(),
                },
            });
        }
    }

    fn finish(self, objective: Affine, multiplier: f64, program: &Program) -> Result<SocpForm> {
        let mut instructions = Vec::new();

        for t in objective.terms.iter() {
            instructions.push(Stuffing {
                target: Target::C,
                rows: self.slots[t.slot].range(),
                row_stride: 1,
                cols: None,
                coeff: t.coeff.clone().transpose(),
            });
        }
        let offset = objective
            .constants
            .iter()
            .map(|k| k.coeff.clone())
            .reduce(Coeff::add);

        let mut p = 0;
        for e in self.equalities.iter() {
            self.place(&mut instructions, e, (Target::A, Target::B), p, 1);
            p += e.rows;
        }

        let mut m = 0;
        for e in self.linear.iter() {
            self.place(&mut instructions, e, (Target::G, Target::H), m, 1);
            m += e.rows;
        }
        let linear = m;

        let mut cones: Vec<ConeBlock> = Vec::new();
        for cone in self.cones.iter() {
            let block = cone.block();
            match cone {
                ConeLayout::Single(e) => {
                    self.place(&mut instructions, e, (Target::G, Target::H), m, 1)
                }
                ConeLayout::Strided(parts) => {
                    for (j, e) in parts.iter().enumerate() {
                        self.place(&mut instructions, e, (Target::G, Target::H), m + j, block.size)
                    }
                }
            }
            m += block.count * block.size;
            match cones.last_mut() {
                Some(last) if last.size == block.size => last.count += block.count,
                _ => cones.push(block),
            }
        }

        let parameters = program
            .parameters
            .iter()
            .map(|p| Ok((p.name.clone(), p.shape.eval(self.dims)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        let dims = program
            .dimensions
            .iter()
            .filter_map(|d| self.dims.get(d).map(|v| (d.clone(), *v)))
            .collect();

        info!(
            "{} variables ({} auxiliary), {} equalities, {} linear and {} conic rows",
            self.n,
            self.slots.iter().filter(|s| s.auxiliary).count(),
            p,
            linear,
            m - linear
        );
        Ok(SocpForm {
            dims,
            parameters,
            slots: self.slots,
            n: self.n,
            m,
            p,
            linear,
            cones,
            instructions,
            multiplier,
            offset,
        })
    }
}

/// Canonicalize `program`, once all its dimensions are known.
#[time("info", "Canonicalizing")]
pub fn canonicalize(program: &Program, dims: &HashMap<String, usize>) -> Result<SocpForm> {
    program
        .check_dcp()
        .map_err(|e| anyhow!(InternalError::NotDcp(e.to_string())))?;
    if let Some(d) = program
        .used_dimensions()
        .into_iter()
        .find(|d| !dims.contains_key(*d))
    {
        bail!(ConfigError::UnboundDimension(d.to_owned()))
    }

    let mut c = Canonicalizer::new(program, dims)?;

    let (objective, multiplier) = match program.objective.sense {
        Sense::Minimize => (program.objective.expr.clone(), 1.0),
        Sense::Maximize => (crate::compiler::fold::negate(&program.objective.expr), -1.0),
    };
    let objective = c.affine(&objective)?;

    for constraint in program.constraints.iter() {
        if !constraint.lhs.shape().is_columnar() {
            bail!(CompileError::Unsupported(format!(
                "matrix constraint {}",
                excerpt(constraint)
            )))
        }
        debug!("canonicalizing {}", constraint);
        let residual = c.affine(&constraint.lhs)?;
        match constraint.op {
            Comparison::Eq => c.equalities.push(residual),
            Comparison::Le | Comparison::Ge => c.linear.push(residual.neg()),
        }
    }

    c.finish(objective, multiplier, program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parse;

    fn form(src: &str, dims: &[(&str, usize)]) -> SocpForm {
        let program = parse(src).unwrap();
        let dims = dims
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect::<HashMap<_, _>>();
        canonicalize(&program, &dims).unwrap()
    }

    #[test]
    fn slots_are_disjoint_and_cover() {
        let f = form(
            "dimension n\nvariable x(n)\nvariable y\nminimize norm(x) + abs(y)\nsubject to\n  y >= 1",
            &[("n", 3)],
        );
        let mut next = 0;
        for s in f.slots.iter() {
            assert_eq!(s.start, next);
            next += s.len;
        }
        assert_eq!(next, f.n);
        assert_eq!(f.variables().map(|s| s.name.as_str()).collect::<Vec<_>>(), ["x", "y"]);
        assert!(f.slots.iter().skip(2).all(|s| s.auxiliary && s.name.starts_with(AUX_PREFIX)));
    }

    #[test]
    fn rows_layout() {
        let f = form(
            "dimension n\nvariable x(n)\nminimize norm(x)\nsubject to\n  x >= 0\n  sum(x) == 1",
            &[("n", 2)],
        );
        assert_eq!((f.n, f.m, f.p), (3, 5, 1));
        assert_eq!(f.linear, 2);
        assert_eq!(f.cones, vec![ConeBlock { count: 1, size: 3 }]);
        for i in f.instructions.iter() {
            match i.target {
                Target::A | Target::B => assert!(i.rows.end <= f.p),
                Target::G | Target::H => assert!(i.rows.end <= f.m),
                Target::C => assert!(i.rows.end <= f.n),
            }
        }
    }

    #[test]
    fn strided_cones() {
        let f = form(
            "dimension n\nvariable x(n)\nminimize sum(abs(x))",
            &[("n", 4)],
        );
        assert_eq!(f.cones, vec![ConeBlock { count: 4, size: 2 }]);
        assert_eq!(f.cone_sizes(), vec![2; 4]);
        assert!(f
            .instructions
            .iter()
            .filter(|i| i.target == Target::G)
            .all(|i| i.row_stride == 2 && i.height() == 4));
    }

    #[test]
    fn maximization() {
        let f = form("variable x\nmaximize -x + 2\nsubject to\n  x >= 1", &[]);
        assert_eq!(f.multiplier, -1.0);
        assert_eq!(f.offset, Some(Coeff::Number(-2.0)));
    }

    #[test]
    fn unbound_dimensions() {
        let program = parse("dimension n\nvariable x(n)\nminimize norm(x)").unwrap();
        let err = canonicalize(&program, &HashMap::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::UnboundDimension(d)) if d == "n"
        ));
    }
}
