//! The in-process backend: the stuffing instructions are kept as they are,
//! and evaluated against the parameters values on demand.
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use anyhow::*;
use itertools::Itertools;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use super::{Codegen, Generated};
use crate::driver::Settings;
use crate::errors::{excerpt, ExternalError, InternalError};
use crate::structs::{dense, Params};
use crate::transformer::{Coeff, Slot, SocpForm, Stuffing, Target};

/// Serialize a sparse matrix as its `(I, J, V)` triplets, as cvxopt
/// `spmatrix` expects them.
fn triplets<S: Serializer>(
    m: &CscMatrix<f64>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let mut s = serializer.serialize_struct("SparseMatrix", 5)?;
    s.serialize_field("rows", &m.nrows())?;
    s.serialize_field("cols", &m.ncols())?;
    s.serialize_field("I", &m.triplet_iter().map(|(i, _, _)| i).collect::<Vec<_>>())?;
    s.serialize_field("J", &m.triplet_iter().map(|(_, j, _)| j).collect::<Vec<_>>())?;
    s.serialize_field("V", &m.triplet_iter().map(|(_, _, v)| *v).collect::<Vec<_>>())?;
    s.end()
}

/// Accumulate `value` at `(i, j)`; explicit zeros are not stored.
fn push(target: &mut CooMatrix<f64>, i: usize, j: usize, value: f64) -> Result<()> {
    if i >= target.nrows() || j >= target.ncols() {
        bail!(InternalError::OutOfBounds {
            index: (i, j),
            shape: (target.nrows(), target.ncols()),
        })
    }
    if value != 0.0 {
        target.push(i, j, value);
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConeDims {
    pub l: usize,
    pub q: Vec<usize>,
    pub s: Vec<usize>,
}

/// The numeric input of a cone solver.
#[derive(Debug, Clone, Serialize)]
pub struct SocpData {
    pub c: Vec<f64>,
    #[serde(rename = "G", serialize_with = "triplets")]
    pub g: CscMatrix<f64>,
    pub h: Vec<f64>,
    #[serde(rename = "A", serialize_with = "triplets")]
    pub a: CscMatrix<f64>,
    pub b: Vec<f64>,
    pub dims: ConeDims,
}

/// The forward and backward maps of a problem, ready to be evaluated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeProgram {
    pub n: usize,
    pub m: usize,
    pub p: usize,
    pub dims: ConeDims,
    pub instructions: Vec<Stuffing>,
    pub slots: Vec<Slot>,
    pub parameters: BTreeMap<String, (usize, usize)>,
    pub multiplier: f64,
    pub offset: Option<Coeff>,
}

impl NativeProgram {
    /// Assemble the solver input for the given parameters values.
    pub fn prob2socp(&self, params: &Params) -> Result<SocpData> {
        let mut c = vec![0.0; self.n];
        let mut h = vec![0.0; self.m];
        let mut b = vec![0.0; self.p];
        let mut g = CooMatrix::new(self.m, self.n);
        let mut a = CooMatrix::new(self.p, self.n);

        for s in self.instructions.iter() {
            let height = s.height();
            let width = s.cols.as_ref().map(|c| c.len()).unwrap_or(1);
            let value = s
                .coeff
                .eval(params)
                .with_context(|| anyhow!("while evaluating {}", excerpt(&s.coeff)))?;
            if value.shape() != (height, width) {
                bail!(InternalError::CoefficientShape {
                    coeff: excerpt(&s.coeff),
                    found: value.shape(),
                    expected: (height, width),
                })
            }

            let rows = s.rows.clone().step_by(s.row_stride);
            match s.target {
                Target::C | Target::H | Target::B => {
                    let target = match s.target {
                        Target::C => &mut c,
                        Target::H => &mut h,
                        _ => &mut b,
                    };
                    let len = target.len();
                    for (k, row) in rows.enumerate() {
                        let slot = target.get_mut(row).ok_or_else(|| {
                            anyhow!(InternalError::OutOfBounds {
                                index: (row, 0),
                                shape: (len, 1),
                            })
                        })?;
                        *slot += value[(k, 0)];
                    }
                }
                Target::G | Target::A => {
                    let target = if s.target == Target::G {
                        &mut g
                    } else {
                        &mut a
                    };
                    let cols = s.cols.clone().unwrap_or(0..0);
                    for (k, row) in rows.enumerate() {
                        for (l, col) in cols.clone().enumerate() {
                            push(target, row, col, value[(k, l)])?;
                        }
                    }
                }
            }
        }

        Ok(SocpData {
            c,
            g: CscMatrix::from(&g),
            h,
            a: CscMatrix::from(&a),
            b,
            dims: self.dims.clone(),
        })
    }

    /// Extract the values of the problem variables from a solution vector.
    pub fn socp2prob(&self, x: &[f64]) -> Result<BTreeMap<String, Vec<f64>>> {
        if x.len() != self.n {
            bail!(ExternalError::Solver(format!(
                "solution has {} entries, expected {}",
                x.len(),
                self.n
            )))
        }
        Ok(self
            .slots
            .iter()
            .filter(|s| !s.auxiliary)
            .map(|s| (s.name.clone(), x[s.range()].to_vec()))
            .collect())
    }

    /// The constant part of the objective, for the given parameters values.
    pub fn objective_offset(&self, params: &Params) -> Result<f64> {
        match &self.offset {
            Some(o) => {
                let v = o.eval(params)?;
                if !dense::is_scalar(&v) {
                    bail!(InternalError::CoefficientShape {
                        coeff: excerpt(o),
                        found: v.shape(),
                        expected: (1, 1),
                    })
                }
                Ok(v[(0, 0)])
            }
            None => Ok(0.0),
        }
    }

    /// The objective value of the original problem, from the solver primal
    /// cost.
    pub fn objective_value(&self, params: &Params, pcost: f64) -> Result<f64> {
        Ok(self.multiplier * (pcost + self.objective_offset(params)?))
    }
}

impl fmt::Display for NativeProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "prob2socp({}):",
            self.parameters.keys().join(", ")
        )?;
        writeln!(
            f,
            "    c = zeros({}); h = zeros({}); b = zeros({})",
            self.n, self.m, self.p
        )?;
        writeln!(
            f,
            "    G = sparse({}, {}); A = sparse({}, {})",
            self.m, self.n, self.p, self.n
        )?;
        for s in self.instructions.iter() {
            writeln!(f, "    {}", s)?;
        }
        writeln!(
            f,
            "    dims = {{l: {}, q: [{}], s: []}}",
            self.dims.l,
            self.dims.q.iter().join(", ")
        )?;
        writeln!(f)?;
        writeln!(f, "socp2prob(x):")?;
        for s in self.slots.iter().filter(|s| !s.auxiliary) {
            writeln!(f, "    {} = x[{}:{}]", s.name, s.start, s.start + s.len)?;
        }
        std::fmt::Result::Ok(())
    }
}

pub struct NativeCodegen {
    program: NativeProgram,
}

impl NativeCodegen {
    pub fn new() -> Self {
        NativeCodegen {
            program: NativeProgram {
                n: 0,
                m: 0,
                p: 0,
                dims: ConeDims::default(),
                instructions: Vec::new(),
                slots: Vec::new(),
                parameters: BTreeMap::new(),
                multiplier: 1.0,
                offset: None,
            },
        }
    }

    pub fn boxed(_settings: &Settings) -> Box<dyn Codegen> {
        Box::new(NativeCodegen::new())
    }

    fn push(
        &mut self,
        target: Target,
        rows: Range<usize>,
        row_stride: usize,
        cols: Option<Range<usize>>,
        coeff: Coeff,
    ) {
        self.program.instructions.push(Stuffing {
            target,
            rows,
            row_stride,
            cols,
            coeff,
        })
    }
}

impl Default for NativeCodegen {
    fn default() -> Self {
        Self::new()
    }
}

impl Codegen for NativeCodegen {
    fn target(&self) -> &'static str {
        "native"
    }

    fn functions_setup(&mut self, form: &SocpForm) -> Result<()> {
        self.program.n = form.n;
        self.program.m = form.m;
        self.program.p = form.p;
        self.program.dims = ConeDims {
            l: form.linear,
            q: form.cone_sizes(),
            s: Vec::new(),
        };
        self.program.slots = form.slots.clone();
        self.program.parameters = form.parameters.clone();
        Ok(())
    }

    fn stuff_c(&mut self, rows: Range<usize>, coeff: &Coeff) -> Result<()> {
        let coeff = self.broadcast(rows.len(), coeff);
        self.push(Target::C, rows, 1, None, coeff);
        Ok(())
    }

    fn stuff_b(&mut self, rows: Range<usize>, coeff: &Coeff) -> Result<()> {
        let coeff = self.broadcast(rows.len(), coeff);
        self.push(Target::B, rows, 1, None, coeff);
        Ok(())
    }

    fn stuff_h(&mut self, rows: Range<usize>, coeff: &Coeff, stride: Option<usize>) -> Result<()> {
        let stride = stride.unwrap_or(1);
        let coeff = self.broadcast(rows.len() / stride, coeff);
        self.push(Target::H, rows, stride, None, coeff);
        Ok(())
    }

    fn stuff_g(
        &mut self,
        rows: Range<usize>,
        cols: Range<usize>,
        coeff: &Coeff,
        row_stride: usize,
    ) -> Result<()> {
        let coeff = self.broadcast(rows.len() / row_stride, coeff);
        self.push(Target::G, rows, row_stride, Some(cols), coeff);
        Ok(())
    }

    fn stuff_a(
        &mut self,
        rows: Range<usize>,
        cols: Range<usize>,
        coeff: &Coeff,
        row_stride: usize,
    ) -> Result<()> {
        let coeff = self.broadcast(rows.len() / row_stride, coeff);
        self.push(Target::A, rows, row_stride, Some(cols), coeff);
        Ok(())
    }

    fn functions_return(&mut self, form: &SocpForm) -> Result<()> {
        self.program.multiplier = form.multiplier;
        self.program.offset = form.offset.clone();
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Generated> {
        Ok(Generated::Native(self.program))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parse;
    use crate::exporters::generate;
    use crate::transformer::canonicalize;
    use maplit::hashmap;
    use nalgebra::DMatrix;

    fn native(src: &str, dims: &[(&str, usize)]) -> NativeProgram {
        let program = parse(src).unwrap();
        let dims = dims.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        let form = canonicalize(&program, &dims).unwrap();
        generate(&form, Box::new(NativeCodegen::new()))
            .unwrap()
            .native()
            .cloned()
            .unwrap()
    }

    #[test]
    fn least_squares() {
        let p = native(
            "dimensions m n\nparameters A(m, n) b(m)\nvariable x(n)\nminimize norm(A*x - b)",
            &[("m", 2), ("n", 2)],
        );
        let params = hashmap! {
            "A".to_string() => dense::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap(),
            "b".to_string() => dense::column(vec![5.0, 6.0]),
        };
        let data = p.prob2socp(&params).unwrap();
        // z = [x; t], minimize t s.t. ||Ax - b|| <= t
        assert_eq!(data.c, vec![0.0, 0.0, 1.0]);
        assert_eq!(data.dims.q, vec![3]);
        assert_eq!(data.h, vec![0.0, -5.0, -6.0]);
        let g = DMatrix::from(&data.g);
        assert_eq!(g[(0, 2)], -1.0);
        assert_eq!(g[(1, 0)], -1.0);
        assert_eq!(g[(1, 1)], -2.0);
        assert_eq!(g[(2, 0)], -3.0);
        assert_eq!(g[(2, 1)], -4.0);
        assert_eq!(g[(0, 0)], 0.0);
        assert_eq!(data.g.nnz(), 5);

        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["G"]["rows"], 3);
        assert_eq!(json["G"]["V"].as_array().map(|v| v.len()), Some(5));
        assert_eq!(json["A"]["I"].as_array().map(|v| v.len()), Some(0));
    }

    #[test]
    fn parameter_errors() {
        let p = native(
            "dimension n\nparameter b(n)\nvariable x(n)\nminimize norm(x - b)",
            &[("n", 2)],
        );
        assert!(p.prob2socp(&Params::new()).is_err());
        let wrong = hashmap! {"b".to_string() => dense::column(vec![1.0, 2.0, 3.0])};
        assert!(p.prob2socp(&wrong).is_err());
    }

    #[test]
    fn scalar_blocks_are_broadcast() {
        let mut g = NativeCodegen::new();
        let two = Coeff::Number(2.0);
        assert_eq!(g.broadcast(1, &two), two);
        assert_eq!(g.broadcast(3, &two).shape(), (3, 1));
        assert_eq!(g.broadcast(3, &Coeff::Ones(3)), Coeff::Ones(3));

        g.program.m = 6;
        g.stuff_h(0..6, &two, Some(3)).unwrap();
        g.stuff_h(1..7, &Coeff::Number(-1.0), Some(3)).unwrap();
        g.stuff_h(2..3, &Coeff::Number(4.0), None).unwrap();
        let p = Box::new(g).finish().unwrap().native().cloned().unwrap();
        assert_eq!(p.instructions[0].coeff.shape(), (2, 1));
        let data = p.prob2socp(&Params::new()).unwrap();
        assert_eq!(data.h, vec![2.0, -1.0, 4.0, 2.0, -1.0, 0.0]);
    }

    #[test]
    fn solution_mapping() {
        let p = native("variables x y\nminimize abs(x) + abs(y)", &[]);
        let r = p.socp2prob(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(r.len(), 2);
        assert_eq!(r["x"], vec![1.0]);
        assert_eq!(r["y"], vec![2.0]);
        assert!(p.socp2prob(&[1.0]).is_err());
    }
}
