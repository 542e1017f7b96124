use std::ops::Range;

use anyhow::*;
use convert_case::{Case, Casing};
use handlebars::Handlebars;
use itertools::Itertools;
use log::*;
use serde::Serialize;

use super::{Codegen, Generated};
use crate::driver::Settings;
use crate::transformer::{Coeff, Pattern, SocpForm};
use crate::utils::purify;

const TEMPLATE: &str = include_str!("python.hbs");
const INDENT: &str = "    ";

/// A python function being generated, line by line.
#[derive(Debug, Clone, Default)]
pub struct PythonFunction {
    name: String,
    arguments: Vec<String>,
    doc: Vec<String>,
    body: Vec<String>,
}
impl PythonFunction {
    pub fn new<S: AsRef<str>>(name: S) -> Self {
        PythonFunction {
            name: name.as_ref().to_owned(),
            ..Default::default()
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn add_arguments<I: IntoIterator<Item = S>, S: AsRef<str>>(&mut self, args: I) {
        self.arguments
            .extend(args.into_iter().map(|a| a.as_ref().to_owned()))
    }
    pub fn add_lines<I: IntoIterator<Item = S>, S: AsRef<str>>(&mut self, lines: I) {
        self.body
            .extend(lines.into_iter().map(|l| l.as_ref().to_owned()))
    }
    pub fn add_comment<S: AsRef<str>>(&mut self, comment: S) {
        self.body.push(format!("# {}", comment.as_ref()))
    }
    pub fn document<S: AsRef<str>>(&mut self, doc: S) {
        self.doc.push(doc.as_ref().to_owned())
    }
    pub fn newline(&mut self) {
        self.body.push(String::new())
    }

    fn indented(lines: &[String]) -> String {
        lines
            .iter()
            .map(|l| {
                if l.is_empty() {
                    String::new()
                } else {
                    format!("{}{}", INDENT, l)
                }
            })
            .join("\n")
    }

    fn to_template(&self) -> TemplateFunction {
        TemplateFunction {
            name: self.name.clone(),
            arguments: self.arguments.join(", "),
            doc: PythonFunction::indented(&self.doc),
            body: PythonFunction::indented(&self.body),
        }
    }
}

#[derive(Serialize)]
struct TemplateFunction {
    name: String,
    arguments: String,
    doc: String,
    body: String,
}
#[derive(Serialize)]
struct TemplateData {
    version: &'static str,
    functions: Vec<TemplateFunction>,
}

/// Whether the python rendering of `c` may be followed by a postfix
/// operator without parentheses.
fn is_simple(c: &Coeff) -> bool {
    matches!(
        c,
        Coeff::Number(_)
            | Coeff::Parameter { .. }
            | Coeff::Eye(_)
            | Coeff::Ones(_)
            | Coeff::Add(..)
            | Coeff::Transpose(_)
            | Coeff::Slice { .. }
    )
}

fn wrapped(c: &Coeff) -> String {
    if is_simple(c) {
        to_python(c)
    } else {
        format!("({})", to_python(c))
    }
}

/// Render a coefficient as a cvxopt expression.
pub fn to_python(c: &Coeff) -> String {
    match c {
        Coeff::Number(x) => format!("{:?}", x),
        Coeff::Parameter { name, .. } => format!("params['{}']", name),
        Coeff::Eye(n) => format!("o.spdiag({}*[1.0])", n),
        Coeff::Ones(n) => format!("o.matrix(1.0, ({}, 1))", n),
        Coeff::Add(a, b) => format!("({} + {})", to_python(a), to_python(b)),
        Coeff::Mul(a, b) => format!("{}*{}", wrapped(a), wrapped(b)),
        Coeff::Neg(a) => format!("-{}", wrapped(a)),
        Coeff::Transpose(a) => format!("{}.T", wrapped(a)),
        Coeff::Slice {
            inner,
            begin,
            end,
            dim,
        } => {
            if *dim == 0 {
                format!("{}[{}:{}, :]", wrapped(inner), begin, end)
            } else {
                format!("{}[:, {}:{}]", wrapped(inner), begin, end)
            }
        }
    }
}

/// Render a scalar coefficient as a python float, unwrapping 1x1 matrices.
fn to_python_float(c: &Coeff) -> String {
    match c {
        Coeff::Number(_) => to_python(c),
        _ => format!("float({})", to_python(c)),
    }
}

/// Emit a pair of python functions relying on cvxopt.
pub struct PythonCodegen {
    prob2socp: PythonFunction,
    socp2prob: PythonFunction,
    debug: bool,
}

impl PythonCodegen {
    pub fn new(settings: &Settings) -> Self {
        let name = |base: &str| match settings.prefix.as_ref() {
            Some(prefix) => format!("{}_{}", purify(prefix), base).to_case(Case::Snake),
            None => base.to_owned(),
        };
        PythonCodegen {
            prob2socp: PythonFunction::new(name("prob_to_socp")),
            socp2prob: PythonFunction::new(name("socp_to_prob")),
            debug: settings.debug,
        }
    }

    pub fn boxed(settings: &Settings) -> Box<dyn Codegen> {
        Box::new(PythonCodegen::new(settings))
    }

    fn stuff_vector(&mut self, v: &str, rows: Range<usize>, coeff: &Coeff, stride: usize) {
        let coeff = self.broadcast(rows.len() / stride, coeff);
        let range = if stride > 1 {
            format!("{}:{}:{}", rows.start, rows.end, stride)
        } else {
            format!("{}:{}", rows.start, rows.end)
        };
        self.prob2socp
            .add_lines([format!("{}[{}] += {}", v, range, to_python(&coeff))]);
    }

    fn stuff_matrix(
        &mut self,
        m: &str,
        rows: Range<usize>,
        cols: Range<usize>,
        coeff: &Coeff,
        stride: usize,
    ) {
        let height = rows.len() / stride;
        let coeff = self.broadcast(height, coeff);
        let row_indices = format!("range({}, {}, {})", rows.start, rows.end, stride);
        let lines = match coeff.pattern() {
            Pattern::Diagonal { len, offset, value } => vec![
                format!("{}i.extend({})", m, row_indices),
                format!(
                    "{}j.extend(range({}, {}))",
                    m,
                    cols.start + offset,
                    cols.start + offset + len
                ),
                format!("{}v.extend({}*[{}])", m, len, to_python_float(&value)),
            ],
            Pattern::Column { len, value } => vec![
                format!("{}i.extend({})", m, row_indices),
                format!("{}j.extend({}*[{}])", m, len, cols.start),
                format!("{}v.extend({}*[{}])", m, len, to_python_float(&value)),
            ],
            Pattern::General => vec![
                format!(
                    "_M = o.sparse(o.matrix({}, ({}, {})))",
                    to_python(&coeff),
                    height,
                    cols.len()
                ),
                format!("{}i.extend({} + {}*k for k in _M.I)", m, rows.start, stride),
                format!("{}j.extend({} + k for k in _M.J)", m, cols.start),
                format!("{}v.extend(_M.V)", m),
            ],
        };
        self.prob2socp.add_lines(lines);
    }
}

impl Codegen for PythonCodegen {
    fn target(&self) -> &'static str {
        "python"
    }

    fn functions_setup(&mut self, form: &SocpForm) -> Result<()> {
        self.prob2socp.add_arguments(["params"]);
        self.socp2prob.add_arguments(["x"]);

        self.prob2socp
            .document("Map `params` to the input of a cone solver.");
        if !form.parameters.is_empty() {
            self.prob2socp.document("");
            self.prob2socp.document("`params` should contain:");
            for (name, (rows, cols)) in form.parameters.iter() {
                self.prob2socp
                    .document(format!("  '{}', of shape ({}, {})", name, rows, cols));
            }
        }

        self.prob2socp.add_lines(["import cvxopt as o"]);
        self.prob2socp.newline();
        self.prob2socp
            .add_comment("convert numpy parameters to cvxopt matrices, if numpy is available");
        self.prob2socp.add_lines([
            "try:",
            "    import numpy as np",
            "    params = {k: o.matrix(v) if isinstance(v, np.ndarray) else v for k, v in params.items()}",
            "except ImportError:",
            "    pass",
        ]);
        self.prob2socp.newline();
        self.prob2socp.add_lines([
            format!("p, m, n = {}, {}, {}", form.p, form.m, form.n),
            "c = o.matrix(0.0, (n, 1))".to_string(),
            "h = o.matrix(0.0, (m, 1))".to_string(),
            "b = o.matrix(0.0, (p, 1))".to_string(),
            "Gi, Gj, Gv = [], [], []".to_string(),
            "Ai, Aj, Av = [], [], []".to_string(),
        ]);
        self.prob2socp.newline();
        Ok(())
    }

    fn stuff_c(&mut self, rows: Range<usize>, coeff: &Coeff) -> Result<()> {
        self.stuff_vector("c", rows, coeff, 1);
        Ok(())
    }

    fn stuff_b(&mut self, rows: Range<usize>, coeff: &Coeff) -> Result<()> {
        self.stuff_vector("b", rows, coeff, 1);
        Ok(())
    }

    fn stuff_h(&mut self, rows: Range<usize>, coeff: &Coeff, stride: Option<usize>) -> Result<()> {
        self.stuff_vector("h", rows, coeff, stride.unwrap_or(1));
        Ok(())
    }

    fn stuff_g(
        &mut self,
        rows: Range<usize>,
        cols: Range<usize>,
        coeff: &Coeff,
        row_stride: usize,
    ) -> Result<()> {
        self.stuff_matrix("G", rows, cols, coeff, row_stride);
        Ok(())
    }

    fn stuff_a(
        &mut self,
        rows: Range<usize>,
        cols: Range<usize>,
        coeff: &Coeff,
        row_stride: usize,
    ) -> Result<()> {
        self.stuff_matrix("A", rows, cols, coeff, row_stride);
        Ok(())
    }

    fn functions_return(&mut self, form: &SocpForm) -> Result<()> {
        let q = if form.cones.is_empty() {
            "[]".to_string()
        } else {
            form.cones
                .iter()
                .map(|b| {
                    if b.count == 1 {
                        format!("[{}]", b.size)
                    } else {
                        format!("{}*[{}]", b.count, b.size)
                    }
                })
                .join(" + ")
        };

        self.prob2socp.newline();
        self.prob2socp.add_lines([
            format!("dims = {{'l': {}, 'q': {}, 's': []}}", form.linear, q),
            "G = o.spmatrix(Gv, Gi, Gj, (m, n), tc='d')".to_string(),
            "A = o.spmatrix(Av, Ai, Aj, (p, n), tc='d')".to_string(),
            "return {'c': c, 'G': G, 'h': h, 'A': A, 'b': b, 'dims': dims}".to_string(),
        ]);

        self.socp2prob
            .document("Recover the problem variables from the solver variable `x`.");
        self.socp2prob.add_lines([format!(
            "return {{{}}}",
            form.variables()
                .map(|s| format!("'{}': x[{}:{}]", s.name, s.start, s.start + s.len))
                .join(", ")
        )]);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Generated> {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        let code = handlebars.render_template(
            TEMPLATE,
            &TemplateData {
                version: env!("CARGO_PKG_VERSION"),
                functions: vec![self.prob2socp.to_template(), self.socp2prob.to_template()],
            },
        )?;
        if self.debug {
            debug!("generated python:\n{}", code);
        }
        Ok(Generated::Source {
            target: "python",
            code,
        })
    }
}
