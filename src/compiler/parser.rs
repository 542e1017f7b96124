use anyhow::*;
use owo_colors::OwoColorize;
use pest::{iterators::Pair, Parser};

use super::fold;
use super::node::{Comparison, LeafKind, Node};
use super::program::{Declaration, Objective, Program, Sense};
use super::types::{Dim, Shape, Sign};
use crate::errors::CompileError;

#[derive(Parser)]
#[grammar = "compiler/dcp.pest"]
struct DcpParser;

fn make_src_error(src: &str, lc: (usize, usize)) -> String {
    format!("at line {}: {}", lc.0, src.trim().white().bold())
}

fn parse_integer(pair: Pair<Rule>) -> Result<usize> {
    pair.as_str()
        .parse::<usize>()
        .with_context(|| anyhow!("invalid integer `{}`", pair.as_str()))
}

fn parse_dim(pair: Pair<Rule>) -> Result<Dim> {
    let mut r = Dim::lit(0);
    for term in pair.into_inner() {
        let term = term.into_inner().next().ok_or_else(|| anyhow!("empty dimension"))?;
        let d = match term.as_rule() {
            Rule::integer => Dim::lit(parse_integer(term)?),
            Rule::ident => Dim::sym(term.as_str()),
            Rule::scaled_dim => {
                let mut parts = term.into_inner();
                let k = parts
                    .next()
                    .ok_or_else(|| anyhow!("missing factor"))
                    .and_then(parse_integer)?;
                let s = parts.next().ok_or_else(|| anyhow!("missing dimension"))?;
                Dim::sym(s.as_str()).scaled(k)
            }
            x => unreachable!("{:?}", x),
        };
        r = &r + &d;
    }
    Ok(r)
}

fn parse_shape(pair: Pair<Rule>) -> Result<Shape> {
    let dims = pair.into_inner().map(parse_dim).collect::<Result<Vec<_>>>()?;
    Ok(match dims.as_slice() {
        [r] => Shape::vector(r.clone()),
        [r, c] => Shape::matrix(r.clone(), c.clone()),
        _ => unreachable!(),
    })
}

fn parse_declared(pair: Pair<Rule>, kind: LeafKind) -> Result<Declaration> {
    let mut d = Declaration {
        name: String::new(),
        kind,
        shape: Shape::Scalar,
        sign: Sign::Neither,
    };
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::ident => d.name = p.as_str().to_owned(),
            Rule::shape => d.shape = parse_shape(p)?,
            Rule::sign => {
                if kind == LeafKind::Variable {
                    bail!("variables can not carry a sign annotation")
                }
                d.sign = match p.into_inner().next().map(|s| s.as_rule()) {
                    Some(Rule::positive) => Sign::Positive,
                    Some(Rule::negative) => Sign::Negative,
                    _ => Sign::Neither,
                };
            }
            x => unreachable!("{:?}", x),
        }
    }
    Ok(d)
}

/// Wrap a reference to a declared leaf in the cast matching its shape.
fn reference(program: &Program, name: &str) -> Result<Node> {
    let d = program
        .lookup(name)
        .ok_or_else(|| CompileError::Undeclared(name.to_owned()))?;
    let node = d.node();
    match d.shape {
        Shape::Scalar => Ok(node),
        Shape::Vector(_) => fold::to_vector(&node),
        Shape::Matrix(..) => fold::to_matrix(&node),
    }
}

fn parse_range(pair: Pair<Rule>) -> Result<Option<(usize, usize)>> {
    let inner = pair.into_inner().next().ok_or_else(|| anyhow!("empty range"))?;
    match inner.as_rule() {
        Rule::all => Ok(None),
        Rule::span => {
            let mut bounds = inner.into_inner();
            let begin = bounds.next().ok_or_else(|| anyhow!("missing bound")).and_then(parse_integer)?;
            let end = bounds.next().ok_or_else(|| anyhow!("missing bound")).and_then(parse_integer)?;
            Ok(Some((begin, end)))
        }
        x => unreachable!("{:?}", x),
    }
}

fn rec_parse(pair: Pair<Rule>, program: &Program) -> Result<Node> {
    match pair.as_rule() {
        Rule::expr => {
            let mut inner = pair.into_inner();
            let mut r = rec_parse(inner.next().ok_or_else(|| anyhow!("empty expression"))?, program)?;
            while let Some(op) = inner.next() {
                let rhs = rec_parse(inner.next().ok_or_else(|| anyhow!("dangling `{}`", op.as_str()))?, program)?;
                r = match op.as_str() {
                    "+" => fold::add(&r, &rhs)?,
                    _ => fold::sub(&r, &rhs)?,
                };
            }
            Ok(r)
        }
        Rule::product => {
            let mut inner = pair.into_inner();
            let mut r = rec_parse(inner.next().ok_or_else(|| anyhow!("empty product"))?, program)?;
            for rhs in inner {
                r = fold::mul(&r, &rec_parse(rhs, program)?)?;
            }
            Ok(r)
        }
        Rule::unary => {
            let mut negations = 0;
            let mut r = None;
            for p in pair.into_inner() {
                match p.as_rule() {
                    Rule::neg => negations += 1,
                    _ => r = Some(rec_parse(p, program)?),
                }
            }
            let r = r.ok_or_else(|| anyhow!("missing operand"))?;
            Ok((0..negations).fold(r, |ax, _| fold::negate(&ax)))
        }
        Rule::postfix => {
            let mut inner = pair.into_inner();
            let mut r = rec_parse(inner.next().ok_or_else(|| anyhow!("missing operand"))?, program)?;
            for _ in inner {
                r = fold::transpose(&r)?;
            }
            Ok(r)
        }
        Rule::number => {
            let x = pair
                .as_str()
                .parse::<f64>()
                .with_context(|| anyhow!("invalid number `{}`", pair.as_str()))?;
            Ok(Node::number(x))
        }
        Rule::ident => reference(program, pair.as_str()),
        Rule::slice => {
            let mut inner = pair.into_inner();
            let name = inner.next().ok_or_else(|| anyhow!("missing slice target"))?;
            let base = reference(program, name.as_str())?;
            let ranges = inner.map(parse_range).collect::<Result<Vec<_>>>()?;
            match ranges.as_slice() {
                [Some((b, e))] | [Some((b, e)), None] => fold::slice(&base, *b, *e, 0),
                [None, Some((b, e))] => fold::slice(&base, *b, *e, 1),
                [None] | [None, None] => Ok(base),
                _ => bail!(CompileError::InvalidSlice(
                    name.as_str().to_owned(),
                    "only one dimension may be sliced at once".into()
                )),
            }
        }
        Rule::call => {
            let mut inner = pair.into_inner();
            let name = inner.next().ok_or_else(|| anyhow!("missing function name"))?;
            let args = inner
                .map(|a| rec_parse(a, program))
                .collect::<Result<Vec<_>>>()?;
            fold::atom(name.as_str(), args)
        }
        Rule::stack => {
            let args = pair
                .into_inner()
                .map(|a| rec_parse(a, program))
                .collect::<Result<Vec<_>>>()?;
            fold::vstack(args)
        }
        x => unreachable!("{:?}", x),
    }
}

fn parse_constraint(pair: Pair<Rule>, program: &mut Program) -> Result<()> {
    let mut inner = pair.into_inner();
    let mut lhs = rec_parse(inner.next().ok_or_else(|| anyhow!("empty constraint"))?, program)?;
    while let Some(op) = inner.next() {
        let op = match op.as_str() {
            "<=" => Comparison::Le,
            "==" => Comparison::Eq,
            _ => Comparison::Ge,
        };
        let rhs = rec_parse(inner.next().ok_or_else(|| anyhow!("dangling comparison"))?, program)?;
        if let Some(c) = fold::compare(&lhs, op, &rhs)? {
            program.constraints.push(c);
        }
        lhs = rhs;
    }
    Ok(())
}

fn parse_statement(pair: Pair<Rule>, program: &mut Program) -> Result<()> {
    match pair.as_rule() {
        Rule::dimension_decl => {
            let mut inner = pair.into_inner();
            let name = inner.next().ok_or_else(|| anyhow!("missing dimension name"))?;
            let value = inner.next().map(parse_integer).transpose()?;
            program.declare_dimension(name.as_str(), value)
        }
        Rule::dimensions_decl => {
            for name in pair.into_inner() {
                program.declare_dimension(name.as_str(), None)?;
            }
            Ok(())
        }
        Rule::parameter_decl | Rule::parameters_decl | Rule::variable_decl | Rule::variables_decl => {
            let kind = if matches!(pair.as_rule(), Rule::parameter_decl | Rule::parameters_decl) {
                LeafKind::Parameter
            } else {
                LeafKind::Variable
            };
            for d in pair.into_inner() {
                program.declare(parse_declared(d, kind)?)?;
            }
            Ok(())
        }
        Rule::objective => {
            let mut inner = pair.into_inner();
            let sense = match inner.next().map(|s| s.as_str()) {
                Some("maximize") => Sense::Maximize,
                _ => Sense::Minimize,
            };
            let expr = rec_parse(inner.next().ok_or_else(|| anyhow!("missing objective"))?, program)?;
            program.objective = Objective { sense, expr };
            Ok(())
        }
        Rule::constraint => parse_constraint(pair, program),
        x => unreachable!("{:?}", x),
    }
}

/// Parse a problem description into a [`Program`]. The program is not
/// checked for DCP compliance.
pub fn parse(source: &str) -> Result<Program> {
    let mut program = Program::default();

    for pair in DcpParser::parse(Rule::program, source)? {
        if pair.as_rule() == Rule::program {
            for statement in pair.into_inner() {
                if statement.as_rule() != Rule::EOI {
                    let lc = statement.as_span().start_pos().line_col();
                    let src = statement.as_str().to_owned();
                    parse_statement(statement, &mut program)
                        .with_context(|| make_src_error(&src, lc))?;
                }
            }
        }
    }

    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{Curvature, Expression};

    #[test]
    fn declarations() {
        let p = parse(
            "dimensions m n
            dimension k = 4
            parameter A(m, n)
            parameters b(m) c positive
            variable x(n)
            minimize c*norm(A*x - b)",
        )
        .unwrap();
        assert_eq!(p.dimensions, vec!["m", "n", "k"]);
        assert_eq!(p.bound.get("k"), Some(&4));
        assert_eq!(p.parameters.len(), 3);
        assert_eq!(p.parameter("c").unwrap().sign, Sign::Positive);
        assert_eq!(p.objective.expr.curvature(), Curvature::Convex);
        assert!(p.is_dcp());
    }

    #[test]
    fn chained_constraints() {
        let p = parse(
            "variable x
            minimize x
            subject to
                0 <= x <= 1  # a box
                2 <= 3",
        )
        .unwrap();
        assert_eq!(p.constraints.len(), 2);
        assert_eq!(p.constraints[0].to_string(), "-x <= 0");
        assert_eq!(p.constraints[1].to_string(), "-1 + x <= 0");
    }

    #[test]
    fn slices_and_stacks() {
        let p = parse(
            "dimension n
            variable x(n)
            parameter A(3, n)
            minimize norm([x(0:2); A(0:1, :)*x])",
        )
        .unwrap();
        match p.objective.expr.e() {
            Expression::Norm(args) => {
                assert_eq!(args.len(), 1);
                assert_eq!(args[0].shape(), &Shape::vector(Dim::lit(3)));
            }
            x => panic!("expected a norm, found {:?}", x),
        }
    }

    #[test]
    fn undeclared() {
        assert!(parse("minimize y").is_err());
        assert!(parse("parameter A(n)").is_err());
        assert!(parse("variable x\nvariable x").is_err());
    }

    #[test]
    fn infeasible_literals() {
        let err = parse("variable x\nminimize x\n5 <= 3").unwrap_err();
        assert!(err
            .chain()
            .any(|e| e.downcast_ref::<crate::errors::Infeasible>().is_some()));
    }
}
