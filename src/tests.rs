use std::collections::HashMap;

use anyhow::*;
use maplit::hashmap;

use crate::compiler::{fold, Comparison, Curvature, Dim, Expression, Node, Shape, Sign};
use crate::errors::{CompileError, ConfigError, ExternalError, Infeasible, StateError};
use crate::exporters::native::SocpData;
use crate::structs::{dense, Dense};
use crate::transformer::Target;
use crate::{Compiler, Settings, Solution, Solver, SolverInfo, Stage};

fn make(source: &str, dims: &[(&str, usize)]) -> Result<()> {
    let mut c = Compiler::new(Settings::default());
    c.parse(source)?;
    c.set_dims(dims.iter().map(|(k, v)| (k.to_string(), *v)).collect())?;
    c.canonicalize()?;
    c.codegen("python").map(|_| ())
}

fn must_run(source: &str, dims: &[(&str, usize)]) {
    let r = make(source, dims);
    if let Err(err) = &r {
        eprintln!("{:?}", err);
    }
    assert!(r.is_ok());
}

fn must_fail(source: &str, dims: &[(&str, usize)]) {
    let r = make(source, dims);
    assert!(r.is_err());
}

fn var(name: &str) -> Node {
    Node::variable().name(name).shape(Shape::Scalar).build()
}
fn param(name: &str, sign: Sign) -> Node {
    Node::parameter()
        .name(name)
        .shape(Shape::Scalar)
        .sign(sign)
        .build()
}

/// Answers `x` for the solution vector, and `pcost` as primal cost.
struct MockSolver {
    x: Vec<f64>,
    pcost: f64,
}
impl Solver for MockSolver {
    fn solve(&self, data: &SocpData) -> Result<Solution> {
        if data.c.len() != self.x.len() {
            bail!("expected {} variables, found {}", self.x.len(), data.c.len())
        }
        Ok(Solution {
            x: self.x.clone(),
            info: SolverInfo {
                pcost: self.pcost,
                status: "optimal".into(),
            },
        })
    }
}

#[test]
fn minimal_round_trip() -> Result<()> {
    let mut c = Compiler::new(Settings::default());
    c.parse("variable x\nminimize x\nsubject to\n  x >= 1")?;
    c.canonicalize()?;

    let form = c.form().unwrap();
    assert_eq!((form.n, form.m, form.p), (1, 1, 0));
    assert_eq!(form.linear, 1);
    assert!(form.cones.is_empty());

    let program = c.codegen("native")?.native().unwrap().clone();
    let data = program.prob2socp(&HashMap::new())?;
    assert_eq!(data.c, vec![1.0]);
    assert_eq!(Dense::from(&data.g), dense::scalar(-1.0));
    assert_eq!(data.h, vec![-1.0]);
    assert!(data.b.is_empty());
    assert_eq!(data.a.nnz(), 0);
    assert_eq!((data.dims.l, data.dims.q.len(), data.dims.s.len()), (1, 0, 0));

    let x = program.socp2prob(&[1.0])?;
    assert_eq!(x.len(), 1);
    assert_eq!(x["x"], vec![1.0]);
    Ok(())
}

#[test]
fn state_sequencing() -> Result<()> {
    let mut c = Compiler::new(Settings::default());
    assert_eq!(c.stage(), Stage::Parse);
    let err = c.codegen("python").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StateError>(),
        Some(StateError::NotParsed(_))
    ));
    assert!(c.canonicalize().is_err());
    assert!(c.set_dims(HashMap::new()).is_err());

    c.parse("dimension n\nvariable x(n)\nminimize norm(x)")?;
    assert_eq!(c.stage(), Stage::Canonicalize);
    let err = c.codegen("python").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StateError>(),
        Some(StateError::NotCanonicalized(_))
    ));

    // n is not bound yet
    assert!(c.canonicalize().is_err());
    assert_eq!(c.stage(), Stage::Canonicalize);
    c.set_dims(hashmap! {"n".to_string() => 3})?;
    c.canonicalize()?;
    assert_eq!(c.stage(), Stage::Codegen);

    assert!(c.codegen("python")?.source().is_some());
    assert_eq!(c.stage(), Stage::Complete);
    assert!(c.codegen("native")?.native().is_some());
    assert_eq!(c.stage(), Stage::Complete);

    // changing dimensions canonicalizes again
    c.set_dims(hashmap! {"n".to_string() => 5})?;
    assert_eq!(c.stage(), Stage::Codegen);
    assert_eq!(c.form().unwrap().n, 6);

    // parsing starts over
    c.parse("variable y\nminimize y")?;
    assert_eq!(c.stage(), Stage::Canonicalize);
    assert!(c.form().is_none());
    assert!(c.dims().is_empty());
    Ok(())
}

#[test]
fn unknown_target() -> Result<()> {
    let mut c = Compiler::new(Settings::default());
    c.parse("variable x\nminimize abs(x)")?;
    c.canonicalize()?;
    let err = c.codegen("matlab").unwrap_err();
    match err.downcast_ref::<ConfigError>() {
        Some(ConfigError::UnknownTarget { name, valid }) => {
            assert_eq!(name, "matlab");
            assert_eq!(valid, &vec!["native".to_string(), "python".to_string()]);
        }
        _ => panic!("unexpected error {:?}", err),
    }
    Ok(())
}

#[test]
fn dcp_rejection() {
    must_fail("variable x\nmaximize abs(x)", &[]);
    must_fail("variable x\nminimize sqrt(x)", &[]);
    must_fail("variable x\nminimize x\nsubject to\n  abs(x) >= 1", &[]);
    must_fail("variable x\nminimize x\nsubject to\n  abs(x) == 1", &[]);
    must_fail("variables x y\nminimize x*y", &[]);

    let mut c = Compiler::new(Settings::default());
    assert!(c.parse("variable x\nmaximize square(x)").is_err());
    assert_eq!(c.stage(), Stage::Parse);
    assert!(c.program().is_none());
}

#[test]
fn accepted_programs() {
    must_run("variable x\nmaximize sqrt(x)\nsubject to\n  x <= 4", &[]);
    must_run(
        "dimensions m n\nparameters A(m, n) b(m)\nvariable x(n)\nminimize norm(A*x - b) + sum(abs(x))",
        &[("m", 4), ("n", 2)],
    );
    must_run(
        "dimension n\nparameter mu(n)\nparameter gamma positive\nvariable w(n)\n\
         maximize mu'*w - gamma*sum(square(w))\nsubject to\n  sum(w) == 1\n  w >= 0",
        &[("n", 3)],
    );
    must_run("variable x\nminimize pos(x - 1) + neg(x + 1)", &[]);
}

#[test]
fn trivial_infeasibility() {
    let mut c = Compiler::new(Settings::default());
    let err = c
        .parse("variable x\nminimize x\nsubject to\n  3 <= 2")
        .unwrap_err();
    assert!(err.downcast_ref::<Infeasible>().is_some());
    assert!(fold::compare(&Node::number(1.0), Comparison::Eq, &Node::one())
        .unwrap()
        .is_none());
}

#[test]
fn fold_properties() -> Result<()> {
    let x = var("x");
    let y = var("y");
    let a = param("a", Sign::Positive);

    // idempotence
    let e = fold::add(&fold::mul(&a, &x)?, &y)?;
    assert_eq!(fold::add(&e, &Node::zero())?.to_string(), e.to_string());

    // involution
    assert_eq!(fold::negate(&fold::negate(&e)), e);

    // zero elimination and identities
    assert!(fold::sub(&x, &x)?.is_zero());
    assert_eq!(fold::add(&x, &Node::zero())?, x);
    assert_eq!(fold::mul(&Node::one(), &x)?, x);
    assert!(fold::mul(&Node::zero(), &x)?.is_zero());
    assert_eq!(fold::add(&x, &x)?.to_string(), "2*x");

    // distribution
    let d = fold::mul(&a, &fold::add(&x, &y)?)?;
    assert!(matches!(d.e(), Expression::Add(..)));
    assert_eq!(d.curvature(), Curvature::Affine);
    assert!(fold::is_normalized(&d));

    // constant folding keeps literals on the left
    let f = fold::add(&fold::add(&Node::number(2.0), &x)?, &Node::number(3.0))?;
    assert_eq!(f.to_string(), "5 + x");
    Ok(())
}

fn vector(name: &str, len: usize) -> Node {
    Node::variable()
        .name(name)
        .shape(Shape::vector(Dim::lit(len)))
        .build()
}

/// Build `e` again through the smart constructors.
fn refold(e: &Node) -> Result<Node> {
    match e.e() {
        Expression::Add(l, r) => fold::add(&refold(l)?, &refold(r)?),
        Expression::Multiply(l, r) => fold::mul(&refold(l)?, &refold(r)?),
        Expression::Negate(x) => Ok(fold::negate(&refold(x)?)),
        Expression::Transpose(x) => fold::transpose(&refold(x)?),
        Expression::Vstack(args) => fold::vstack(args.iter().map(refold).collect::<Result<_>>()?),
        _ => Ok(e.clone()),
    }
}

fn folded_expressions() -> Result<Vec<Node>> {
    let x = var("x");
    let y = var("y");
    let a = param("a", Sign::Positive);
    let b = param("b", Sign::Neither);
    let two = Node::number(2.0);
    let three = Node::number(3.0);
    let v = vector("v", 4);
    let mu = Node::parameter()
        .name("mu")
        .shape(Shape::vector(Dim::lit(4)))
        .build();

    Ok(vec![
        // (2 + x) + (3 + y)
        fold::add(&fold::add(&two, &x)?, &fold::add(&three, &y)?)?,
        // 2*(x + 1) - x
        fold::sub(&fold::mul(&two, &fold::add(&x, &Node::one())?)?, &x)?,
        // a*(x + y)
        fold::mul(&a, &fold::add(&x, &y)?)?,
        // -(3*x - y)
        fold::negate(&fold::sub(&fold::mul(&three, &x)?, &y)?),
        // 2*(3*x)
        fold::mul(&two, &fold::mul(&three, &x)?)?,
        // a*x + (-b)*y
        fold::add(&fold::mul(&a, &x)?, &fold::mul(&fold::negate(&b), &y)?)?,
        // v(0:2) + 2*v(2:4)
        fold::add(
            &fold::slice(&v, 0, 2, 0)?,
            &fold::mul(&two, &fold::slice(&v, 2, 4, 0)?)?,
        )?,
        // [x + 1; -y]
        fold::vstack(vec![fold::add(&x, &Node::one())?, fold::negate(&y)])?,
        // mu'*v
        fold::mul(&fold::transpose(&mu)?, &v)?,
        // -(x + 2) + 2
        fold::add(&fold::negate(&fold::add(&x, &two)?), &two)?,
        // abs(x - y) + a*x
        fold::add(&fold::abs(&fold::sub(&x, &y)?)?, &fold::mul(&a, &x)?)?,
    ])
}

#[test]
fn folding_is_stable() -> Result<()> {
    for e in folded_expressions()? {
        assert!(fold::is_normalized(&e), "{} is not normalized", e);
        assert_eq!(fold::negate(&fold::negate(&e)), e, "double negation of {}", e);
        let again = refold(&e)?;
        assert_eq!(again.to_string(), e.to_string());
        assert_eq!(again.curvature(), e.curvature(), "curvature of {}", e);
        assert_eq!(again.shape(), e.shape(), "shape of {}", e);
    }
    Ok(())
}

#[test]
fn folding_merges_literals() -> Result<()> {
    let e = folded_expressions()?;
    assert_eq!(e[0].to_string(), "5 + x + y");
    assert_eq!(e[4].to_string(), "6*x");
    assert_eq!(e[9], fold::negate(&var("x")));
    assert_eq!(e[8].shape(), &Shape::Scalar);
    assert_eq!(e[6].shape(), &Shape::vector(Dim::lit(2)));
    Ok(())
}

#[test]
fn casts() -> Result<()> {
    let x = var("x");
    let v = vector("v", 3);
    let m = Node::parameter()
        .name("M")
        .shape(Shape::matrix(Dim::lit(2), Dim::lit(3)))
        .build();

    assert!(matches!(fold::to_vector(&v)?.e(), Expression::ToVector(_)));
    assert!(matches!(fold::to_matrix(&m)?.e(), Expression::ToMatrix(_)));
    let cast = fold::to_vector(&v)?;
    assert_eq!(fold::to_vector(&cast)?, cast);

    for err in [
        fold::to_vector(&x),
        fold::to_vector(&m),
        fold::to_matrix(&x),
        fold::to_matrix(&v),
    ] {
        let err = err.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CompileError>(),
            Some(CompileError::InvalidCast(..))
        ));
    }
    Ok(())
}

#[test]
fn solve_with_mock_solver() -> Result<()> {
    let mut c = Compiler::new(Settings::default()).with_solver(Box::new(MockSolver {
        x: vec![1.0, 2.0, 2.5],
        pcost: 2.5,
    }));
    c.parse("dimension n\nparameter b(n)\nvariable x(n)\nminimize norm(x - b) + 1")?;
    let r = c.solve(
        &hashmap! {"b".to_string() => dense::column(vec![0.0, 0.0])},
        None,
    )?;
    assert_eq!(c.dims().get("n"), Some(&2));
    assert_eq!(r.variables["x"], vec![1.0, 2.0]);
    assert_eq!(r.objval, 3.5);
    assert_eq!(r.info.status, "optimal");
    assert_eq!(c.stage(), Stage::Complete);
    assert!(c.generated().and_then(|g| g.native()).is_some());
    Ok(())
}

#[test]
fn solve_goes_through_codegen() -> Result<()> {
    let mut c = Compiler::new(Settings::default()).with_solver(Box::new(MockSolver {
        x: vec![0.5, 0.5],
        pcost: 0.5,
    }));
    c.parse("variable x
minimize abs(x)")?;
    c.canonicalize()?;
    assert!(c.codegen("python")?.source().is_some());

    let r = c.solve(&HashMap::new(), None)?;
    assert_eq!(r.objval, 0.5);
    assert_eq!(c.stage(), Stage::Complete);
    assert_eq!(c.generated().map(|g| g.target()), Some("native"));
    Ok(())
}

#[test]
fn bound_dimensions_are_fixed() -> Result<()> {
    let mut c = Compiler::new(Settings::default());
    c.parse("dimension k = 4
variable x(k)
minimize norm(x)")?;
    c.set_dims(hashmap! {"k".to_string() => 4})?;
    let err = c.set_dims(hashmap! {"k".to_string() => 5}).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::ConflictingDimension(name, 4, 5)) if name == "k"
    ));
    assert_eq!(c.dims().get("k"), Some(&4));
    c.canonicalize()?;
    assert_eq!(c.form().unwrap().n, 5);
    Ok(())
}

#[test]
fn solve_maximization() -> Result<()> {
    let mut c = Compiler::new(Settings::default()).with_solver(Box::new(MockSolver {
        x: vec![4.0, 2.0],
        pcost: -2.0,
    }));
    c.parse("variable x\nmaximize sqrt(x)\nsubject to\n  x <= 4")?;
    let r = c.solve(&HashMap::new(), Some(HashMap::new()))?;
    assert_eq!(r.objval, 2.0);
    assert_eq!(r.variables.len(), 1);
    Ok(())
}

#[test]
fn solve_without_solver() -> Result<()> {
    let mut c = Compiler::new(Settings::default());
    c.parse("variable x\nminimize abs(x)")?;
    let err = c.solve(&HashMap::new(), None).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ExternalError>(),
        Some(ExternalError::MissingSolver)
    ));
    Ok(())
}

#[test]
fn conflicting_dimensions() -> Result<()> {
    let mut c = Compiler::new(Settings::default()).with_solver(Box::new(MockSolver {
        x: vec![],
        pcost: 0.0,
    }));
    c.parse("dimension n\nparameters a(n) b(n)\nvariable x(n)\nminimize norm(x - a - b)")?;
    let err = c
        .solve(
            &hashmap! {
                "a".to_string() => dense::column(vec![1.0, 2.0]),
                "b".to_string() => dense::column(vec![1.0, 2.0, 3.0]),
            },
            None,
        )
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::ConflictingDimension(..))
    ));
    Ok(())
}

#[test]
fn slots_cover_the_variables() -> Result<()> {
    let mut c = Compiler::new(Settings::default());
    c.parse(
        "dimension n\nvariables x(n) y\nminimize norm(x) + square(y) + abs(y)\nsubject to\n  x(0:2) <= 1",
    )?;
    c.set_dims(hashmap! {"n".to_string() => 4})?;
    c.canonicalize()?;
    let form = c.form().unwrap();

    let mut covered = vec![false; form.n];
    for s in form.slots.iter() {
        for i in s.range() {
            assert!(!covered[i], "{} overlaps", s.name);
            covered[i] = true;
        }
    }
    assert!(covered.iter().all(|c| *c));

    for i in form.instructions.iter() {
        if let Some(cols) = &i.cols {
            assert!(cols.end <= form.n);
        }
        let limit = match i.target {
            Target::C => form.n,
            Target::A | Target::B => form.p,
            Target::G | Target::H => form.m,
        };
        let last = i.rows.clone().step_by(i.row_stride).last().unwrap();
        assert!(last < limit, "{} out of bounds", i);
        assert_eq!(i.rows.clone().step_by(i.row_stride).count(), i.height());
    }
    Ok(())
}

#[test]
fn malformed_programs() {
    must_fail("variable x\nminimize norm(x", &[]);
    must_fail("dimension n\nvariable x(n)\nminimize norm(x)\nsubject to\n  x(2:5) <= 1", &[("n", 3)]);
    must_fail("variable x\nvariable x\nminimize x", &[]);
    must_fail("variable x\nminimize frobnicate(x)", &[]);
    let err = make("variable x\nminimize frobnicate(x)", &[]).unwrap_err();
    assert!(err.downcast_ref::<CompileError>().is_some());
}
