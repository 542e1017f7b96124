use std::collections::HashMap;

use socpc::{Compiler, Settings, SocpForm};

/// For a given model file, the expected layout of its canonical form once
/// the dimensions are bound.
struct Model {
    /// The name of this test (which should correspond to a `.dcp` file).
    name: &'static str,
    /// The dimensions to bind before canonicalizing.
    dims: &'static [(&'static str, usize)],
    /// The expected `(n, m, p)`.
    size: (usize, usize, usize),
    /// Further properties the canonical form must satisfy.
    oracle: Option<fn(form: &SocpForm) -> bool>,
}

impl Model {
    fn source(&self) -> String {
        let path = format!("{}/tests/models/{}.dcp", env!("CARGO_MANIFEST_DIR"), self.name);
        std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {}", path, e))
    }

    fn compiler(&self) -> Compiler {
        let mut c = Compiler::new(Settings::default());
        c.parse(&self.source()).unwrap();
        c.set_dims(
            self.dims
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<HashMap<_, _>>(),
        )
        .unwrap();
        c.canonicalize().unwrap();
        c
    }

    fn check(&self) {
        let mut c = self.compiler();
        let form = c.form().unwrap();
        assert_eq!(
            (form.n, form.m, form.p),
            self.size,
            "{}: unexpected size",
            self.name
        );
        let cone_rows: usize = form.cones.iter().map(|b| b.count * b.size).sum();
        assert_eq!(form.linear + cone_rows, form.m, "{}: rows", self.name);
        if let Some(oracle) = self.oracle {
            assert!(oracle(form), "{}: oracle rejected\n{}", self.name, form);
        }

        let python = c.codegen("python").unwrap().source().unwrap().to_owned();
        assert!(python.contains("def prob_to_socp(params):"), "{}", python);
        assert!(python.contains("def socp_to_prob(x):"), "{}", python);
        assert!(c.codegen("native").unwrap().native().is_some());
    }
}

// ===================================================================
// Models
// ===================================================================

/// The master list of active models.
static MODELS: &[Model] = &[
    Model {
        name: "least_squares",
        dims: &[("m", 5), ("n", 3)],
        size: (4, 6, 0),
        oracle: Some(least_squares_oracle),
    },
    Model {
        name: "lasso",
        dims: &[("m", 5), ("n", 3)],
        size: (7, 12, 0),
        oracle: Some(lasso_oracle),
    },
    Model {
        name: "portfolio",
        dims: &[("n", 4)],
        size: (8, 16, 1),
        oracle: Some(portfolio_oracle),
    },
    Model {
        name: "feasibility",
        dims: &[],
        size: (3, 4, 1),
        oracle: None,
    },
];

fn least_squares_oracle(form: &SocpForm) -> bool {
    form.linear == 0 && form.cone_sizes() == vec![6] && form.multiplier == 1.0
}

fn lasso_oracle(form: &SocpForm) -> bool {
    let mut sizes = form.cone_sizes();
    sizes.sort();
    sizes == vec![2, 2, 2, 6] && form.slots.iter().filter(|s| s.auxiliary).count() == 2
}

fn portfolio_oracle(form: &SocpForm) -> bool {
    form.multiplier == -1.0
        && form.linear == 4
        && form.cone_sizes() == vec![3; 4]
        && form.variables().map(|s| s.name.as_str()).collect::<Vec<_>>() == vec!["w"]
}

#[test]
fn models() {
    for model in MODELS {
        model.check();
    }
}

#[test]
fn codegen_is_deterministic() {
    let model = &MODELS[1];
    let mut a = model.compiler();
    let mut b = model.compiler();
    assert_eq!(
        a.codegen("python").unwrap().to_string(),
        b.codegen("python").unwrap().to_string()
    );
}
