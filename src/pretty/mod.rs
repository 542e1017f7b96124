use itertools::Itertools;
use owo_colors::{colored::Color, OwoColorize};

use crate::compiler::{Curvature, Expression, Node, Program, RelOp};
use crate::transformer::{SocpForm, Target};

pub const COLORS: [Color; 7] = [
    Color::Green,
    Color::Yellow,
    Color::BrightBlue,
    Color::Red,
    Color::Magenta,
    Color::Cyan,
    Color::BrightWhite,
];

pub trait Pretty {
    fn pretty(&self) -> String;
}

impl Pretty for Curvature {
    fn pretty(&self) -> String {
        match self {
            Curvature::Constant => self.to_string().white().to_string(),
            Curvature::Affine => self.to_string().green().to_string(),
            Curvature::Convex | Curvature::Concave => self.to_string().yellow().to_string(),
            Curvature::Nonconvex => self.to_string().red().bold().to_string(),
        }
    }
}

impl Pretty for Node {
    fn pretty(&self) -> String {
        fn rec_pretty(s: &Node, depth: usize) -> String {
            let c = &COLORS[depth % COLORS.len()];
            match s.e() {
                Expression::Number(_) | Expression::Parameter(_) | Expression::Variable(_) => {
                    s.to_string().color(*c).to_string()
                }
                Expression::Add(l, r) => format!(
                    "{} {} {}",
                    rec_pretty(l, depth + 1),
                    "+".color(*c),
                    rec_pretty(r, depth + 1)
                ),
                Expression::Multiply(l, r) => format!(
                    "{}{}{}",
                    rec_pretty(l, depth + 1),
                    "*".color(*c),
                    rec_pretty(r, depth + 1)
                ),
                Expression::Negate(x) => format!("{}{}", "-".color(*c), rec_pretty(x, depth + 1)),
                Expression::Transpose(x) => format!("{}{}", rec_pretty(x, depth), "'".color(*c)),
                Expression::Slice { .. } => s.to_string().color(*c).to_string(),
                Expression::ToVector(x) | Expression::ToMatrix(x) => rec_pretty(x, depth),
                Expression::Atom { atom, args } => {
                    format!("{}({})", atom.color(*c), format_list(args, depth + 1, ", "))
                }
                Expression::Norm(args) => {
                    format!("{}({})", "norm".color(*c), format_list(args, depth + 1, ", "))
                }
                Expression::Abs(x) => format!("{}({})", "abs".color(*c), rec_pretty(x, depth + 1)),
                Expression::Vstack(args) => format!(
                    "{}{}{}",
                    "[".color(*c),
                    format_list(args, depth + 1, "; "),
                    "]".color(*c)
                ),
            }
        }
        fn format_list(cs: &[Node], depth: usize, sep: &str) -> String {
            cs.iter().map(|c| rec_pretty(c, depth)).join(sep)
        }
        rec_pretty(self, 0)
    }
}

impl Pretty for RelOp {
    fn pretty(&self) -> String {
        format!(
            "{} {} {}    {}",
            self.lhs.pretty(),
            self.op.bold(),
            self.rhs.pretty(),
            format!("# {}", self.lhs.curvature()).dimmed()
        )
    }
}

impl Pretty for Program {
    fn pretty(&self) -> String {
        let mut r = Vec::new();
        for d in self.dimensions.iter() {
            r.push(match self.bound.get(d) {
                Some(v) => format!("{} {} = {}", "dimension".blue(), d.bold(), v),
                None => format!("{} {}", "dimension".blue(), d.bold()),
            });
        }
        for d in self.parameters.iter().chain(self.variables.iter()) {
            r.push(d.to_string());
        }
        r.push(format!(
            "{} {}    {}",
            self.objective.sense.to_string().blue(),
            self.objective.expr.pretty(),
            format!("# {}", self.objective.expr.curvature().pretty()).dimmed()
        ));
        if !self.constraints.is_empty() {
            r.push("subject to".blue().to_string());
            for c in self.constraints.iter() {
                r.push(format!("    {}", c.pretty()));
            }
        }
        r.join("\n")
    }
}

impl Pretty for SocpForm {
    fn pretty(&self) -> String {
        let mut r = vec![
            format!(
                "{} = {}, {} = {}, {} = {}",
                "n".bold(),
                self.n,
                "m".bold(),
                self.m,
                "p".bold(),
                self.p
            ),
            format!(
                "{}: l = {}, q = [{}]",
                "cones".bold(),
                self.linear,
                self.cones
                    .iter()
                    .map(|b| format!("{}×{}", b.count, b.size))
                    .join(", ")
            ),
        ];
        for s in self.slots.iter() {
            let name = format!("{}[{}:{}]", s.name, s.start, s.start + s.len);
            r.push(if s.auxiliary {
                name.dimmed().to_string()
            } else {
                name.bold().to_string()
            });
        }
        for i in self.instructions.iter() {
            let color = match i.target {
                Target::C => Color::Green,
                Target::A | Target::B => Color::BrightBlue,
                Target::G | Target::H => Color::Magenta,
            };
            r.push(format!("  {}", i.to_string().color(color)));
        }
        r.join("\n")
    }
}
