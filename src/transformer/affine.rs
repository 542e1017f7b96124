use anyhow::*;

use super::coeff::Coeff;

/// The contribution of a variable slot to some rows of an affine
/// expression: `coeff * z[slot]`, placed at `row`.
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub slot: usize,
    pub row: usize,
    pub coeff: Coeff,
}

/// A constant column, placed at `row`.
#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    pub row: usize,
    pub coeff: Coeff,
}

/// A column affine expression over the variable slots, with every
/// coefficient shaped exactly after the rows it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct Affine {
    pub rows: usize,
    pub terms: Vec<Term>,
    pub constants: Vec<Constant>,
}

impl Affine {
    pub fn zero(rows: usize) -> Affine {
        Affine {
            rows,
            terms: Vec::new(),
            constants: Vec::new(),
        }
    }

    pub fn constant(c: Coeff, rows: usize) -> Affine {
        let mut r = Affine::zero(rows);
        if !c.is_zero() {
            r.constants.push(Constant {
                row: 0,
                coeff: c.broadcast(rows, 1),
            });
        }
        r
    }

    pub fn variable(slot: usize, len: usize) -> Affine {
        let mut r = Affine::zero(len);
        r.terms.push(Term {
            slot,
            row: 0,
            coeff: if len == 1 {
                Coeff::Number(1.0)
            } else {
                Coeff::Eye(len)
            },
        });
        r
    }

    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    /// Repeat a single-row expression over `rows` rows.
    pub fn broadcast(self, rows: usize) -> Affine {
        if self.rows == 1 && rows > 1 {
            self.premultiply(Coeff::Ones(rows), rows)
        } else {
            self
        }
    }

    pub fn add(self, other: Affine) -> Result<Affine> {
        let rows = self.rows.max(other.rows);
        let (l, r) = (self.broadcast(rows), other.broadcast(rows));
        if l.rows != r.rows {
            bail!("can not add affine expressions of {} and {} rows", l.rows, r.rows)
        }
        let mut terms = l.terms;
        terms.extend(r.terms);
        let mut constants = l.constants;
        constants.extend(r.constants);
        Ok(Affine {
            rows,
            terms,
            constants,
        }
        .simplified())
    }

    pub fn neg(self) -> Affine {
        Affine {
            rows: self.rows,
            terms: self
                .terms
                .into_iter()
                .map(|t| Term {
                    coeff: t.coeff.neg(),
                    ..t
                })
                .collect(),
            constants: self
                .constants
                .into_iter()
                .map(|c| Constant {
                    coeff: c.coeff.neg(),
                    ..c
                })
                .collect(),
        }
    }

    /// Multiply every coefficient by the scalar `k`.
    pub fn scale(self, k: Coeff) -> Affine {
        let rows = self.rows;
        self.premultiply(k, rows)
    }

    /// Compute `c * self`, where `c` is either a scalar or a `rows x
    /// self.rows` coefficient.
    pub fn premultiply(self, c: Coeff, rows: usize) -> Affine {
        if c.is_scalar() && self.rows == rows {
            return Affine {
                rows,
                terms: self
                    .terms
                    .into_iter()
                    .map(|t| Term {
                        coeff: c.clone().mul(t.coeff),
                        ..t
                    })
                    .collect(),
                constants: self
                    .constants
                    .into_iter()
                    .map(|k| Constant {
                        coeff: c.clone().mul(k.coeff),
                        ..k
                    })
                    .collect(),
            }
            .simplified();
        }

        // each piece only sees the columns of `c` matching its rows
        let columns = |row: usize, coeff: &Coeff| {
            let height = coeff.shape().0;
            c.clone().slice(row, row + height, 1)
        };
        Affine {
            rows,
            terms: self
                .terms
                .iter()
                .map(|t| Term {
                    slot: t.slot,
                    row: 0,
                    coeff: columns(t.row, &t.coeff).mul(t.coeff.clone()),
                })
                .collect(),
            constants: self
                .constants
                .iter()
                .map(|k| Constant {
                    row: 0,
                    coeff: columns(k.row, &k.coeff).mul(k.coeff.clone()),
                })
                .collect(),
        }
        .simplified()
    }

    /// Stack expressions on top of each other.
    pub fn stack(parts: Vec<Affine>) -> Affine {
        let mut r = Affine::zero(0);
        for p in parts {
            let offset = r.rows;
            r.terms.extend(p.terms.into_iter().map(|t| Term {
                row: t.row + offset,
                ..t
            }));
            r.constants
                .extend(p.constants.into_iter().map(|c| Constant {
                    row: c.row + offset,
                    ..c
                }));
            r.rows += p.rows;
        }
        r
    }

    /// The single-row sum of all the rows.
    pub fn sum(self) -> Affine {
        if self.rows == 1 {
            return self;
        }
        let rows = self.rows;
        self.premultiply(Coeff::Ones(rows).transpose(), 1)
    }

    /// Merge the pieces covering the same rows of the same slot, and drop
    /// the null ones.
    fn simplified(self) -> Affine {
        let mut terms: Vec<Term> = Vec::with_capacity(self.terms.len());
        for t in self.terms {
            match terms.iter_mut().find(|u| {
                u.slot == t.slot && u.row == t.row && u.coeff.shape() == t.coeff.shape()
            }) {
                Some(u) => u.coeff = u.coeff.clone().add(t.coeff),
                None => terms.push(t),
            }
        }
        terms.retain(|t| !t.coeff.is_zero());

        let mut constants: Vec<Constant> = Vec::with_capacity(self.constants.len());
        for k in self.constants {
            match constants
                .iter_mut()
                .find(|c| c.row == k.row && c.coeff.shape() == k.coeff.shape())
            {
                Some(c) => c.coeff = c.coeff.clone().add(k.coeff),
                None => constants.push(k),
            }
        }
        constants.retain(|c| !c.coeff.is_zero());

        Affine {
            rows: self.rows,
            terms,
            constants,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcasting() {
        let x = Affine::variable(0, 3);
        let t = Affine::variable(1, 1);
        let e = x.add(t).unwrap();
        assert_eq!(e.rows, 3);
        assert_eq!(e.terms.len(), 2);
        assert_eq!(e.terms[1].coeff.shape(), (3, 1));
    }

    #[test]
    fn cancellation() {
        let x = Affine::variable(0, 1);
        let e = x.clone().add(x.neg()).unwrap();
        assert!(e.terms.is_empty());
        assert!(e.is_constant());
    }

    #[test]
    fn stacking() {
        let e = Affine::stack(vec![
            Affine::variable(0, 1),
            Affine::constant(Coeff::Number(2.0), 2),
            Affine::variable(1, 3),
        ]);
        assert_eq!(e.rows, 6);
        assert_eq!(e.terms[1].row, 3);
        assert_eq!(e.constants[0].row, 1);
        assert_eq!(e.constants[0].coeff.shape(), (2, 1));
    }

    #[test]
    fn premultiplication() {
        let a = Coeff::Parameter {
            name: "A".into(),
            rows: 2,
            cols: 4,
        };
        let e = Affine::stack(vec![Affine::variable(0, 1), Affine::variable(1, 3)]);
        let e = e.premultiply(a, 2);
        assert_eq!(e.rows, 2);
        assert_eq!(e.terms[0].coeff.shape(), (2, 1));
        assert_eq!(e.terms[1].coeff.shape(), (2, 3));

        let s = Affine::variable(0, 4).sum();
        assert_eq!(s.rows, 1);
        assert_eq!(s.terms[0].coeff.shape(), (1, 4));
    }
}
