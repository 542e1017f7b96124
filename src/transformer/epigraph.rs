//! Second-order cone representations of the atoms.
//!
//! Each atom `f(x)` is replaced by a fresh variable `t`, together with the
//! cone constraints ensuring `t >= f(x)` (`t <= f(x)` for concave atoms).
//! Elementwise atoms over `k` rows produce `k` small cones, whose rows are
//! interleaved in `G` and `h`.
use anyhow::*;

use super::{Affine, Canonicalizer, Coeff, ConeLayout};
use crate::compiler::Node;

/// `e / 2`
fn half(e: Affine) -> Affine {
    e.scale(Coeff::Number(0.5))
}

impl<'a> Canonicalizer<'a> {
    /// `||(x_1, ..., x_n)|| <= t`
    pub(super) fn norm(&mut self, args: &[Node]) -> Result<Affine> {
        let x = args
            .iter()
            .map(|a| self.affine(a))
            .collect::<Result<Vec<_>>>()?;
        let t = self.fresh(1);
        self.cones
            .push(ConeLayout::Single(Affine::stack(
                std::iter::once(t.clone()).chain(x).collect(),
            )));
        Ok(t)
    }

    /// `|x_i| <= t_i`
    pub(super) fn abs(&mut self, x: &Node) -> Result<Affine> {
        let x = self.affine(x)?;
        let t = self.fresh(x.rows);
        self.cones.push(ConeLayout::Strided(vec![t.clone(), x]));
        Ok(t)
    }

    /// `x_i^2 <= t_i`, i.e. `||(x_i, (1 - t_i)/2)|| <= (1 + t_i)/2`
    pub(super) fn square(&mut self, x: &Node) -> Result<Affine> {
        let x = self.affine(x)?;
        let k = x.rows;
        let t = self.fresh(k);
        let one = Affine::constant(Coeff::Number(1.0), k);
        let plus = half(one.clone().add(t.clone())?);
        let minus = half(one.add(t.clone().neg())?);
        self.cones.push(ConeLayout::Strided(vec![plus, minus, x]));
        Ok(t)
    }

    /// `t_i <= sqrt(x_i)`, i.e. `||((1 - x_i)/2, t_i)|| <= (1 + x_i)/2`
    pub(super) fn sqrt(&mut self, x: &Node) -> Result<Affine> {
        let x = self.affine(x)?;
        let k = x.rows;
        let t = self.fresh(k);
        let one = Affine::constant(Coeff::Number(1.0), k);
        let plus = half(one.clone().add(x.clone())?);
        let minus = half(one.add(x.neg())?);
        self.cones
            .push(ConeLayout::Strided(vec![plus, minus, t.clone()]));
        Ok(t)
    }

    /// `max(x_i, 0) <= t_i`
    pub(super) fn pos(&mut self, x: &Node) -> Result<Affine> {
        let x = self.affine(x)?;
        let t = self.fresh(x.rows);
        self.linear.push(t.clone().add(x.neg())?);
        self.linear.push(t.clone());
        Ok(t)
    }

    /// `max(-x_i, 0) <= t_i`
    pub(super) fn neg(&mut self, x: &Node) -> Result<Affine> {
        let x = self.affine(x)?;
        let t = self.fresh(x.rows);
        self.linear.push(t.clone().add(x)?);
        self.linear.push(t.clone());
        Ok(t)
    }
}
