use std::collections::HashMap;

use anyhow::*;
use nalgebra::DMatrix;
use serde_json::Value;

use crate::errors::ConfigError;

/// A dense matrix of parameter values.
pub type Dense = DMatrix<f64>;

/// Parameter values, by parameter name.
pub type Params = HashMap<String, Dense>;

pub fn scalar(x: f64) -> Dense {
    Dense::from_element(1, 1, x)
}

pub fn column(xs: Vec<f64>) -> Dense {
    Dense::from_vec(xs.len(), 1, xs)
}

pub fn is_scalar(m: &Dense) -> bool {
    m.shape() == (1, 1)
}

/// Build a matrix from its rows, which must all have the same length.
pub fn from_rows(rows: &[Vec<f64>]) -> Result<Dense> {
    let cols = rows.first().map(|r| r.len()).unwrap_or(0);
    if rows.iter().any(|r| r.len() != cols) {
        bail!("ragged matrix rows")
    }
    Ok(Dense::from_row_slice(rows.len(), cols, &rows.concat()))
}

/// Read a number, a list of numbers (a column), or a list of rows.
pub fn from_json(v: &Value) -> Result<Dense> {
    fn number(v: &Value) -> Result<f64> {
        v.as_f64()
            .ok_or_else(|| anyhow!("expected a number, found {}", v))
    }

    match v {
        Value::Number(_) => Ok(scalar(number(v)?)),
        Value::Array(xs) if !xs.is_empty() && xs.iter().all(|x| x.is_array()) => {
            let rows = xs
                .iter()
                .map(|row| {
                    row.as_array()
                        .map(|r| r.iter().map(number).collect::<Result<Vec<_>>>())
                        .unwrap_or_else(|| Ok(Vec::new()))
                })
                .collect::<Result<Vec<_>>>()?;
            from_rows(&rows)
        }
        Value::Array(xs) => Ok(column(xs.iter().map(number).collect::<Result<Vec<_>>>()?)),
        _ => bail!("expected a number or an array, found {}", v),
    }
}

/// Sum of two matrices, a scalar operand being broadcast to the other's
/// shape.
pub fn add(a: &Dense, b: &Dense) -> Result<Dense> {
    match (is_scalar(a), is_scalar(b)) {
        (true, false) => Ok(b.add_scalar(a[(0, 0)])),
        (false, true) => Ok(a.add_scalar(b[(0, 0)])),
        _ if a.shape() != b.shape() => bail!(
            "can not add {}x{} and {}x{} matrices",
            a.nrows(),
            a.ncols(),
            b.nrows(),
            b.ncols()
        ),
        _ => Ok(a + b),
    }
}

/// Product of two matrices, a scalar operand scaling the other.
pub fn mul(a: &Dense, b: &Dense) -> Result<Dense> {
    if is_scalar(a) {
        return Ok(b * a[(0, 0)]);
    }
    if is_scalar(b) {
        return Ok(a * b[(0, 0)]);
    }
    if a.ncols() != b.nrows() {
        bail!(
            "can not multiply {}x{} and {}x{} matrices",
            a.nrows(),
            a.ncols(),
            b.nrows(),
            b.ncols()
        )
    }
    Ok(a * b)
}

/// The rows (`dim == 0`) or columns (`dim == 1`) in `[begin, end)`.
pub fn slice(m: &Dense, begin: usize, end: usize, dim: usize) -> Result<Dense> {
    let extent = if dim == 0 { m.nrows() } else { m.ncols() };
    if begin >= end || end > extent {
        bail!(
            "slice {}:{} out of bounds for a {}x{} matrix",
            begin,
            end,
            m.nrows(),
            m.ncols()
        )
    }
    Ok(if dim == 0 {
        m.rows_range(begin..end).into_owned()
    } else {
        m.columns_range(begin..end).into_owned()
    })
}

/// Read a JSON object mapping parameter names to their values.
pub fn params_from_json(v: &Value) -> Result<Params> {
    let o = v
        .as_object()
        .ok_or_else(|| anyhow!("expected an object mapping parameter names to values"))?;
    o.iter()
        .map(|(k, v)| {
            from_json(v)
                .map(|d| (k.to_owned(), d))
                .map_err(|e| anyhow::Error::from(ConfigError::InvalidValue(k.to_owned(), e.to_string())))
        })
        .collect()
}
