use ndarray::{Array1, Array2, ArrayD, Axis, IxDyn};

use crate::error::{MlrError, Result};

/// Aggregation applied when collapsing axes of a [`MaskedArray`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Aggregation {
    Mean,
    Sum,
}

impl Aggregation {
    pub fn name(&self) -> &'static str {
        match self {
            Aggregation::Mean => "mean",
            Aggregation::Sum => "sum",
        }
    }
}

/// N-dimensional `f64` data with a parallel validity mask.
///
/// `valid[i] == false` marks element `i` as missing; its value in `data` is
/// meaningless and must not be read.
#[derive(Clone, Debug)]
pub struct MaskedArray {
    data: ArrayD<f64>,
    valid: ArrayD<bool>,
}

impl MaskedArray {
    pub fn new(data: ArrayD<f64>, valid: ArrayD<bool>) -> Result<Self> {
        if data.shape() != valid.shape() {
            return Err(MlrError::Shape(format!(
                "data shape {:?} differs from mask shape {:?}",
                data.shape(),
                valid.shape()
            )));
        }
        Ok(Self { data, valid })
    }

    /// All elements valid.
    pub fn from_data(data: ArrayD<f64>) -> Self {
        let valid = ArrayD::from_elem(data.raw_dim(), true);
        Self { data, valid }
    }

    /// NaN elements become invalid.
    pub fn from_nan(data: ArrayD<f64>) -> Self {
        let valid = data.mapv(|v| !v.is_nan());
        Self { data, valid }
    }

    pub fn fully_masked(shape: &[usize]) -> Self {
        Self {
            data: ArrayD::from_elem(IxDyn(shape), f64::NAN),
            valid: ArrayD::from_elem(IxDyn(shape), false),
        }
    }

    /// Build from row-major values where `None` is missing.
    pub fn from_options(shape: &[usize], values: &[Option<f64>]) -> Result<Self> {
        let data = values.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
        let valid = values.iter().map(Option::is_some).collect();
        Ok(Self {
            data: ArrayD::from_shape_vec(IxDyn(shape), data)?,
            valid: ArrayD::from_shape_vec(IxDyn(shape), valid)?,
        })
    }

    /// Row-major values with `None` for missing elements.
    pub fn to_options(&self) -> Vec<Option<f64>> {
        self.data
            .iter()
            .zip(self.valid.iter())
            .map(|(&v, &ok)| if ok { Some(v) } else { None })
            .collect()
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn valid(&self) -> &ArrayD<bool> {
        &self.valid
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn count_valid(&self) -> usize {
        self.valid.iter().filter(|&&ok| ok).count()
    }

    pub fn all_valid(&self) -> bool {
        self.valid.iter().all(|&ok| ok)
    }

    /// Data with missing elements replaced by `fill`.
    pub fn filled(&self, fill: f64) -> ArrayD<f64> {
        let mut out = self.data.clone();
        out.zip_mut_with(&self.valid, |v, &ok| {
            if !ok {
                *v = fill;
            }
        });
        out
    }

    /// Apply `f` to valid elements.
    pub fn map_valid<F: Fn(f64) -> f64>(&self, f: F) -> Self {
        let mut data = self.data.clone();
        data.zip_mut_with(&self.valid, |v, &ok| {
            if ok {
                *v = f(*v);
            }
        });
        Self { data, valid: self.valid.clone() }
    }

    /// Additionally invalidate elements where `invalid` is true.
    pub fn mask_where(&mut self, invalid: &ArrayD<bool>) -> Result<()> {
        if invalid.shape() != self.shape() {
            return Err(MlrError::Shape(format!(
                "mask shape {:?} differs from data shape {:?}",
                invalid.shape(),
                self.shape()
            )));
        }
        self.valid.zip_mut_with(invalid, |ok, &bad| {
            if bad {
                *ok = false;
            }
        });
        Ok(())
    }

    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        let data = standard(&self.data).into_shape(IxDyn(shape))?;
        let valid = standard(&self.valid).into_shape(IxDyn(shape))?;
        Ok(Self { data, valid })
    }

    /// Flatten to one dimension in row-major order.
    pub fn ravel(&self) -> Self {
        Self {
            data: Array1::from_iter(self.data.iter().copied()).into_dyn(),
            valid: Array1::from_iter(self.valid.iter().copied()).into_dyn(),
        }
    }

    /// Concatenate along the first axis.
    pub fn concatenate(parts: &[MaskedArray]) -> Result<Self> {
        if parts.is_empty() {
            return Err(MlrError::Shape("nothing to concatenate".to_string()));
        }
        let data: Vec<_> = parts.iter().map(|p| p.data.view()).collect();
        let valid: Vec<_> = parts.iter().map(|p| p.valid.view()).collect();
        Ok(Self {
            data: ndarray::concatenate(Axis(0), &data)?,
            valid: ndarray::concatenate(Axis(0), &valid)?,
        })
    }

    /// Stack equally long 1-D arrays as the columns of a 2-D array.
    pub fn column_stack(columns: &[MaskedArray]) -> Result<Self> {
        let n_rows = columns.first().map_or(0, |c| c.len());
        let mut data = Array2::<f64>::zeros((n_rows, columns.len()));
        let mut valid = Array2::<bool>::from_elem((n_rows, columns.len()), false);
        for (j, column) in columns.iter().enumerate() {
            if column.ndim() != 1 || column.len() != n_rows {
                return Err(MlrError::Shape(format!(
                    "column {} has shape {:?}, expected ({},)",
                    j,
                    column.shape(),
                    n_rows
                )));
            }
            for (i, (&v, &ok)) in column.data.iter().zip(column.valid.iter()).enumerate() {
                data[[i, j]] = v;
                valid[[i, j]] = ok;
            }
        }
        Ok(Self {
            data: data.into_dyn(),
            valid: valid.into_dyn(),
        })
    }

    /// For each index along the first axis, whether any element is missing.
    pub fn rows_with_invalid(&self) -> Vec<bool> {
        if self.ndim() == 0 {
            return vec![!self.valid.iter().all(|&ok| ok)];
        }
        self.valid
            .axis_iter(Axis(0))
            .map(|row| row.iter().any(|&ok| !ok))
            .collect()
    }

    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            data: self.data.select(Axis(0), rows),
            valid: self.valid.select(Axis(0), rows),
        }
    }

    /// Broadcast onto `shape`; source dimension `k` maps to target axis
    /// `source_axes[k]`, every other target axis repeats the data.
    pub fn broadcast_to(&self, shape: &[usize], source_axes: &[usize]) -> Result<Self> {
        if source_axes.len() != self.ndim() {
            return Err(MlrError::Shape(format!(
                "cannot broadcast {}-dimensional data using {} source axes",
                self.ndim(),
                source_axes.len()
            )));
        }
        let mut expanded = vec![1; shape.len()];
        let mut last = None;
        for (k, &axis) in source_axes.iter().enumerate() {
            if axis >= shape.len() || last.map_or(false, |l| axis <= l) {
                return Err(MlrError::Shape(format!(
                    "invalid broadcast axes {:?} for target shape {:?}",
                    source_axes, shape
                )));
            }
            if self.shape()[k] != shape[axis] {
                return Err(MlrError::Shape(format!(
                    "source dimension {} has length {}, target axis {} has length {}",
                    k,
                    self.shape()[k],
                    axis,
                    shape[axis]
                )));
            }
            expanded[axis] = shape[axis];
            last = Some(axis);
        }
        let reshaped = self.reshape(&expanded)?;
        let data = reshaped.data.broadcast(IxDyn(shape)).map(|v| v.to_owned());
        let valid = reshaped.valid.broadcast(IxDyn(shape)).map(|v| v.to_owned());
        match (data, valid) {
            (Some(data), Some(valid)) => Ok(Self { data, valid }),
            _ => Err(MlrError::Shape(format!(
                "cannot broadcast shape {:?} to {:?}",
                expanded, shape
            ))),
        }
    }

    /// Collapse `axes` with an optional weight array of the same shape.
    ///
    /// Missing elements never contribute; an output element is missing when
    /// none of its inputs were valid (or, for means, their weights sum to 0).
    pub fn collapse(
        &self,
        axes: &[usize],
        aggregation: Aggregation,
        weights: Option<&ArrayD<f64>>,
    ) -> Result<Self> {
        let ndim = self.ndim();
        for (i, &axis) in axes.iter().enumerate() {
            if axis >= ndim || axes[..i].contains(&axis) {
                return Err(MlrError::Shape(format!(
                    "invalid collapse axes {:?} for {}-dimensional data",
                    axes, ndim
                )));
            }
        }
        if let Some(w) = weights {
            if w.shape() != self.shape() {
                return Err(MlrError::Shape(format!(
                    "weights shape {:?} differs from data shape {:?}",
                    w.shape(),
                    self.shape()
                )));
            }
        }

        let kept: Vec<usize> = (0..ndim).filter(|a| !axes.contains(a)).collect();
        let order: Vec<usize> = kept.iter().chain(axes.iter()).copied().collect();
        let out_shape: Vec<usize> = kept.iter().map(|&a| self.shape()[a]).collect();
        let chunk: usize = axes.iter().map(|&a| self.shape()[a]).product();

        let permute_f64 = |a: &ArrayD<f64>| -> Vec<f64> {
            a.view().permuted_axes(order.as_slice()).iter().copied().collect()
        };
        let values = permute_f64(&self.data);
        let valid: Vec<bool> = self
            .valid
            .view()
            .permuted_axes(order.as_slice())
            .iter()
            .copied()
            .collect();
        let weights = weights.map(permute_f64);

        let n_out: usize = out_shape.iter().product();
        let mut out = Vec::with_capacity(n_out);
        let mut out_valid = Vec::with_capacity(n_out);
        for r in 0..n_out {
            let mut total = 0.0;
            let mut weight_sum = 0.0;
            let mut n_valid = 0;
            for j in r * chunk..(r + 1) * chunk {
                if !valid[j] {
                    continue;
                }
                let w = weights.as_ref().map_or(1.0, |w| w[j]);
                total += w * values[j];
                weight_sum += w;
                n_valid += 1;
            }
            let (value, ok) = match aggregation {
                Aggregation::Sum => (total, n_valid > 0),
                Aggregation::Mean if n_valid > 0 && weight_sum != 0.0 => (total / weight_sum, true),
                Aggregation::Mean => (f64::NAN, false),
            };
            out.push(if ok { value } else { f64::NAN });
            out_valid.push(ok);
        }
        Ok(Self {
            data: ArrayD::from_shape_vec(IxDyn(&out_shape), out)?,
            valid: ArrayD::from_shape_vec(IxDyn(&out_shape), out_valid)?,
        })
    }
}

impl PartialEq for MaskedArray {
    /// Equal masks and equal values wherever valid.
    fn eq(&self, other: &Self) -> bool {
        self.valid == other.valid
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .zip(self.valid.iter())
                .all(|((a, b), &ok)| !ok || a == b)
    }
}

fn standard<T: Clone>(a: &ArrayD<T>) -> ArrayD<T> {
    if a.is_standard_layout() {
        a.clone()
    } else {
        a.as_standard_layout().into_owned()
    }
}
