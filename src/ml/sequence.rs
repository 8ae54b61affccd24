//! Fixed-length windows over a price series.
//!
//! `Window` is the `[60]` view of a series and `InputTensor` is its
//! `[1, 60, 1]` relabeling, as consumed by the model.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Number of past closes the model looks at.
pub const WINDOW_SIZE: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window([f64; WINDOW_SIZE]);

impl Window {
    /// Takes the most recent `WINDOW_SIZE` values, discarding earlier ones.
    pub fn latest(history: &[f64]) -> Option<Self> {
        let start = history.len().checked_sub(WINDOW_SIZE)?;
        Self::try_from(&history[start..]).ok()
    }

    pub fn values(&self) -> &[f64; WINDOW_SIZE] {
        &self.0
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self(self.0.map(f))
    }
}

impl TryFrom<&[f64]> for Window {
    type Error = ModelError;

    fn try_from(values: &[f64]) -> Result<Self, Self::Error> {
        let array: [f64; WINDOW_SIZE] =
            values.try_into().map_err(|_| ModelError::ShapeMismatch {
                expected: format!("[{}]", WINDOW_SIZE),
                actual: format!("[{}]", values.len()),
            })?;
        Ok(Self(array))
    }
}

/// `[batch=1, timesteps=WINDOW_SIZE, features=1]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputTensor([[[f64; 1]; WINDOW_SIZE]; 1]);

impl InputTensor {
    pub const SHAPE: [usize; 3] = [1, WINDOW_SIZE, 1];

    pub fn timesteps(&self) -> impl Iterator<Item = f64> + '_ {
        self.0[0].iter().map(|step| step[0])
    }
}

impl From<&Window> for InputTensor {
    fn from(window: &Window) -> Self {
        Self([window.0.map(|v| [v])])
    }
}

/// Scaled training samples: each row of `x` is one window, `y` its next value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sequences {
    pub x: Vec<Vec<f64>>,
    pub y: Vec<f64>,
}

impl Sequences {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Chronological split: the first `floor(len * ratio)` samples train.
    pub fn split(self, ratio: f64) -> (Sequences, Sequences) {
        let cut = ((self.len() as f64) * ratio.clamp(0.0, 1.0)) as usize;
        let Sequences { mut x, mut y } = self;
        let x_tail = x.split_off(cut);
        let y_tail = y.split_off(cut);
        (Sequences { x, y }, Sequences { x: x_tail, y: y_tail })
    }
}

/// For `i` in `[window, N)` pairs `series[i - window..i]` with `series[i]`.
///
/// A series no longer than `window` produces no samples.
pub fn build_sequences(series: &[f64], window: usize) -> Sequences {
    if window == 0 || series.len() <= window {
        return Sequences::default();
    }

    let (x, y) = (window..series.len())
        .map(|i| (series[i - window..i].to_vec(), series[i]))
        .unzip();

    Sequences { x, y }
}
