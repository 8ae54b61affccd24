//! Two-layer LSTM regressor built on nalgebra.
//!
//! recurrent(50, sequences) -> dropout -> recurrent(50, last) -> dropout
//! -> dense(25) -> dense(1)

use anyhow::Result;
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Bernoulli, Distribution, StandardNormal, Uniform};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use super::sequence::InputTensor;
use crate::error::ModelError;

/// Features per timestep: only the closing price.
pub const INPUT_FEATURES: usize = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub window_size: usize,
    pub recurrent_width: usize,
    pub recurrent_layers: usize,
    pub dropout_rate: f64,
    pub dense_hidden: usize,
    pub output_dim: usize,
    pub loss: String,
    pub optimizer: String,
    pub learning_rate: f64,
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            window_size: 60,
            recurrent_width: 50,
            recurrent_layers: 2,
            dropout_rate: 0.2,
            dense_hidden: 25,
            output_dim: 1,
            loss: "mse".to_string(),
            optimizer: "adam".to_string(),
            learning_rate: 0.001,
            seed: 42,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), ModelError> {
        let invalid = |msg: String| Err(ModelError::InvalidConfig(msg));

        if self.window_size == 0 {
            return invalid("window_size must be positive".to_string());
        }
        if self.recurrent_layers == 0 || self.recurrent_width == 0 || self.dense_hidden == 0 {
            return invalid("layer sizes must be positive".to_string());
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return invalid(format!("dropout_rate {} outside [0, 1)", self.dropout_rate));
        }
        if self.output_dim != 1 {
            return invalid(format!("output_dim must be 1, got {}", self.output_dim));
        }
        if self.loss != "mse" {
            return invalid(format!("unsupported loss '{}'", self.loss));
        }
        if self.optimizer != "adam" {
            return invalid(format!("unsupported optimizer '{}'", self.optimizer));
        }
        if !(self.learning_rate > 0.0) {
            return invalid(format!("learning_rate {} must be positive", self.learning_rate));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LstmWeights {
    /// Gate order i, f, g, o; shape [4H, I]
    kernel: DMatrix<f64>,
    /// [4H, H]
    recurrent: DMatrix<f64>,
    /// [4H]
    bias: DVector<f64>,
}

impl LstmWeights {
    fn zeros(input_size: usize, hidden_size: usize) -> Self {
        Self {
            kernel: DMatrix::zeros(4 * hidden_size, input_size),
            recurrent: DMatrix::zeros(4 * hidden_size, hidden_size),
            bias: DVector::zeros(4 * hidden_size),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DenseWeights {
    /// [out, in]
    weights: DMatrix<f64>,
    bias: DVector<f64>,
}

impl DenseWeights {
    fn zeros(input_size: usize, output_size: usize) -> Self {
        Self {
            weights: DMatrix::zeros(output_size, input_size),
            bias: DVector::zeros(output_size),
        }
    }

    fn forward(&self, x: &DVector<f64>) -> DVector<f64> {
        &self.weights * x + &self.bias
    }

    /// Accumulates parameter gradients into `grads` and returns dL/dx.
    fn backward(
        &self,
        x: &DVector<f64>,
        dy: &DVector<f64>,
        grads: &mut DenseWeights,
    ) -> DVector<f64> {
        grads.weights.ger(1.0, dy, x, 1.0);
        grads.bias += dy;
        self.weights.tr_mul(dy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LstmLayer {
    input_size: usize,
    hidden_size: usize,
    return_sequences: bool,
    weights: LstmWeights,
}

struct LstmStep {
    x: DVector<f64>,
    h_prev: DVector<f64>,
    c_prev: DVector<f64>,
    i: DVector<f64>,
    f: DVector<f64>,
    g: DVector<f64>,
    o: DVector<f64>,
    tanh_c: DVector<f64>,
    h: DVector<f64>,
    c: DVector<f64>,
}

impl LstmLayer {
    fn new(
        input_size: usize,
        hidden_size: usize,
        return_sequences: bool,
        rng: &mut StdRng,
    ) -> Self {
        let mut weights = LstmWeights {
            kernel: glorot_uniform(4 * hidden_size, input_size, rng),
            recurrent: orthogonal(4 * hidden_size, hidden_size, rng),
            bias: DVector::zeros(4 * hidden_size),
        };
        // Forget gate starts open.
        weights.bias.rows_mut(hidden_size, hidden_size).fill(1.0);

        Self {
            input_size,
            hidden_size,
            return_sequences,
            weights,
        }
    }

    fn step(&self, x: &DVector<f64>, h_prev: &DVector<f64>, c_prev: &DVector<f64>) -> LstmStep {
        let h = self.hidden_size;
        let w = &self.weights;
        let z = &w.kernel * x + &w.recurrent * h_prev + &w.bias;

        let i = z.rows(0, h).map(sigmoid);
        let f = z.rows(h, h).map(sigmoid);
        let g = z.rows(2 * h, h).map(f64::tanh);
        let o = z.rows(3 * h, h).map(sigmoid);

        let c = f.component_mul(c_prev) + i.component_mul(&g);
        let tanh_c = c.map(f64::tanh);
        let h_next = o.component_mul(&tanh_c);

        LstmStep {
            x: x.clone(),
            h_prev: h_prev.clone(),
            c_prev: c_prev.clone(),
            i,
            f,
            g,
            o,
            tanh_c,
            h: h_next,
            c,
        }
    }

    /// Runs the whole sequence and returns every hidden state.
    fn forward(&self, inputs: &[DVector<f64>]) -> Vec<DVector<f64>> {
        let mut h = DVector::zeros(self.hidden_size);
        let mut c = DVector::zeros(self.hidden_size);
        let mut outputs = Vec::with_capacity(inputs.len());

        for x in inputs {
            let step = self.step(x, &h, &c);
            h = step.h;
            c = step.c;
            outputs.push(h.clone());
        }

        outputs
    }

    fn forward_cached(&self, inputs: &[DVector<f64>]) -> Vec<LstmStep> {
        let mut steps: Vec<LstmStep> = Vec::with_capacity(inputs.len());

        for x in inputs {
            let step = match steps.last() {
                Some(prev) => self.step(x, &prev.h, &prev.c),
                None => {
                    let zeros = DVector::zeros(self.hidden_size);
                    self.step(x, &zeros, &zeros)
                }
            };
            steps.push(step);
        }

        steps
    }

    /// Backpropagation through time. `dh_seq[t]` is dL/dh_t from above.
    fn backward(
        &self,
        steps: &[LstmStep],
        dh_seq: &[DVector<f64>],
        grads: &mut LstmWeights,
    ) -> Vec<DVector<f64>> {
        let h = self.hidden_size;
        let mut dh_next = DVector::zeros(h);
        let mut dc_next = DVector::zeros(h);
        let mut dx = vec![DVector::zeros(self.input_size); steps.len()];
        let mut dz = DVector::zeros(4 * h);

        for t in (0..steps.len()).rev() {
            let s = &steps[t];
            let dh = &dh_seq[t] + &dh_next;

            let d_o = dh.component_mul(&s.tanh_c);
            let dc = dh
                .component_mul(&s.o)
                .component_mul(&s.tanh_c.map(|v| 1.0 - v * v))
                + &dc_next;

            let di = dc.component_mul(&s.g);
            let dg = dc.component_mul(&s.i);
            let df = dc.component_mul(&s.c_prev);
            dc_next = dc.component_mul(&s.f);

            dz.rows_mut(0, h)
                .copy_from(&di.component_mul(&s.i.map(|v| v * (1.0 - v))));
            dz.rows_mut(h, h)
                .copy_from(&df.component_mul(&s.f.map(|v| v * (1.0 - v))));
            dz.rows_mut(2 * h, h)
                .copy_from(&dg.component_mul(&s.g.map(|v| 1.0 - v * v)));
            dz.rows_mut(3 * h, h)
                .copy_from(&d_o.component_mul(&s.o.map(|v| v * (1.0 - v))));

            grads.kernel.ger(1.0, &dz, &s.x, 1.0);
            grads.recurrent.ger(1.0, &dz, &s.h_prev, 1.0);
            grads.bias += &dz;

            dx[t] = self.weights.kernel.tr_mul(&dz);
            dh_next = self.weights.recurrent.tr_mul(&dz);
        }

        dx
    }
}

/// Parameter gradients with the same layout as the model.
#[derive(Debug, Clone)]
pub(crate) struct Gradients {
    recurrent: Vec<LstmWeights>,
    hidden: DenseWeights,
    output: DenseWeights,
}

impl Gradients {
    fn zeros_like(model: &LstmModel) -> Self {
        Self {
            recurrent: model
                .recurrent
                .iter()
                .map(|l| LstmWeights::zeros(l.input_size, l.hidden_size))
                .collect(),
            hidden: DenseWeights::zeros(model.config.recurrent_width, model.config.dense_hidden),
            output: DenseWeights::zeros(model.config.dense_hidden, model.config.output_dim),
        }
    }

    fn scale(&mut self, factor: f64) {
        for layer in &mut self.recurrent {
            layer.kernel *= factor;
            layer.recurrent *= factor;
            layer.bias *= factor;
        }
        for dense in [&mut self.hidden, &mut self.output] {
            dense.weights *= factor;
            dense.bias *= factor;
        }
    }

    pub(crate) fn tensors(&self) -> Vec<&[f64]> {
        let mut out: Vec<&[f64]> = Vec::new();
        for layer in &self.recurrent {
            out.push(layer.kernel.as_slice());
            out.push(layer.recurrent.as_slice());
            out.push(layer.bias.as_slice());
        }
        for dense in [&self.hidden, &self.output] {
            out.push(dense.weights.as_slice());
            out.push(dense.bias.as_slice());
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmModel {
    config: ModelConfig,
    recurrent: Vec<LstmLayer>,
    hidden: DenseWeights,
    output: DenseWeights,
}

impl LstmModel {
    pub fn new(config: ModelConfig) -> Result<Self, ModelError> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let width = config.recurrent_width;
        let recurrent = (0..config.recurrent_layers)
            .map(|idx| {
                let input_size = if idx == 0 { INPUT_FEATURES } else { width };
                let return_sequences = idx + 1 < config.recurrent_layers;
                LstmLayer::new(input_size, width, return_sequences, &mut rng)
            })
            .collect();

        let hidden = DenseWeights {
            weights: glorot_uniform(config.dense_hidden, width, &mut rng),
            bias: DVector::zeros(config.dense_hidden),
        };
        let output = DenseWeights {
            weights: glorot_uniform(config.output_dim, config.dense_hidden, &mut rng),
            bias: DVector::zeros(config.output_dim),
        };

        let model = Self {
            config,
            recurrent,
            hidden,
            output,
        };
        info!(
            "Built LSTM model: {} recurrent layers x {} units, dense {}, {} parameters",
            model.config.recurrent_layers,
            width,
            model.config.dense_hidden,
            model.parameter_count()
        );
        Ok(model)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn window_size(&self) -> usize {
        self.config.window_size
    }

    pub fn parameter_count(&self) -> usize {
        Gradients::zeros_like(self).tensors().iter().map(|t| t.len()).sum()
    }

    /// Checks every weight matrix against the configured layer sizes.
    pub fn validate_structure(&self) -> Result<(), ModelError> {
        self.config.validate()?;

        let mismatch = |what: &str, expected: (usize, usize), actual: (usize, usize)| {
            Err(ModelError::ShapeMismatch {
                expected: format!("{} {:?}", what, expected),
                actual: format!("{} {:?}", what, actual),
            })
        };

        if self.recurrent.len() != self.config.recurrent_layers {
            return mismatch(
                "recurrent layers",
                (self.config.recurrent_layers, 1),
                (self.recurrent.len(), 1),
            );
        }

        let width = self.config.recurrent_width;
        for (idx, layer) in self.recurrent.iter().enumerate() {
            let input_size = if idx == 0 { INPUT_FEATURES } else { width };
            let w = &layer.weights;
            if layer.input_size != input_size || layer.hidden_size != width {
                return mismatch(
                    "lstm layer",
                    (input_size, width),
                    (layer.input_size, layer.hidden_size),
                );
            }
            if layer.return_sequences != (idx + 1 < self.recurrent.len()) {
                return Err(ModelError::InvalidConfig(format!(
                    "layer {} return_sequences flag is inconsistent",
                    idx
                )));
            }
            if w.kernel.shape() != (4 * width, input_size) {
                return mismatch("lstm kernel", (4 * width, input_size), w.kernel.shape());
            }
            if w.recurrent.shape() != (4 * width, width) {
                return mismatch("lstm recurrent", (4 * width, width), w.recurrent.shape());
            }
            if w.bias.len() != 4 * width {
                return mismatch("lstm bias", (4 * width, 1), (w.bias.len(), 1));
            }
        }

        let dense = [
            ("dense hidden", &self.hidden, width, self.config.dense_hidden),
            ("dense output", &self.output, self.config.dense_hidden, self.config.output_dim),
        ];
        for (what, layer, input, output) in dense {
            if layer.weights.shape() != (output, input) || layer.bias.len() != output {
                return mismatch(what, (output, input), layer.weights.shape());
            }
        }

        Ok(())
    }

    /// Forward pass over one scaled window; never mutates the parameters.
    pub fn forward_sequence(&self, sequence: &[f64]) -> Result<f64, ModelError> {
        if sequence.len() != self.config.window_size {
            return Err(ModelError::ShapeMismatch {
                expected: format!("[1, {}, {}]", self.config.window_size, INPUT_FEATURES),
                actual: format!("[1, {}, {}]", sequence.len(), INPUT_FEATURES),
            });
        }

        let mut inputs: Vec<DVector<f64>> = sequence
            .iter()
            .map(|&v| DVector::from_element(INPUT_FEATURES, v))
            .collect();
        for layer in &self.recurrent {
            inputs = layer.forward(&inputs);
        }

        let last = inputs.last().ok_or_else(|| ModelError::ShapeMismatch {
            expected: "non-empty sequence".to_string(),
            actual: "empty sequence".to_string(),
        })?;
        let hidden = self.hidden.forward(last);
        Ok(self.output.forward(&hidden)[0])
    }

    pub fn predict(&self, input: &InputTensor) -> Result<f64, ModelError> {
        let sequence: Vec<f64> = input.timesteps().collect();
        self.forward_sequence(&sequence)
    }

    pub fn predict_batch(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, ModelError> {
        x.iter().map(|seq| self.forward_sequence(seq)).collect()
    }

    /// Mean squared error over a set of windows, no dropout.
    pub fn loss(&self, x: &[Vec<f64>], y: &[f64]) -> Result<f64, ModelError> {
        if x.is_empty() {
            return Ok(0.0);
        }
        let predictions = self.predict_batch(x)?;
        let sum: f64 = predictions
            .iter()
            .zip(y)
            .map(|(p, t)| (p - t).powi(2))
            .sum();
        Ok(sum / x.len() as f64)
    }

    /// Batch MSE and its gradient. Dropout is applied when `rng` is given.
    pub(crate) fn gradients(
        &self,
        x: &[Vec<f64>],
        y: &[f64],
        mut rng: Option<&mut StdRng>,
    ) -> Result<(f64, Gradients), ModelError> {
        let mut grads = Gradients::zeros_like(self);
        if x.is_empty() {
            return Ok((0.0, grads));
        }

        let mut loss = 0.0;
        for (sequence, &target) in x.iter().zip(y) {
            loss += self.backprop(sequence, target, rng.as_deref_mut(), &mut grads)?;
        }

        let n = x.len() as f64;
        grads.scale(1.0 / n);
        Ok((loss / n, grads))
    }

    /// Single-sample forward + backward; returns the squared error.
    fn backprop(
        &self,
        sequence: &[f64],
        target: f64,
        mut rng: Option<&mut StdRng>,
        grads: &mut Gradients,
    ) -> Result<f64, ModelError> {
        if sequence.len() != self.config.window_size {
            return Err(ModelError::ShapeMismatch {
                expected: format!("[{}]", self.config.window_size),
                actual: format!("[{}]", sequence.len()),
            });
        }

        let mut inputs: Vec<DVector<f64>> = sequence
            .iter()
            .map(|&v| DVector::from_element(INPUT_FEATURES, v))
            .collect();
        let mut caches = Vec::with_capacity(self.recurrent.len());
        let mut masks: Vec<Option<Vec<DVector<f64>>>> = Vec::with_capacity(self.recurrent.len());

        for layer in &self.recurrent {
            let steps = layer.forward_cached(&inputs);
            let mut outputs: Vec<DVector<f64>> = if layer.return_sequences {
                steps.iter().map(|s| s.h.clone()).collect()
            } else {
                steps.last().map(|s| s.h.clone()).into_iter().collect()
            };

            let mask = match rng.as_deref_mut() {
                Some(rng) if self.config.dropout_rate > 0.0 => {
                    let mask = dropout_masks(
                        outputs.len(),
                        layer.hidden_size,
                        self.config.dropout_rate,
                        rng,
                    )?;
                    for (out, m) in outputs.iter_mut().zip(&mask) {
                        out.component_mul_assign(m);
                    }
                    Some(mask)
                }
                _ => None,
            };

            caches.push(steps);
            masks.push(mask);
            inputs = outputs;
        }

        let last = inputs
            .pop()
            .ok_or_else(|| ModelError::TrainingError("empty sequence".to_string()))?;
        let hidden = self.hidden.forward(&last);
        let prediction = self.output.forward(&hidden);

        let error = prediction[0] - target;
        let d_out = DVector::from_element(1, 2.0 * error);
        let d_hidden = self.output.backward(&hidden, &d_out, &mut grads.output);
        let d_last = self.hidden.backward(&last, &d_hidden, &mut grads.hidden);

        let mut upstream = vec![d_last];
        for idx in (0..self.recurrent.len()).rev() {
            let layer = &self.recurrent[idx];
            let steps = &caches[idx];

            if let Some(mask) = &masks[idx] {
                for (d, m) in upstream.iter_mut().zip(mask) {
                    d.component_mul_assign(m);
                }
            }

            let dh_seq = if layer.return_sequences {
                upstream
            } else {
                let mut seq = vec![DVector::zeros(layer.hidden_size); steps.len()];
                if let (Some(slot), Some(d)) = (seq.last_mut(), upstream.pop()) {
                    *slot = d;
                }
                seq
            };

            upstream = layer.backward(steps, &dh_seq, &mut grads.recurrent[idx]);
        }

        Ok(error * error)
    }

    /// Parameter buffers in the same order as `Gradients::tensors`.
    pub(crate) fn parameters_mut(&mut self) -> Vec<&mut [f64]> {
        let mut out: Vec<&mut [f64]> = Vec::new();
        for layer in &mut self.recurrent {
            let w = &mut layer.weights;
            out.push(w.kernel.as_mut_slice());
            out.push(w.recurrent.as_mut_slice());
            out.push(w.bias.as_mut_slice());
        }
        for dense in [&mut self.hidden, &mut self.output] {
            out.push(dense.weights.as_mut_slice());
            out.push(dense.bias.as_mut_slice());
        }
        out
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string(self)?)?;
        info!("Model saved to {}", path.display());
        Ok(())
    }
}

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

fn glorot_uniform(rows: usize, cols: usize, rng: &mut StdRng) -> DMatrix<f64> {
    let limit = (6.0 / (rows + cols) as f64).sqrt();
    let dist = Uniform::new_inclusive(-limit, limit);
    DMatrix::from_fn(rows, cols, |_, _| dist.sample(rng))
}

/// Matrix with orthonormal columns (rows when `rows < cols`), from the QR
/// decomposition of a standard normal sample. Signs follow the diagonal of R.
fn orthogonal(rows: usize, cols: usize, rng: &mut StdRng) -> DMatrix<f64> {
    if rows < cols {
        return orthogonal(cols, rows, rng).transpose();
    }

    let sample = DMatrix::<f64>::from_fn(rows, cols, |_, _| StandardNormal.sample(rng));
    let qr = sample.qr();
    let r = qr.r();
    let mut q = qr.q();
    for j in 0..cols {
        if r[(j, j)] < 0.0 {
            q.column_mut(j).neg_mut();
        }
    }
    q
}

/// Inverted dropout masks: kept units are scaled by `1 / (1 - rate)`.
fn dropout_masks(
    count: usize,
    size: usize,
    rate: f64,
    rng: &mut StdRng,
) -> Result<Vec<DVector<f64>>, ModelError> {
    let keep = Bernoulli::new(1.0 - rate)
        .map_err(|e| ModelError::InvalidConfig(format!("dropout_rate {}: {}", rate, e)))?;
    let scale = 1.0 / (1.0 - rate);

    Ok((0..count)
        .map(|_| DVector::from_fn(size, |_, _| if keep.sample(rng) { scale } else { 0.0 }))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::sequence::{Window, WINDOW_SIZE};

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            window_size: 5,
            recurrent_width: 3,
            dense_hidden: 2,
            ..ModelConfig::default()
        }
    }

    #[test]
    fn test_default_config_matches_architecture() {
        let config = ModelConfig::default();
        assert_eq!(config.window_size, WINDOW_SIZE);
        assert_eq!(config.recurrent_width, 50);
        assert_eq!(config.recurrent_layers, 2);
        assert_eq!(config.dropout_rate, 0.2);
        assert_eq!(config.dense_hidden, 25);
        assert_eq!(config.output_dim, 1);
        assert_eq!(config.loss, "mse");
        assert_eq!(config.optimizer, "adam");
    }

    #[test]
    fn test_default_model_layout() {
        let model = LstmModel::new(ModelConfig::default()).unwrap();

        assert_eq!(model.recurrent.len(), 2);
        assert!(model.recurrent[0].return_sequences);
        assert!(!model.recurrent[1].return_sequences);
        // Same parameter count Keras reports for this stack.
        assert_eq!(model.parameter_count(), 10_400 + 20_200 + 1_275 + 26);
        model.validate_structure().unwrap();
    }

    #[test]
    fn test_rejects_unknown_loss_and_optimizer() {
        let config = ModelConfig {
            loss: "mae".to_string(),
            ..ModelConfig::default()
        };
        assert!(LstmModel::new(config).is_err());

        let config = ModelConfig {
            optimizer: "sgd".to_string(),
            ..ModelConfig::default()
        };
        assert!(LstmModel::new(config).is_err());
    }

    #[test]
    fn test_predict_is_finite_and_deterministic() {
        let model = LstmModel::new(ModelConfig::default()).unwrap();
        let history: Vec<f64> = (0..WINDOW_SIZE).map(|i| (i as f64 / 10.0).sin().abs()).collect();
        let window = Window::latest(&history).unwrap();
        let tensor = InputTensor::from(&window);

        let first = model.predict(&tensor).unwrap();
        let second = model.predict(&tensor).unwrap();
        assert!(first.is_finite());
        assert_eq!(first, second);
    }

    #[test]
    fn test_forward_rejects_wrong_length() {
        let model = LstmModel::new(tiny_config()).unwrap();
        let err = model.forward_sequence(&[0.5; 4]).unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let model = LstmModel::new(tiny_config()).unwrap();
        let x = vec![vec![0.1, 0.4, 0.35, 0.8, 0.6], vec![0.9, 0.7, 0.2, 0.3, 0.5]];
        let y = vec![0.7, 0.4];

        let (_, grads) = model.gradients(&x, &y, None).unwrap();
        let analytic: Vec<Vec<f64>> = grads.tensors().iter().map(|t| t.to_vec()).collect();

        let eps = 1e-6;
        for (tensor_idx, tensor) in analytic.iter().enumerate() {
            for (idx, &expected) in tensor.iter().enumerate() {
                let mut plus = model.clone();
                plus.parameters_mut()[tensor_idx][idx] += eps;
                let mut minus = model.clone();
                minus.parameters_mut()[tensor_idx][idx] -= eps;

                let numeric =
                    (plus.loss(&x, &y).unwrap() - minus.loss(&x, &y).unwrap()) / (2.0 * eps);
                assert!(
                    (numeric - expected).abs() < 1e-5 * (1.0 + expected.abs()),
                    "tensor {} index {}: numeric {} analytic {}",
                    tensor_idx,
                    idx,
                    numeric,
                    expected
                );
            }
        }
    }

    #[test]
    fn test_recurrent_kernel_is_orthogonal() {
        let model = LstmModel::new(ModelConfig::default()).unwrap();

        for layer in &model.recurrent {
            let w = &layer.weights.recurrent;
            assert_eq!(w.shape(), (200, 50));
            let gram = w.tr_mul(w);
            let identity = DMatrix::<f64>::identity(50, 50);
            assert!((gram - identity).abs().max() < 1e-9);
        }

        let mut rng = StdRng::seed_from_u64(3);
        let wide = orthogonal(4, 10, &mut rng);
        assert!((&wide * wide.transpose() - DMatrix::<f64>::identity(4, 4)).abs().max() < 1e-9);
    }

    #[test]
    fn test_dropout_masks_keep_expected_scale() {
        let mut rng = StdRng::seed_from_u64(7);
        let masks = dropout_masks(200, 50, 0.2, &mut rng).unwrap();
        let values: Vec<f64> = masks.iter().flat_map(|m| m.iter().copied()).collect();

        assert!(values.iter().all(|&v| v == 0.0 || (v - 1.25).abs() < 1e-12));
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        assert!((mean - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_save_and_reload_preserves_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        let model = LstmModel::new(tiny_config()).unwrap();
        model.save(&path).unwrap();

        let loaded: LstmModel =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        loaded.validate_structure().unwrap();
        assert_eq!(loaded.config(), &tiny_config());

        let seq = [0.2, 0.4, 0.6, 0.5, 0.3];
        assert_eq!(
            model.forward_sequence(&seq).unwrap(),
            loaded.forward_sequence(&seq).unwrap()
        );
    }
}
