//! Recurrent sequence classifiers
//!
//! Forward pass of the Keras models the text, behaviour and XSS services are
//! trained as: `Embedding -> (LSTM | Bidirectional(LSTM))+ -> Dense+`, with a
//! single sigmoid output. Weights are loaded from a JSON export of the Keras
//! layer weights (kernel `(in, 4*units)`, recurrent kernel `(units, 4*units)`,
//! gate order `i, f, c, o`). Dropout layers are accepted and skipped.

use crate::InferenceError;
use ndarray::{concatenate, s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::Deserialize;

/// Exported model file
#[derive(Debug, Deserialize)]
pub struct ModelFile {
    /// Sequence length the model was trained with, if recorded
    #[serde(default)]
    pub input_length: Option<usize>,
    /// Layers in execution order
    pub layers: Vec<LayerSpec>,
}

/// One exported layer
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    /// Token embedding table, one row per index
    Embedding {
        /// `(vocab, dim)` weights
        weights: Vec<Vec<f32>>,
    },
    /// Unidirectional LSTM
    Lstm(LstmSpec),
    /// Forward and backward LSTM, outputs concatenated
    Bidirectional {
        /// Forward direction weights
        forward: LstmSpec,
        /// Backward direction weights
        backward: LstmSpec,
    },
    /// Identity at inference time
    Dropout {
        /// Training-time rate, ignored
        #[serde(default)]
        rate: Option<f32>,
    },
    /// Fully connected layer
    Dense {
        /// `(in, out)` weights
        kernel: Vec<Vec<f32>>,
        /// `(out)` bias
        bias: Vec<f32>,
        /// Activation applied after the affine map
        #[serde(default)]
        activation: Activation,
    },
}

/// LSTM weights
#[derive(Debug, Deserialize)]
pub struct LstmSpec {
    /// `(in, 4*units)`
    pub kernel: Vec<Vec<f32>>,
    /// `(units, 4*units)`
    pub recurrent_kernel: Vec<Vec<f32>>,
    /// `(4*units)`
    pub bias: Vec<f32>,
    /// Emit every step instead of the last hidden state
    #[serde(default)]
    pub return_sequences: bool,
}

/// Dense activations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// Identity
    #[default]
    Linear,
    /// max(0, x)
    Relu,
    /// Logistic
    Sigmoid,
    /// Hyperbolic tangent
    Tanh,
}

impl Activation {
    fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Linear => x,
            Activation::Relu => x.max(0.0),
            Activation::Sigmoid => sigmoid(x),
            Activation::Tanh => x.tanh(),
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Debug)]
struct Lstm {
    units: usize,
    kernel: Array2<f32>,
    recurrent: Array2<f32>,
    bias: Array1<f32>,
    return_sequences: bool,
}

impl Lstm {
    fn from_spec(spec: LstmSpec, input_dim: usize) -> Result<Self, String> {
        let kernel = to_array2(spec.kernel, "lstm kernel")?;
        let recurrent = to_array2(spec.recurrent_kernel, "lstm recurrent kernel")?;
        let bias = Array1::from(spec.bias);

        if kernel.ncols() % 4 != 0 || kernel.ncols() == 0 {
            return Err(format!("lstm kernel has {} columns, expected 4*units", kernel.ncols()));
        }
        let units = kernel.ncols() / 4;
        if kernel.nrows() != input_dim {
            return Err(format!("lstm kernel expects {} inputs, previous layer yields {}", kernel.nrows(), input_dim));
        }
        if recurrent.dim() != (units, 4 * units) {
            return Err(format!("lstm recurrent kernel is {:?}, expected ({}, {})", recurrent.dim(), units, 4 * units));
        }
        if bias.len() != 4 * units {
            return Err(format!("lstm bias has {} values, expected {}", bias.len(), 4 * units));
        }

        Ok(Self {
            units,
            kernel,
            recurrent,
            bias,
            return_sequences: spec.return_sequences,
        })
    }

    /// Run over `x` (`(steps, in)`); returns per-step outputs in input time
    /// order and the final hidden state.
    fn run(&self, x: ArrayView2<f32>, reverse: bool) -> (Array2<f32>, Array1<f32>) {
        let steps = x.nrows();
        let u = self.units;
        let mut h = Array1::<f32>::zeros(u);
        let mut c = Array1::<f32>::zeros(u);
        let mut outputs = Array2::<f32>::zeros((steps, u));

        for n in 0..steps {
            let t = if reverse { steps - 1 - n } else { n };
            let z = x.row(t).dot(&self.kernel) + h.dot(&self.recurrent) + &self.bias;

            let i = z.slice(s![0..u]).mapv(sigmoid);
            let f = z.slice(s![u..2 * u]).mapv(sigmoid);
            let g = z.slice(s![2 * u..3 * u]).mapv(f32::tanh);
            let o = z.slice(s![3 * u..4 * u]).mapv(sigmoid);

            c = &f * &c + &i * &g;
            h = &o * &c.mapv(f32::tanh);
            outputs.row_mut(t).assign(&h);
        }

        (outputs, h)
    }
}

#[derive(Debug)]
struct Dense {
    kernel: Array2<f32>,
    bias: Array1<f32>,
    activation: Activation,
}

impl Dense {
    fn forward(&self, x: ArrayView1<f32>) -> Array1<f32> {
        let activation = self.activation;
        (x.dot(&self.kernel) + &self.bias).mapv(|v| activation.apply(v))
    }
}

#[derive(Debug)]
enum Layer {
    Lstm(Lstm),
    Bidirectional { forward: Lstm, backward: Lstm },
    Dense(Dense),
}

/// Activations flowing between layers
enum Tensor {
    Sequence(Array2<f32>),
    Vector(Array1<f32>),
}

impl Layer {
    fn forward(&self, input: Tensor) -> Result<Tensor, InferenceError> {
        match (self, input) {
            (Layer::Lstm(lstm), Tensor::Sequence(x)) => {
                let (outputs, last) = lstm.run(x.view(), false);
                Ok(if lstm.return_sequences {
                    Tensor::Sequence(outputs)
                } else {
                    Tensor::Vector(last)
                })
            }
            (Layer::Bidirectional { forward, backward }, Tensor::Sequence(x)) => {
                let (f_out, f_last) = forward.run(x.view(), false);
                let (b_out, b_last) = backward.run(x.view(), true);
                let joined = if forward.return_sequences {
                    concatenate(Axis(1), &[f_out.view(), b_out.view()]).map(Tensor::Sequence)
                } else {
                    concatenate(Axis(0), &[f_last.view(), b_last.view()]).map(Tensor::Vector)
                };
                joined.map_err(|_| InferenceError::Shape {
                    expected: 2 * forward.units,
                    actual: forward.units + backward.units,
                })
            }
            (Layer::Dense(dense), Tensor::Vector(x)) => {
                if x.len() != dense.kernel.nrows() {
                    return Err(InferenceError::Shape {
                        expected: dense.kernel.nrows(),
                        actual: x.len(),
                    });
                }
                Ok(Tensor::Vector(dense.forward(x.view())))
            }
            // ruled out when the model is built
            (_, Tensor::Sequence(x)) => Err(InferenceError::Shape {
                expected: 1,
                actual: x.ndim(),
            }),
            (_, Tensor::Vector(x)) => Err(InferenceError::Shape {
                expected: 2,
                actual: x.ndim(),
            }),
        }
    }
}

/// Embedding + recurrent + dense classifier producing one probability per
/// input sequence.
#[derive(Debug)]
pub struct SequenceModel {
    embedding: Array2<f32>,
    layers: Vec<Layer>,
    input_length: Option<usize>,
}

impl SequenceModel {
    /// Build a model from an exported file, checking that every layer's
    /// weights fit the previous layer's output.
    pub fn from_file(file: ModelFile) -> Result<Self, String> {
        let mut specs = file.layers.into_iter();
        let embedding = match specs.next() {
            Some(LayerSpec::Embedding { weights }) => to_array2(weights, "embedding")?,
            _ => return Err("first layer must be an embedding".into()),
        };

        let mut width = embedding.ncols();
        let mut sequence = true;
        let mut layers = Vec::new();

        for spec in specs {
            match spec {
                LayerSpec::Embedding { .. } => return Err("embedding is only allowed as the first layer".into()),
                LayerSpec::Dropout { .. } => {}
                LayerSpec::Lstm(spec) => {
                    if !sequence {
                        return Err("lstm placed after a layer that returns a vector".into());
                    }
                    let lstm = Lstm::from_spec(spec, width)?;
                    width = lstm.units;
                    sequence = lstm.return_sequences;
                    layers.push(Layer::Lstm(lstm));
                }
                LayerSpec::Bidirectional { forward, backward } => {
                    if !sequence {
                        return Err("bidirectional placed after a layer that returns a vector".into());
                    }
                    let forward = Lstm::from_spec(forward, width)?;
                    let backward = Lstm::from_spec(backward, width)?;
                    if forward.units != backward.units || forward.return_sequences != backward.return_sequences {
                        return Err("bidirectional directions differ in shape".into());
                    }
                    width = 2 * forward.units;
                    sequence = forward.return_sequences;
                    layers.push(Layer::Bidirectional { forward, backward });
                }
                LayerSpec::Dense { kernel, bias, activation } => {
                    if sequence {
                        return Err("dense layer needs a vector input; last recurrent layer returns sequences".into());
                    }
                    let kernel = to_array2(kernel, "dense kernel")?;
                    if kernel.nrows() != width {
                        return Err(format!("dense kernel expects {} inputs, previous layer yields {}", kernel.nrows(), width));
                    }
                    if bias.len() != kernel.ncols() {
                        return Err(format!("dense bias has {} values, kernel has {} outputs", bias.len(), kernel.ncols()));
                    }
                    width = kernel.ncols();
                    layers.push(Layer::Dense(Dense {
                        kernel,
                        bias: Array1::from(bias),
                        activation,
                    }));
                }
            }
        }

        if sequence || width != 1 {
            return Err(format!("model must end in a single output, found width {width}"));
        }

        Ok(Self {
            embedding,
            layers,
            input_length: file.input_length,
        })
    }

    /// Parse and build from JSON text
    pub fn from_json(raw: &str) -> Result<Self, String> {
        let file: ModelFile = serde_json::from_str(raw).map_err(|e| e.to_string())?;
        Self::from_file(file)
    }

    /// Sequence length recorded in the artifact
    pub fn input_length(&self) -> Option<usize> {
        self.input_length
    }

    /// Rows in the embedding table
    pub fn vocab_size(&self) -> usize {
        self.embedding.nrows()
    }

    /// One score per row of a padded `(batch, steps)` index matrix.
    pub fn predict(&self, batch: &Array2<usize>) -> Result<Vec<f32>, InferenceError> {
        batch.outer_iter().map(|row| self.predict_one(row)).collect()
    }

    fn predict_one(&self, tokens: ArrayView1<usize>) -> Result<f32, InferenceError> {
        let rows = self.embedding.nrows();
        let mut x = Array2::<f32>::zeros((tokens.len(), self.embedding.ncols()));
        for (t, &index) in tokens.iter().enumerate() {
            if index >= rows {
                return Err(InferenceError::IndexOutOfRange { index, rows });
            }
            x.row_mut(t).assign(&self.embedding.row(index));
        }

        let mut state = Tensor::Sequence(x);
        for layer in &self.layers {
            state = layer.forward(state)?;
        }

        match state {
            Tensor::Vector(v) if v.len() == 1 => Ok(v[0]),
            Tensor::Vector(v) => Err(InferenceError::Output(v.len())),
            Tensor::Sequence(s) => Err(InferenceError::Output(s.len())),
        }
    }
}

fn to_array2(rows: Vec<Vec<f32>>, what: &str) -> Result<Array2<f32>, String> {
    let nrows = rows.len();
    let ncols = rows.first().map(Vec::len).unwrap_or(0);
    if nrows == 0 || ncols == 0 {
        return Err(format!("{what} is empty"));
    }
    if rows.iter().any(|r| r.len() != ncols) {
        return Err(format!("{what} rows have different lengths"));
    }
    let flat: Vec<f32> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((nrows, ncols), flat).map_err(|e| format!("{what}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use serde_json::json;

    // 1-unit LSTM whose gates only see the input: i = f = o = sigmoid(x),
    // candidate = tanh(x).
    fn tiny_lstm() -> serde_json::Value {
        json!({
            "kernel": [[1.0, 1.0, 1.0, 1.0]],
            "recurrent_kernel": [[0.0, 0.0, 0.0, 0.0]],
            "bias": [0.0, 0.0, 0.0, 0.0]
        })
    }

    fn tiny_model(recurrent: serde_json::Value, dense_in: usize) -> SequenceModel {
        let kernel: Vec<Vec<f32>> = vec![vec![1.0]; dense_in];
        let raw = json!({
            "input_length": 3,
            "layers": [
                {"type": "embedding", "weights": [[0.0], [1.0], [-1.0]]},
                recurrent,
                {"type": "dropout", "rate": 0.3},
                {"type": "dense", "kernel": kernel, "bias": [0.0], "activation": "sigmoid"}
            ]
        });
        SequenceModel::from_json(&raw.to_string()).unwrap()
    }

    fn expected_lstm_step(x: f32, c_prev: f32) -> (f32, f32) {
        let gate = sigmoid(x);
        let c = gate * c_prev + gate * x.tanh();
        (gate * c.tanh(), c)
    }

    #[test]
    fn test_lstm_forward_matches_hand_computation() {
        let mut lstm = tiny_lstm();
        lstm["type"] = json!("lstm");
        let model = tiny_model(lstm, 1);

        let (_, c1) = expected_lstm_step(1.0, 0.0);
        let (h2, _) = expected_lstm_step(0.0, c1);
        let expected = sigmoid(h2);

        let scores = model.predict(&array![[1, 0]]).unwrap();
        assert!((scores[0] - expected).abs() < 1e-6);
        assert_eq!(model.input_length(), Some(3));
    }

    #[test]
    fn test_bidirectional_concatenates_both_directions() {
        let model = tiny_model(
            json!({"type": "bidirectional", "forward": tiny_lstm(), "backward": tiny_lstm()}),
            2,
        );

        // forward ends on token 2 (x = -1) after token 1 (x = 1);
        // backward ends on token 1 after token 2
        let (_, fc) = expected_lstm_step(1.0, 0.0);
        let (fh, _) = expected_lstm_step(-1.0, fc);
        let (_, bc) = expected_lstm_step(-1.0, 0.0);
        let (bh, _) = expected_lstm_step(1.0, bc);

        let scores = model.predict(&array![[1, 2]]).unwrap();
        assert!((scores[0] - sigmoid(fh + bh)).abs() < 1e-6);
    }

    #[test]
    fn test_padding_rows_are_deterministic() {
        let mut lstm = tiny_lstm();
        lstm["type"] = json!("lstm");
        let model = tiny_model(lstm, 1);

        let scores = model.predict(&array![[0, 0, 0], [1, 2, 0], [0, 0, 0]]).unwrap();
        assert_eq!(scores.len(), 3);
        assert_eq!(scores[0], scores[2]);
        // all-zero embedding rows keep the state at zero
        assert!((scores[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_index_is_an_inference_error() {
        let mut lstm = tiny_lstm();
        lstm["type"] = json!("lstm");
        let model = tiny_model(lstm, 1);

        assert!(matches!(
            model.predict(&array![[1, 9]]),
            Err(InferenceError::IndexOutOfRange { index: 9, rows: 3 })
        ));
    }

    #[test]
    fn test_shape_mismatch_rejected_at_load() {
        let raw = json!({
            "layers": [
                {"type": "embedding", "weights": [[0.0, 1.0]]},
                {"type": "lstm", "kernel": [[1.0, 1.0, 1.0, 1.0]], "recurrent_kernel": [[0.0, 0.0, 0.0, 0.0]], "bias": [0.0, 0.0, 0.0, 0.0]},
                {"type": "dense", "kernel": [[1.0]], "bias": [0.0]}
            ]
        });
        assert!(SequenceModel::from_json(&raw.to_string()).is_err());

        let no_embedding = json!({"layers": [{"type": "dense", "kernel": [[1.0]], "bias": [0.0]}]});
        assert!(SequenceModel::from_json(&no_embedding.to_string()).is_err());

        let wide_output = json!({
            "layers": [
                {"type": "embedding", "weights": [[0.0]]},
                {"type": "lstm", "kernel": [[1.0, 1.0, 1.0, 1.0]], "recurrent_kernel": [[0.0, 0.0, 0.0, 0.0]], "bias": [0.0, 0.0, 0.0, 0.0]},
                {"type": "dense", "kernel": [[1.0, 1.0]], "bias": [0.0, 0.0]}
            ]
        });
        assert!(SequenceModel::from_json(&wide_output.to_string()).is_err());
    }
}
