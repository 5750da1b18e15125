//! Tree ensembles for bot detection
//!
//! Inference for RandomForest and IsolationForest models exported from
//! sklearn tree arrays, plus the StandardScaler fitted alongside each one.
//! Every split sends `x[feature] <= threshold` to the left child, with the
//! feature first rounded to f32 as sklearn trees do.

use crate::InferenceError;
use serde::Deserialize;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Per-feature standardization `(x - mean) / scale`
#[derive(Debug, Clone, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    /// Build from fitted statistics
    pub fn new(mean: Vec<f64>, scale: Vec<f64>) -> Result<Self, String> {
        let scaler = Self { mean, scale };
        scaler.validate()?;
        Ok(scaler)
    }

    /// Number of features the scaler was fitted on
    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<(), String> {
        if self.mean.is_empty() {
            return Err("scaler has no features".into());
        }
        if self.mean.len() != self.scale.len() {
            return Err(format!(
                "scaler mean has {} values, scale has {}",
                self.mean.len(),
                self.scale.len()
            ));
        }
        Ok(())
    }

    /// Standardize one sample. Zero-variance features use a scale of 1.
    pub fn transform(&self, x: &[f64]) -> Result<Vec<f64>, InferenceError> {
        if x.len() != self.mean.len() {
            return Err(InferenceError::Shape {
                expected: self.mean.len(),
                actual: x.len(),
            });
        }
        Ok(x.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| {
                let s = if *s == 0.0 { 1.0 } else { *s };
                (v - m) / s
            })
            .collect())
    }
}

/// One node of an exported tree
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Node<L> {
    /// Internal split
    Split {
        /// Feature index tested
        feature: usize,
        /// Values `<=` threshold go left
        threshold: f64,
        /// Left child node id
        left: usize,
        /// Right child node id
        right: usize,
    },
    /// Terminal node
    Leaf(L),
}

/// Flat array of nodes, root at index 0
#[derive(Debug, Clone, Deserialize)]
pub struct Tree<L> {
    nodes: Vec<Node<L>>,
}

impl<L> Tree<L> {
    /// Build from nodes
    pub fn new(nodes: Vec<Node<L>>) -> Self {
        Self { nodes }
    }

    fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".into());
        }
        for (id, node) in self.nodes.iter().enumerate() {
            if let Node::Split { feature, left, right, .. } = node {
                if *feature >= n_features {
                    return Err(format!("node {id} splits on feature {feature} of {n_features}"));
                }
                // children always come after their parent in sklearn arrays,
                // which also guarantees the walk terminates
                for child in [*left, *right] {
                    if child <= id || child >= self.nodes.len() {
                        return Err(format!("node {id} has invalid child {child}"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Walk to the leaf for `x`, returning it with its depth.
    fn leaf(&self, x: &[f64]) -> (&L, usize) {
        let mut id = 0;
        let mut depth = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf(leaf) => return (leaf, depth),
                Node::Split { feature, threshold, left, right } => {
                    id = if f64::from(x[*feature] as f32) <= *threshold { *left } else { *right };
                    depth += 1;
                }
            }
        }
    }
}

/// RandomForest leaf: class distribution (counts or fractions)
#[derive(Debug, Clone, Deserialize)]
pub struct ClassLeaf {
    /// Per-class weight
    pub value: Vec<f64>,
}

/// IsolationForest leaf: training samples that reached it
#[derive(Debug, Clone, Deserialize)]
pub struct SampleLeaf {
    /// Sample count
    pub n_samples: usize,
}

/// Supervised classifier
#[derive(Debug, Clone, Deserialize)]
pub struct RandomForest {
    classes: Vec<i64>,
    n_features: usize,
    trees: Vec<Tree<ClassLeaf>>,
}

/// RandomForest output for one sample
#[derive(Debug, Clone, PartialEq)]
pub struct ClassPrediction {
    /// Class with the highest mean probability
    pub class: i64,
    /// Mean probability per class, in `classes` order
    pub probabilities: Vec<f64>,
}

impl ClassPrediction {
    /// Probability of the predicted class
    pub fn confidence(&self) -> f64 {
        self.probabilities.iter().copied().fold(0.0, f64::max)
    }
}

impl RandomForest {
    /// Build and validate
    pub fn new(classes: Vec<i64>, n_features: usize, trees: Vec<Tree<ClassLeaf>>) -> Result<Self, String> {
        let forest = Self { classes, n_features, trees };
        forest.validate()?;
        Ok(forest)
    }

    /// Number of input features
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Check every tree against the declared classes and features
    pub fn validate(&self) -> Result<(), String> {
        if self.classes.is_empty() {
            return Err("forest has no classes".into());
        }
        if self.trees.is_empty() {
            return Err("forest has no trees".into());
        }
        for (t, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features).map_err(|e| format!("tree {t}: {e}"))?;
            for node in &tree.nodes {
                if let Node::Leaf(leaf) = node {
                    if leaf.value.len() != self.classes.len() {
                        return Err(format!(
                            "tree {t}: leaf has {} class weights, forest has {} classes",
                            leaf.value.len(),
                            self.classes.len()
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Mean of the per-tree normalized leaf distributions.
    pub fn predict_proba(&self, x: &[f64]) -> Result<Vec<f64>, InferenceError> {
        self.check_width(x)?;
        let mut proba = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            let (leaf, _) = tree.leaf(x);
            let total: f64 = leaf.value.iter().sum();
            if total > 0.0 {
                for (p, v) in proba.iter_mut().zip(&leaf.value) {
                    *p += v / total;
                }
            }
        }
        let n = self.trees.len() as f64;
        proba.iter_mut().for_each(|p| *p /= n);
        Ok(proba)
    }

    /// Predicted class (first maximum wins on ties) and probabilities
    pub fn predict(&self, x: &[f64]) -> Result<ClassPrediction, InferenceError> {
        let probabilities = self.predict_proba(x)?;
        let mut best = 0;
        for (i, p) in probabilities.iter().enumerate() {
            if *p > probabilities[best] {
                best = i;
            }
        }
        Ok(ClassPrediction {
            class: self.classes[best],
            probabilities,
        })
    }

    fn check_width(&self, x: &[f64]) -> Result<(), InferenceError> {
        if x.len() != self.n_features {
            return Err(InferenceError::Shape {
                expected: self.n_features,
                actual: x.len(),
            });
        }
        Ok(())
    }
}

/// Unsupervised outlier detector
#[derive(Debug, Clone, Deserialize)]
pub struct IsolationForest {
    n_features: usize,
    max_samples: usize,
    offset: f64,
    trees: Vec<Tree<SampleLeaf>>,
}

/// IsolationForest output for one sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierPrediction {
    /// `1` inlier, `-1` outlier
    pub label: i64,
    /// Signed distance from the contamination threshold; negative means
    /// outlier. Unbounded.
    pub decision: f64,
}

impl IsolationForest {
    /// Build and validate
    pub fn new(n_features: usize, max_samples: usize, offset: f64, trees: Vec<Tree<SampleLeaf>>) -> Result<Self, String> {
        let forest = Self { n_features, max_samples, offset, trees };
        forest.validate()?;
        Ok(forest)
    }

    /// Number of input features
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Check every tree against the declared features
    pub fn validate(&self) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("forest has no trees".into());
        }
        if self.max_samples < 2 {
            return Err(format!("max_samples must be at least 2, got {}", self.max_samples));
        }
        for (t, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features).map_err(|e| format!("tree {t}: {e}"))?;
        }
        Ok(())
    }

    /// sklearn `score_samples`: `-2^(-E[path] / c(max_samples))`, in [-1, 0).
    pub fn score(&self, x: &[f64]) -> Result<f64, InferenceError> {
        if x.len() != self.n_features {
            return Err(InferenceError::Shape {
                expected: self.n_features,
                actual: x.len(),
            });
        }
        let total: f64 = self
            .trees
            .iter()
            .map(|tree| {
                let (leaf, depth) = tree.leaf(x);
                depth as f64 + average_path_length(leaf.n_samples)
            })
            .sum();
        let mean_depth = total / self.trees.len() as f64;
        Ok(-(2f64.powf(-mean_depth / average_path_length(self.max_samples))))
    }

    /// sklearn `decision_function` and `predict`
    pub fn predict(&self, x: &[f64]) -> Result<OutlierPrediction, InferenceError> {
        let decision = self.score(x)? - self.offset;
        Ok(OutlierPrediction {
            label: if decision < 0.0 { -1 } else { 1 },
            decision,
        })
    }
}

/// Average path length of an unsuccessful BST search over `n` samples.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}
