//! Classifier: gradient-boosted decision-tree ensemble inference.
//!
//! Training and the on-disk model format are out of scope; this module
//! only defines the in-memory model shape, a minimal binary loader for
//! it (structural checks only — decoding an externally-trained model's
//! own format is a concern for whatever produced the artifact), and
//! stateless inference.

use std::collections::HashMap;

use scipathj_types::{Classification, FeatureValue};

use crate::error::ModelFormatError;

/// One decision node. A leaf has `feature_index: None`; an internal node
/// routes to `left`/`right` based on `feature_value < split_value`, with
/// missing (`NaN`) features routed per `default_left`.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub feature_index: Option<usize>,
    pub split_value: f64,
    pub left: usize,
    pub right: usize,
    pub leaf_value: f64,
    pub default_left: bool,
}

/// One boosting round's tree, contributing additively to one class's
/// raw score.
#[derive(Debug, Clone)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
    pub root: usize,
    pub target_class: usize,
}

/// A loaded, structurally-validated boosted-tree ensemble.
#[derive(Debug, Clone)]
pub struct ClassifierModel {
    class_names: Vec<String>,
    feature_names: Vec<String>,
    trees: Vec<Tree>,
}

const MAGIC: &[u8; 4] = b"SPJM";

impl ClassifierModel {
    /// Builds a model from already-decoded parts, applying the
    /// structural checks the spec requires at load time.
    ///
    /// # Errors
    /// Returns [`ModelFormatError::ClassIndexOutOfRange`] if any tree
    /// targets a class index `>= class_names.len()`,
    /// [`ModelFormatError::MissingFeatureMapping`] if any node references
    /// a feature index `>= feature_names.len()`, or
    /// [`ModelFormatError::NodeIndexOutOfRange`] if a tree's `root` or
    /// any non-leaf node's `left`/`right` child index is `>=
    /// nodes.len()`. The last check is what keeps `traverse` from ever
    /// indexing out of bounds on a malformed artifact.
    pub fn new(
        class_names: Vec<String>,
        feature_names: Vec<String>,
        trees: Vec<Tree>,
    ) -> Result<Self, ModelFormatError> {
        for (tree_index, tree) in trees.iter().enumerate() {
            if tree.target_class >= class_names.len() {
                return Err(ModelFormatError::ClassIndexOutOfRange {
                    declared: class_names.len(),
                    tree_index,
                    target: tree.target_class,
                });
            }
            let node_count = tree.nodes.len();
            if tree.root >= node_count {
                return Err(ModelFormatError::NodeIndexOutOfRange {
                    tree_index,
                    node_index: tree.root,
                    node_count,
                });
            }
            for node in &tree.nodes {
                if let Some(index) = node.feature_index {
                    if index >= feature_names.len() {
                        return Err(ModelFormatError::MissingFeatureMapping { index });
                    }
                    // Leaves carry feature_index == None and are never
                    // traversed past, so only non-leaf child pointers
                    // need bounds-checking here.
                    if node.left >= node_count {
                        return Err(ModelFormatError::NodeIndexOutOfRange {
                            tree_index,
                            node_index: node.left,
                            node_count,
                        });
                    }
                    if node.right >= node_count {
                        return Err(ModelFormatError::NodeIndexOutOfRange {
                            tree_index,
                            node_index: node.right,
                            node_count,
                        });
                    }
                }
            }
        }
        Ok(Self {
            class_names,
            feature_names,
            trees,
        })
    }

    #[must_use]
    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Decodes the minimal binary layout this loader defines: 4-byte
    /// magic `SPJM`, `u16` version, then length-prefixed UTF-8 class and
    /// feature name tables, then a length-prefixed tree table, all
    /// integers big-endian.
    ///
    /// # Errors
    /// Returns [`ModelFormatError::InvalidHeader`] if the magic bytes or
    /// version are wrong, or if the byte stream is truncated. Returns
    /// the structural errors from [`Self::new`] once decoded.
    pub fn load(path: &str, bytes: &[u8]) -> Result<Self, ModelFormatError> {
        let mut cursor = Cursor { bytes, pos: 0 };
        let invalid = || ModelFormatError::InvalidHeader { path: path.to_string() };

        if cursor.take(4).ok_or_else(invalid)? != MAGIC {
            return Err(invalid());
        }
        let version = cursor.take_u16().ok_or_else(invalid)?;
        if version != 1 {
            return Err(invalid());
        }

        let class_names = cursor.take_string_table().ok_or_else(invalid)?;
        let feature_names = cursor.take_string_table().ok_or_else(invalid)?;

        let tree_count = cursor.take_u32().ok_or_else(invalid)? as usize;
        let mut trees = Vec::with_capacity(tree_count);
        for _ in 0..tree_count {
            let target_class = cursor.take_u32().ok_or_else(invalid)? as usize;
            let root = cursor.take_u32().ok_or_else(invalid)? as usize;
            let node_count = cursor.take_u32().ok_or_else(invalid)? as usize;
            let mut nodes = Vec::with_capacity(node_count);
            for _ in 0..node_count {
                let is_leaf = cursor.take(1).ok_or_else(invalid)?[0] != 0;
                let default_left = cursor.take(1).ok_or_else(invalid)?[0] != 0;
                let feature_index = cursor.take_u32().ok_or_else(invalid)?;
                let split_value = cursor.take_f64().ok_or_else(invalid)?;
                let leaf_value = cursor.take_f64().ok_or_else(invalid)?;
                let left = cursor.take_u32().ok_or_else(invalid)? as usize;
                let right = cursor.take_u32().ok_or_else(invalid)? as usize;
                nodes.push(TreeNode {
                    feature_index: if is_leaf { None } else { Some(feature_index as usize) },
                    split_value,
                    left,
                    right,
                    leaf_value,
                    default_left,
                });
            }
            trees.push(Tree {
                nodes,
                root,
                target_class,
            });
        }

        Self::new(class_names, feature_names, trees)
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let slice = self.bytes.get(self.pos..self.pos + n)?;
        self.pos += n;
        Some(slice)
    }

    fn take_u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn take_u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn take_f64(&mut self) -> Option<f64> {
        self.take(8).map(|b| f64::from_be_bytes(b.try_into().ok()?))
    }

    fn take_string_table(&mut self) -> Option<Vec<String>> {
        let count = self.take_u32()? as usize;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let len = self.take_u32()? as usize;
            let bytes = self.take(len)?;
            out.push(String::from_utf8(bytes.to_vec()).ok()?);
        }
        Some(out)
    }
}

/// `classify({feature name -> value}, ClassifierModel) -> Classification`.
///
/// Inference never fails: a missing feature is treated as `NaN` and
/// follows the node's `default_left` rule, exactly as the model's
/// training-time missing-value convention intends.
#[must_use]
pub fn classify(
    features: &HashMap<String, FeatureValue>,
    model: &ClassifierModel,
    confidence_threshold: f64,
) -> Classification {
    let vector: Vec<f64> = model
        .feature_names()
        .iter()
        .map(|name| {
            features
                .get(name)
                .and_then(FeatureValue::as_f64)
                .unwrap_or(f64::NAN)
        })
        .collect();

    let mut scores = vec![0.0_f64; model.class_names().len()];
    for tree in &model.trees {
        scores[tree.target_class] += traverse(tree, &vector);
    }

    let probabilities = softmax(&scores);

    let (best_index, &best_prob) = probabilities
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap_or((0, &0.0));

    let predicted_class = if best_prob < confidence_threshold {
        "unknown".to_string()
    } else {
        model
            .class_names()
            .get(best_index)
            .cloned()
            .unwrap_or_else(|| "unknown".to_string())
    };

    let probability_map = model
        .class_names()
        .iter()
        .cloned()
        .zip(probabilities)
        .collect::<HashMap<String, f64>>();

    Classification {
        predicted_class,
        probabilities: probability_map,
    }
}

fn traverse(tree: &Tree, features: &[f64]) -> f64 {
    let mut node_index = tree.root;
    loop {
        let node = &tree.nodes[node_index];
        let Some(feature_index) = node.feature_index else {
            return node.leaf_value;
        };
        let value = features[feature_index];
        let go_left = if value.is_nan() {
            node.default_left
        } else {
            value < node.split_value
        };
        node_index = if go_left { node.left } else { node.right };
    }
}

fn softmax(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let max = scores.iter().copied().fold(f64::MIN, f64::max);
    let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    if sum <= 0.0 {
        let n = scores.len();
        #[allow(clippy::cast_precision_loss)]
        return vec![1.0 / n as f64; n];
    }
    exps.into_iter().map(|e| e / sum).collect()
}
