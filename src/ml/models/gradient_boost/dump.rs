//! Portable booster format
//!
//! Trees flattened into node arrays and written as JSON text, so a model can
//! be inspected, diffed and reloaded without the training-time types.

use serde::{Deserialize, Serialize};

use super::{check_columns, sigmoid, TreeNode};
use crate::error::{FusionError, Result};
use crate::ml::frame::FeatureMatrix;

/// Current dump format version
pub const DUMP_FORMAT_VERSION: u32 = 1;

/// One node of a flattened tree. Split nodes carry `feature`; leaves don't.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<usize>,
    #[serde(default)]
    pub threshold: f64,
    #[serde(default)]
    pub left: usize,
    #[serde(default)]
    pub right: usize,
    #[serde(default)]
    pub value: f64,
}

/// A flattened tree; node 0 is the root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpTree {
    pub nodes: Vec<DumpNode>,
}

impl DumpTree {
    pub(super) fn flatten(root: &TreeNode) -> Self {
        let mut nodes = Vec::new();
        Self::push(root, &mut nodes);
        Self { nodes }
    }

    fn push(node: &TreeNode, nodes: &mut Vec<DumpNode>) -> usize {
        let idx = nodes.len();
        match node {
            TreeNode::Leaf { value } => nodes.push(DumpNode {
                feature: None,
                threshold: 0.0,
                left: 0,
                right: 0,
                value: *value,
            }),
            TreeNode::Split {
                feature_idx,
                threshold,
                left,
                right,
            } => {
                nodes.push(DumpNode {
                    feature: Some(*feature_idx),
                    threshold: *threshold,
                    left: 0,
                    right: 0,
                    value: 0.0,
                });
                let l = Self::push(left, nodes);
                let r = Self::push(right, nodes);
                nodes[idx].left = l;
                nodes[idx].right = r;
            }
        }
        idx
    }

    fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        // a well-formed tree reaches a leaf in at most nodes.len() steps
        for _ in 0..=self.nodes.len() {
            let Some(node) = self.nodes.get(idx) else {
                return 0.0;
            };
            match node.feature {
                None => return node.value,
                Some(f) => {
                    let v = row.get(f).copied().unwrap_or(0.0);
                    idx = if v <= node.threshold { node.left } else { node.right };
                }
            }
        }
        0.0
    }

    fn validate(&self, n_features: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(FusionError::Serialization("empty tree in booster dump".into()));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if let Some(f) = node.feature {
                if f >= n_features {
                    return Err(FusionError::Serialization(format!(
                        "node {} splits on feature {} of {}",
                        i, f, n_features
                    )));
                }
                // children always follow their parent in preorder
                let in_range = |c: usize| c > i && c < self.nodes.len();
                if !in_range(node.left) || !in_range(node.right) {
                    return Err(FusionError::Serialization(format!(
                        "node {} has invalid children",
                        i
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Booster in portable form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoosterDump {
    pub version: u32,
    pub objective: String,
    pub base_score: f64,
    pub feature_names: Vec<String>,
    pub trees: Vec<DumpTree>,
}

impl BoosterDump {
    pub(super) fn from_parts(base_score: f64, feature_names: Vec<String>, trees: Vec<DumpTree>) -> Self {
        Self {
            version: DUMP_FORMAT_VERSION,
            objective: "binary".to_string(),
            base_score,
            feature_names,
            trees,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| FusionError::Serialization(e.to_string()))
    }

    /// Parse and validate a dump
    pub fn from_json(text: &str) -> Result<Self> {
        let dump: Self =
            serde_json::from_str(text).map_err(|e| FusionError::Serialization(e.to_string()))?;
        if dump.version != DUMP_FORMAT_VERSION {
            return Err(FusionError::Serialization(format!(
                "unsupported booster dump version {}",
                dump.version
            )));
        }
        if dump.objective != "binary" {
            return Err(FusionError::Serialization(format!(
                "unsupported objective {}",
                dump.objective
            )));
        }
        for tree in &dump.trees {
            tree.validate(dump.feature_names.len())?;
        }
        Ok(dump)
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    fn predict_margin(&self, row: &[f64]) -> f64 {
        let mut margin = self.base_score;
        for tree in &self.trees {
            margin += tree.predict(row);
        }
        margin
    }

    /// Anomaly probability per row; columns must match training columns
    pub fn predict_proba(&self, data: &FeatureMatrix) -> Result<Vec<f64>> {
        check_columns(&self.feature_names, data)?;
        Ok(data
            .rows()
            .map(|row| sigmoid(self.predict_margin(row)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::models::{BoostingConfig, GradientBoostClassifier};

    fn trained() -> (GradientBoostClassifier, FeatureMatrix) {
        let rows: Vec<Vec<f64>> = (0..80)
            .map(|i| vec![(i % 9) as f64 * 0.37, ((i * 5) % 11) as f64 - 3.3])
            .collect();
        let labels: Vec<f64> = rows
            .iter()
            .map(|r| if r[0] + 0.2 * r[1] > 1.5 { 1.0 } else { 0.0 })
            .collect();
        let x = FeatureMatrix::from_rows(vec!["a".into(), "b".into()], rows);
        let mut model = GradientBoostClassifier::new(BoostingConfig {
            n_estimators: 25,
            min_samples_leaf: 3,
            ..Default::default()
        });
        model.fit(&x, &labels).unwrap();
        (model, x)
    }

    #[test]
    fn test_dump_predictions_bit_identical() {
        let (model, x) = trained();
        let dump = BoosterDump::from_json(&model.dump().to_json().unwrap()).unwrap();

        let fresh = model.predict_proba(&x).unwrap();
        let restored = dump.predict_proba(&x).unwrap();
        let fresh_bits: Vec<u64> = fresh.iter().map(|v| v.to_bits()).collect();
        let restored_bits: Vec<u64> = restored.iter().map(|v| v.to_bits()).collect();
        assert_eq!(fresh_bits, restored_bits);
    }

    #[test]
    fn test_dump_preserves_feature_names() {
        let (model, _) = trained();
        let dump = model.dump();
        assert_eq!(dump.feature_names(), model.feature_names());
        assert_eq!(dump.num_trees(), model.num_trees());
    }

    #[test]
    fn test_rejects_unknown_version() {
        let (model, _) = trained();
        let mut dump = model.dump();
        dump.version = 99;
        let text = serde_json::to_string(&dump).unwrap();
        assert!(BoosterDump::from_json(&text).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_feature() {
        let dump = BoosterDump::from_parts(
            0.0,
            vec!["a".into()],
            vec![DumpTree {
                nodes: vec![
                    DumpNode { feature: Some(3), threshold: 0.0, left: 1, right: 2, value: 0.0 },
                    DumpNode { feature: None, threshold: 0.0, left: 0, right: 0, value: 1.0 },
                    DumpNode { feature: None, threshold: 0.0, left: 0, right: 0, value: -1.0 },
                ],
            }],
        );
        let text = serde_json::to_string(&dump).unwrap();
        assert!(BoosterDump::from_json(&text).is_err());
    }

    #[test]
    fn test_corrupt_text_is_error() {
        assert!(BoosterDump::from_json("{ not json").is_err());
    }
}
