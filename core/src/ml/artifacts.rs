//! Model artifacts: the on-disk JSON formats, the scoring capability they expose,
//! and the sources the registry loads them from.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ServingError, ServingResult};
use crate::types::{FEATURE_AGE, FEATURE_MONTHLY_INCOME, FEATURE_TENURE, FEATURE_TRAVEL_FREQUENCY};

/// Anything able to turn an ordered feature vector into the probability of the positive class.
pub trait ScoringModel: Send + Sync {
    fn predict_proba(&self, features: &[f64]) -> ServingResult<f64>;

    /// Checks the model against the registry's feature order when it is loaded.
    fn check_features(&self, _feature_count: usize) -> ServingResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub display_name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryMetadata {
    pub model_name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub models: BTreeMap<String, ModelInfo>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// ARTIFACT FORMATS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelArtifact {
    Constant {
        probability: f64,
    },
    Logistic {
        intercept: f64,
        coefficients: Vec<f64>,
        #[serde(default)]
        mean: Option<Vec<f64>>,
        #[serde(default)]
        scale: Option<Vec<f64>>,
    },
    Forest {
        trees: Vec<DecisionTree>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

/// A split node carries `feature`; a leaf carries only `value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
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

impl TreeNode {
    fn split(feature: usize, threshold: f64, left: usize, right: usize) -> Self {
        Self {
            feature: Some(feature),
            threshold,
            left,
            right,
            value: 0.0,
        }
    }

    fn leaf(value: f64) -> Self {
        Self {
            feature: None,
            threshold: 0.0,
            left: 0,
            right: 0,
            value,
        }
    }
}

impl ModelArtifact {
    pub fn validate(&self, feature_count: usize) -> ServingResult<()> {
        match self {
            ModelArtifact::Constant { probability } => {
                if !(0.0..=1.0).contains(probability) {
                    return Err(ServingError::artifact(format!(
                        "constant probability out of range: {probability}"
                    )));
                }
            }
            ModelArtifact::Logistic {
                coefficients,
                mean,
                scale,
                ..
            } => {
                check_len("coefficients", coefficients.len(), feature_count)?;
                if let Some(mean) = mean {
                    check_len("mean", mean.len(), feature_count)?;
                }
                if let Some(scale) = scale {
                    check_len("scale", scale.len(), feature_count)?;
                    if scale.iter().any(|value| *value == 0.0) {
                        return Err(ServingError::artifact("scale contains zero"));
                    }
                }
            }
            ModelArtifact::Forest { trees } => {
                if trees.is_empty() {
                    return Err(ServingError::artifact("forest has no trees"));
                }
                for (index, tree) in trees.iter().enumerate() {
                    tree.validate(feature_count)
                        .map_err(|err| ServingError::artifact(format!("tree {index}: {err}")))?;
                }
            }
        }
        Ok(())
    }
}

fn check_len(what: &str, actual: usize, expected: usize) -> ServingResult<()> {
    if actual != expected {
        return Err(ServingError::artifact(format!(
            "{what} has {actual} entries, feature order has {expected}"
        )));
    }
    Ok(())
}

impl DecisionTree {
    fn validate(&self, feature_count: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("empty tree".to_string());
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if let Some(feature) = node.feature {
                if feature >= feature_count {
                    return Err(format!("node {index} splits on unknown feature {feature}"));
                }
                if node.left >= self.nodes.len() || node.right >= self.nodes.len() {
                    return Err(format!("node {index} points outside the tree"));
                }
            } else if !(0.0..=1.0).contains(&node.value) {
                return Err(format!("leaf {index} value out of range"));
            }
        }
        Ok(())
    }

    fn score(&self, features: &[f64]) -> ServingResult<f64> {
        let mut index = 0usize;
        // A well-formed tree reaches a leaf in fewer steps than it has nodes.
        for _ in 0..=self.nodes.len() {
            let node = &self.nodes[index];
            match node.feature {
                None => return Ok(node.value),
                Some(feature) => {
                    index = if features[feature] <= node.threshold {
                        node.left
                    } else {
                        node.right
                    };
                }
            }
        }
        Err(ServingError::inference("decision tree contains a cycle"))
    }
}

impl ScoringModel for ModelArtifact {
    fn check_features(&self, feature_count: usize) -> ServingResult<()> {
        self.validate(feature_count)
    }

    fn predict_proba(&self, features: &[f64]) -> ServingResult<f64> {
        match self {
            ModelArtifact::Constant { probability } => Ok(*probability),
            ModelArtifact::Logistic {
                intercept,
                coefficients,
                mean,
                scale,
            } => {
                if features.len() != coefficients.len() {
                    return Err(ServingError::inference(format!(
                        "expected {} features, got {}",
                        coefficients.len(),
                        features.len()
                    )));
                }
                let mut total = *intercept;
                for (index, (value, weight)) in features.iter().zip(coefficients).enumerate() {
                    let centered = value - mean.as_ref().map(|m| m[index]).unwrap_or(0.0);
                    let scaled = centered / scale.as_ref().map(|s| s[index]).unwrap_or(1.0);
                    total += weight * scaled;
                }
                Ok(sigmoid(total))
            }
            ModelArtifact::Forest { trees } => {
                let mut total = 0.0;
                for tree in trees {
                    if tree
                        .nodes
                        .iter()
                        .filter_map(|node| node.feature)
                        .any(|feature| feature >= features.len())
                    {
                        return Err(ServingError::inference(
                            "feature vector shorter than the forest expects",
                        ));
                    }
                    total += tree.score(features)?;
                }
                Ok(total / trees.len() as f64)
            }
        }
    }
}

fn sigmoid(value: f64) -> f64 {
    1.0 / (1.0 + (-value).exp())
}

// ============================================================================
// ARTIFACT SOURCES
// ============================================================================

/// Where the registry reads its catalog from. Every call goes to the backing store;
/// memoization is the registry's job.
pub trait ArtifactSource: Send + Sync {
    fn load_metadata(&self) -> ServingResult<RegistryMetadata>;
    fn load_features(&self) -> ServingResult<Vec<String>>;
    fn load_model(&self, name: &str, info: &ModelInfo) -> ServingResult<Arc<dyn ScoringModel>>;
}

pub struct FsArtifacts {
    root: PathBuf,
}

impl FsArtifacts {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArtifactSource for FsArtifacts {
    fn load_metadata(&self) -> ServingResult<RegistryMetadata> {
        read_json(&self.root.join("metadata.json"))
    }

    fn load_features(&self) -> ServingResult<Vec<String>> {
        let features: Vec<String> = read_json(&self.root.join("features.json"))?;
        if features.is_empty() {
            return Err(ServingError::artifact("feature list is empty"));
        }
        Ok(features)
    }

    fn load_model(&self, name: &str, info: &ModelInfo) -> ServingResult<Arc<dyn ScoringModel>> {
        let relative = info
            .artifact
            .clone()
            .unwrap_or_else(|| format!("models/{name}.json"));
        let artifact: ModelArtifact = read_json(&self.root.join(relative))?;
        Ok(Arc::new(artifact))
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> ServingResult<T> {
    if !path.exists() {
        return Err(ServingError::artifact(format!(
            "artifact not found: {}",
            path.display()
        )));
    }
    if path.is_dir() {
        return Err(ServingError::artifact(format!(
            "artifact path must be a file: {}",
            path.display()
        )));
    }
    let data = std::fs::read(path).map_err(|err| {
        ServingError::artifact(format!("artifact read error {}: {err}", path.display()))
    })?;
    serde_json::from_slice(&data).map_err(|err| {
        ServingError::artifact(format!("artifact parse error {}: {err}", path.display()))
    })
}

/// Deterministic stand-ins used in test/offline mode. Same catalog shape as the
/// exported artifacts, small enough to reason about by hand.
pub struct BuiltinArtifacts;

pub const BUILTIN_FEATURES: [&str; 6] = [
    FEATURE_AGE,
    FEATURE_MONTHLY_INCOME,
    FEATURE_TENURE,
    FEATURE_TRAVEL_FREQUENCY,
    "nombre_participation_pee",
    "nb_formations_suivies",
];

impl ArtifactSource for BuiltinArtifacts {
    fn load_metadata(&self) -> ServingResult<RegistryMetadata> {
        let mut models = BTreeMap::new();
        for (name, display_name, version, description) in [
            (
                "dummy",
                "Dummy (most frequent)",
                "e03-dummy-v1",
                "Baseline predicting the majority class",
            ),
            (
                "logistic",
                "Logistic regression (balanced)",
                "e03-logreg-v1",
                "Class-balanced logistic regression",
            ),
            (
                "random_forest",
                "Random forest (balanced)",
                "e03-rf-v1",
                "Class-balanced random forest",
            ),
            (
                "random_forest_e04",
                "Random forest (tuned)",
                "e04-rf-v1",
                "Tuned random forest promoted to production",
            ),
        ] {
            models.insert(
                name.to_string(),
                ModelInfo {
                    display_name: display_name.to_string(),
                    version: version.to_string(),
                    description: description.to_string(),
                    artifact: None,
                },
            );
        }
        Ok(RegistryMetadata {
            model_name: "random_forest_e04".to_string(),
            version: "e04-rf-v1".to_string(),
            description: "Built-in offline stand-ins".to_string(),
            models,
            extra: Map::new(),
        })
    }

    fn load_features(&self) -> ServingResult<Vec<String>> {
        Ok(BUILTIN_FEATURES.iter().map(|name| name.to_string()).collect())
    }

    fn load_model(&self, name: &str, _info: &ModelInfo) -> ServingResult<Arc<dyn ScoringModel>> {
        let artifact = match name {
            "dummy" => ModelArtifact::Constant { probability: 0.0 },
            "logistic" => ModelArtifact::Logistic {
                intercept: 2.0,
                coefficients: vec![-0.05, -0.0002, -0.1, 0.8, 0.0, 0.0],
                mean: None,
                scale: None,
            },
            "random_forest" => ModelArtifact::Forest {
                trees: vec![
                    DecisionTree {
                        nodes: vec![
                            TreeNode::split(3, 1.5, 1, 2),
                            TreeNode::leaf(0.2),
                            TreeNode::leaf(0.7),
                        ],
                    },
                    DecisionTree {
                        nodes: vec![
                            TreeNode::split(0, 35.0, 1, 2),
                            TreeNode::leaf(0.6),
                            TreeNode::leaf(0.1),
                        ],
                    },
                ],
            },
            "random_forest_e04" => ModelArtifact::Forest {
                trees: vec![
                    DecisionTree {
                        nodes: vec![
                            TreeNode::split(2, 3.5, 1, 2),
                            TreeNode::leaf(0.7),
                            TreeNode::leaf(0.3),
                        ],
                    },
                    DecisionTree {
                        nodes: vec![
                            TreeNode::split(1, 3000.0, 1, 2),
                            TreeNode::leaf(0.8),
                            TreeNode::leaf(0.25),
                        ],
                    },
                    DecisionTree {
                        nodes: vec![
                            TreeNode::split(3, 0.5, 1, 2),
                            TreeNode::leaf(0.1),
                            TreeNode::leaf(0.45),
                        ],
                    },
                ],
            },
            other => {
                return Err(ServingError::artifact(format!(
                    "no built-in artifact for {other}"
                )))
            }
        };
        Ok(Arc::new(artifact))
    }
}
