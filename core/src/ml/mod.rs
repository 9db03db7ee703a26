pub mod artifacts;
pub mod inference;
pub mod normalizer;
pub mod predictor;
pub mod registry;

pub use artifacts::{ArtifactSource, BuiltinArtifacts, FsArtifacts, ModelArtifact, ScoringModel};
pub use inference::InferencePool;
pub use predictor::Predictor;
pub use registry::{ModelRegistry, RegisteredModel};
