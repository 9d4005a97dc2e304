pub mod config;
pub mod consolidate;
pub mod csi;
pub mod document;
pub mod markdown;
pub mod material;

pub use config::{ConfigError, Settings};
pub use consolidate::{ConsolidatedContext, ImageMaterials, MergedMaterial, consolidate};
pub use document::{SectionOutcome, SectionSource, SpecificationDocument, SpecificationSection};
pub use material::{
    AnalysisOutcome, FailureKind, FailureStage, ImageAnalysis, ImageInput, MaterialRecord,
    Prominence, StageFailure,
};
