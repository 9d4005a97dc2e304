//! Consolidation of per-image material records.
//!
//! Per-image groups are the source of truth and are never altered. The merged
//! view is a display-only aggregation: records from different images that
//! describe the same material collapse into one entry that keeps every
//! `(image, position)` attribution.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::csi;
use crate::material::{ImageAnalysis, MaterialRecord, Prominence};

/// Minimum Jaccard overlap of material-type tokens for a fuzzy merge.
const TYPE_OVERLAP: f64 = 0.5;
/// Minimum Jaccard overlap of descriptive tokens for a fuzzy merge.
const DESCRIPTION_OVERLAP: f64 = 0.2;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "as", "at", "for", "in", "of", "on", "or", "the", "to", "with", "material",
    "materials", "system", "systems",
];

/// Materials found in one successfully analysed image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageMaterials {
    /// Position of the image in the input ordering.
    pub index: usize,
    pub image: String,
    pub materials: Vec<MaterialRecord>,
    /// Unparsed vision reply, kept for generation when parsing found nothing.
    pub raw_reply: String,
}

/// Where a merged material was seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribution {
    pub image: String,
    pub position: usize,
}

/// One logical material across images.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedMaterial {
    pub label: String,
    pub division: Option<String>,
    /// Highest prominence reported by any source.
    pub prominence: Option<Prominence>,
    pub sources: Vec<Attribution>,
    pub descriptions: Vec<String>,
    #[serde(skip)]
    type_tokens: BTreeSet<String>,
    #[serde(skip)]
    description_tokens: BTreeSet<String>,
}

impl MergedMaterial {
    fn from_record(rec: &MaterialRecord, material_type: &str) -> Self {
        let mut merged = Self {
            label: material_type.trim().to_string(),
            division: rec.division().map(str::to_string),
            prominence: rec.prominence,
            sources: Vec::new(),
            descriptions: Vec::new(),
            type_tokens: tokens(material_type),
            description_tokens: BTreeSet::new(),
        };
        merged.absorb(rec);
        merged
    }

    fn absorb(&mut self, rec: &MaterialRecord) {
        self.sources.push(Attribution {
            image: rec.source_image.clone(),
            position: rec.position,
        });
        self.prominence = self.prominence.max(rec.prominence);
        if self.division.is_none() {
            self.division = rec.division().map(str::to_string);
        }
        if let Some(c) = &rec.characteristics
            && !self.descriptions.contains(c)
        {
            self.descriptions.push(c.clone());
        }
        self.description_tokens.extend(description_tokens(rec));
    }

    fn has_image(&self, image: &str) -> bool {
        self.sources.iter().any(|s| s.image == image)
    }

    fn matches(&self, type_tokens: &BTreeSet<String>, rec: &MaterialRecord) -> bool {
        if self.has_image(&rec.source_image) || type_tokens.is_empty() {
            return false;
        }
        if *type_tokens == self.type_tokens {
            return true;
        }
        jaccard(type_tokens, &self.type_tokens) >= TYPE_OVERLAP
            && jaccard(&description_tokens(rec), &self.description_tokens) >= DESCRIPTION_OVERLAP
    }

    /// Distinct images this material was seen in, in first-seen order.
    pub fn images(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for s in &self.sources {
            if !out.contains(&s.image.as_str()) {
                out.push(&s.image);
            }
        }
        out
    }
}

/// Read-only input to the generation stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsolidatedContext {
    pub brief: String,
    /// Per-image groups in input order.
    pub groups: Vec<ImageMaterials>,
    /// Cross-image aggregation for summaries.
    pub merged: Vec<MergedMaterial>,
}

impl ConsolidatedContext {
    pub fn group(&self, image: &str) -> Option<&ImageMaterials> {
        self.groups.iter().find(|g| g.image == image)
    }

    pub fn image_names(&self) -> Vec<String> {
        self.groups.iter().map(|g| g.image.clone()).collect()
    }
}

/// Build the consolidated context from vision results and the full brief.
///
/// Failed analyses contribute no group. Groups are ordered by input index
/// whatever order `analyses` arrives in.
pub fn consolidate(brief: &str, analyses: &[ImageAnalysis]) -> ConsolidatedContext {
    let mut ordered: Vec<&ImageAnalysis> = analyses.iter().collect();
    ordered.sort_by_key(|a| a.index);

    let groups: Vec<ImageMaterials> = ordered
        .into_iter()
        .filter_map(|a| {
            a.raw_reply().map(|raw| ImageMaterials {
                index: a.index,
                image: a.image.clone(),
                materials: a.materials().to_vec(),
                raw_reply: raw.to_string(),
            })
        })
        .collect();

    let mut merged: Vec<MergedMaterial> = Vec::new();
    for rec in groups.iter().flat_map(|g| g.materials.iter()) {
        let Some(material_type) = rec.material_type.as_deref() else {
            continue;
        };
        let type_tokens = tokens(material_type);
        match merged.iter_mut().find(|m| m.matches(&type_tokens, rec)) {
            Some(entry) => entry.absorb(rec),
            None => merged.push(MergedMaterial::from_record(rec, material_type)),
        }
    }

    tracing::debug!(
        groups = groups.len(),
        merged = merged.len(),
        "consolidated material records"
    );

    ConsolidatedContext {
        brief: brief.to_string(),
        groups,
        merged,
    }
}

fn tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.len() > 1 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

fn description_tokens(rec: &MaterialRecord) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for text in [&rec.characteristics, &rec.observations].into_iter().flatten() {
        out.extend(tokens(text));
    }
    out
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}
