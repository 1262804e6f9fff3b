// Image-content classification ports and the threshold logic that turns raw
// scores into enforcement decisions.
//
// The classifiers themselves live behind the network (see the infra layer);
// this module owns what counts as a violation.

use crate::core::classify::ClassifierError;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;

/// Detections below this confidence are discarded.
pub const DETECTION_CONFIDENCE_FLOOR: f32 = 0.45;

const PORN_THRESHOLD: f32 = 0.60;
const HENTAI_THRESHOLD: f32 = 0.65;
const SEXY_THRESHOLD: f32 = 0.75;

/// Per-category probabilities from the NSFW model.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct NsfwScores {
    #[serde(default)]
    pub drawings: f32,
    #[serde(default)]
    pub hentai: f32,
    #[serde(default)]
    pub neutral: f32,
    #[serde(default)]
    pub porn: f32,
    #[serde(default)]
    pub sexy: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NsfwCategory {
    Porn,
    Hentai,
    Sexy,
}

impl NsfwCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NsfwCategory::Porn => "porn",
            NsfwCategory::Hentai => "hentai",
            NsfwCategory::Sexy => "sexy",
        }
    }
}

impl NsfwScores {
    /// First category over its threshold, in fixed priority order. The
    /// order matters: when several categories score high, the report names
    /// the most severe one.
    pub fn triggered(&self) -> Option<NsfwCategory> {
        if self.porn >= PORN_THRESHOLD {
            Some(NsfwCategory::Porn)
        } else if self.hentai >= HENTAI_THRESHOLD {
            Some(NsfwCategory::Hentai)
        } else if self.sexy >= SEXY_THRESHOLD {
            Some(NsfwCategory::Sexy)
        } else {
            None
        }
    }
}

/// Scores a still image for NSFW content.
#[async_trait]
pub trait NsfwClassifier: Send + Sync {
    async fn score(&self, image: &Path) -> Result<NsfwScores, ClassifierError>;
}

/// One labelled object found in an image.
#[derive(Debug, Clone, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
}

/// Detects labelled objects in a still image.
#[async_trait]
pub trait ObjectClassifier: Send + Sync {
    async fn detect(&self, image: &Path) -> Result<Vec<Detection>, ClassifierError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContrabandKind {
    Weapon,
    Drugs,
}

impl ContrabandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContrabandKind::Weapon => "weapon",
            ContrabandKind::Drugs => "drugs",
        }
    }
}

const WEAPON_KEYWORDS: &[&str] = &[
    "gun",
    "pistol",
    "rifle",
    "weapon",
    "firearm",
    "knife",
    "blade",
    "sword",
    "grenade",
    "bomb",
    "explosive",
    "ammunition",
    "bullet",
];

const DRUG_KEYWORDS: &[&str] = &[
    "syringe",
    "needle",
    "pill",
    "pills",
    "tablet",
    "powder",
    "cocaine",
    "drugs",
    "marijuana",
    "weed",
    "injection",
    "vial",
    "bottle",
];

/// Map raw detections onto a contraband verdict. Weapons take precedence
/// over drugs when an image contains both; sub-floor detections never
/// count.
pub fn classify_detections(detections: &[Detection]) -> Option<ContrabandKind> {
    let mut drugs = false;
    for det in detections {
        if det.confidence < DETECTION_CONFIDENCE_FLOOR {
            continue;
        }
        let label = det.label.to_lowercase();
        if WEAPON_KEYWORDS.iter().any(|w| label.contains(w)) {
            return Some(ContrabandKind::Weapon);
        }
        if DRUG_KEYWORDS.iter().any(|d| label.contains(d)) {
            drugs = true;
        }
    }
    drugs.then_some(ContrabandKind::Drugs)
}
