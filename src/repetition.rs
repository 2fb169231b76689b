//! Header/footer detection across the leading pages of a document.
//!
//! A block lies in the header band when its whole region sits within the top
//! `band_fraction` of the page, and in the footer band when it sits within
//! the bottom `band_fraction`. Any signature found in the same band on at
//! least `min_repetitions` distinct sampled pages is reported; the
//! resulting [`SuppressionSet`] is passed to the parser so it can skip
//! matching content on every page.

use crate::document::{LayoutContent, PageLayout, Region};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Margin band of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Header,
    Footer,
}

impl Band {
    /// The band `region` lies entirely within, if any.
    pub fn classify(region: Region, band_fraction: f32) -> Option<Self> {
        if region.bottom <= band_fraction {
            Some(Self::Header)
        } else if region.top >= 1.0 - band_fraction {
            Some(Self::Footer)
        } else {
            None
        }
    }
}

/// Identity of a repeated block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Signature {
    /// Trimmed, whitespace-collapsed text.
    Text(String),
    /// SHA-256 hex of image bytes.
    Image(String),
}

impl Signature {
    /// Text signature, or `None` for blank text.
    pub fn text(raw: &str) -> Option<Self> {
        let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        (!collapsed.is_empty()).then_some(Self::Text(collapsed))
    }

    pub fn of(content: &LayoutContent) -> Option<Self> {
        match content {
            LayoutContent::Text(t) => Self::text(t),
            LayoutContent::Image { hash } => Some(Self::Image(hash.clone())),
        }
    }
}

/// A signature that repeats in one band across sampled pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepeatedContentCandidate {
    pub signature: Signature,
    pub band: Band,
    pub occurrences: usize,
    pub pages: Vec<usize>,
}

/// Signatures to drop while parsing, per band.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuppressionSet {
    header: HashSet<Signature>,
    footer: HashSet<Signature>,
}

impl SuppressionSet {
    pub fn from_candidates(candidates: &[RepeatedContentCandidate]) -> Self {
        let mut set = Self::default();
        for c in candidates {
            set.insert(c.band, c.signature.clone());
        }
        set
    }

    pub fn insert(&mut self, band: Band, signature: Signature) {
        match band {
            Band::Header => self.header.insert(signature),
            Band::Footer => self.footer.insert(signature),
        };
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_empty() && self.footer.is_empty()
    }

    pub fn len(&self) -> usize {
        self.header.len() + self.footer.len()
    }

    pub fn suppresses(&self, band: Band, signature: &Signature) -> bool {
        match band {
            Band::Header => self.header.contains(signature),
            Band::Footer => self.footer.contains(signature),
        }
    }

    /// True when text with this content in this band should be dropped.
    pub fn suppresses_text(&self, band: Band, text: &str) -> bool {
        Signature::text(text).is_some_and(|sig| self.suppresses(band, &sig))
    }

    /// True when `text` matches a suppressed signature of either band.
    pub fn matches_any_text(&self, text: &str) -> bool {
        Signature::text(text)
            .is_some_and(|sig| self.header.contains(&sig) || self.footer.contains(&sig))
    }

    /// True when the image hash is suppressed in either band.
    pub fn matches_any_image(&self, hash: &str) -> bool {
        let sig = Signature::Image(hash.to_string());
        self.header.contains(&sig) || self.footer.contains(&sig)
    }
}

/// Finds header/footer content repeated across a leading page sample.
#[derive(Debug, Clone, Copy)]
pub struct RepetitionDetector {
    pub band_fraction: f32,
    pub sample_pages: usize,
    pub min_repetitions: usize,
}

impl Default for RepetitionDetector {
    fn default() -> Self {
        Self {
            band_fraction: 0.15,
            sample_pages: 5,
            min_repetitions: 2,
        }
    }
}

impl RepetitionDetector {
    /// Candidates sorted by band then signature.
    pub fn detect(&self, pages: &[PageLayout]) -> Vec<RepeatedContentCandidate> {
        let mut seen: HashMap<(Band, Signature), BTreeSet<usize>> = HashMap::new();

        for page in pages.iter().take(self.sample_pages) {
            for block in &page.blocks {
                let Some(band) = Band::classify(block.region, self.band_fraction) else {
                    continue;
                };
                let Some(signature) = Signature::of(&block.content) else {
                    continue;
                };
                seen.entry((band, signature)).or_default().insert(page.index);
            }
        }

        let mut candidates: Vec<RepeatedContentCandidate> = seen
            .into_iter()
            .filter(|(_, pages)| pages.len() >= self.min_repetitions)
            .map(|((band, signature), pages)| RepeatedContentCandidate {
                signature,
                band,
                occurrences: pages.len(),
                pages: pages.into_iter().collect(),
            })
            .collect();
        candidates.sort_by(|a, b| (a.band, &a.signature).cmp(&(b.band, &b.signature)));

        debug!(
            "Repetition detector: {} candidate(s) over {} sampled page(s)",
            candidates.len(),
            pages.len().min(self.sample_pages)
        );
        candidates
    }
}
