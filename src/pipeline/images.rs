//! Image extraction stage: hand every raw image of a parsed document to the
//! content store, a few at a time.

use crate::document::ParsedDocument;
use crate::error::ConvertError;
use crate::request::SessionId;
use crate::store::{ContentStore, ExtractedImage, ImagePlacement};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Concurrent store writes per job.
const STORE_CONCURRENCY: usize = 4;

/// Images of one job, addressable by where they appear in the document.
#[derive(Debug, Clone, Default)]
pub struct StoredImages {
    by_placement: HashMap<(usize, usize), ExtractedImage>,
    /// Distinct stored images in document order.
    unique: Vec<ExtractedImage>,
    /// Images the store failed to write.
    pub dropped: usize,
}

impl StoredImages {
    pub fn insert(&mut self, page: usize, sequence: usize, image: ExtractedImage) {
        if !self.unique.iter().any(|i| i.hash == image.hash) {
            self.unique.push(image.clone());
        }
        self.by_placement.insert((page, sequence), image);
    }

    pub fn get(&self, page: usize, sequence: usize) -> Option<&ExtractedImage> {
        self.by_placement.get(&(page, sequence))
    }

    pub fn unique(&self) -> &[ExtractedImage] {
        &self.unique
    }

    pub fn into_unique(self) -> Vec<ExtractedImage> {
        self.unique
    }
}

/// Store every image of `document` under `session`.
///
/// A failed write drops that image and counts it in `dropped`, unless
/// `mandatory`, in which case the first failure is returned.
pub async fn store_images(
    store: &ContentStore,
    session: SessionId,
    document: &ParsedDocument,
    mandatory: bool,
) -> Result<StoredImages, ConvertError> {
    let work: Vec<_> = document
        .units
        .iter()
        .flat_map(|unit| {
            unit.images
                .iter()
                .map(move |raw| (unit.index, raw.sequence, raw.bytes.clone()))
        })
        .collect();

    let mut outcomes: Vec<_> = stream::iter(work)
        .map(|(page, sequence, bytes)| async move {
            let placement = ImagePlacement { page, sequence };
            (page, sequence, store.put(session, bytes, placement).await)
        })
        .buffer_unordered(STORE_CONCURRENCY)
        .collect()
        .await;
    outcomes.sort_by_key(|(page, sequence, _)| (*page, *sequence));

    let mut stored = StoredImages::default();
    let mut seen_errors = HashSet::new();
    for (page, sequence, outcome) in outcomes {
        match outcome {
            Ok(image) => stored.insert(page, sequence, image),
            Err(e) if mandatory => return Err(e),
            Err(e) => {
                if seen_errors.insert(e.to_string()) {
                    warn!("Dropping image {} on page {}: {}", sequence + 1, page + 1, e);
                }
                stored.dropped += 1;
            }
        }
    }
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ContentUnit, RawImage, UnitKind};
    use bytes::Bytes;

    fn document(images_per_page: &[&[&'static [u8]]]) -> ParsedDocument {
        let units = images_per_page
            .iter()
            .enumerate()
            .map(|(index, images)| {
                let mut unit = ContentUnit::new(index, format!("Page {}", index + 1));
                unit.images = images
                    .iter()
                    .enumerate()
                    .map(|(sequence, b)| RawImage {
                        sequence,
                        bytes: Bytes::from_static(b),
                        width: 100,
                        height: 100,
                    })
                    .collect();
                unit
            })
            .collect::<Vec<_>>();
        ParsedDocument {
            kind: UnitKind::Page,
            total_units: units.len(),
            units,
            paragraph_count: None,
            title: None,
        }
    }

    #[tokio::test]
    async fn repeated_logo_is_stored_once_but_placed_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path(), "/static");
        let doc = document(&[&[b"logo", b"chart"], &[b"logo"]]);

        let stored = store_images(&store, SessionId::new(), &doc, false).await.unwrap();
        assert_eq!(stored.unique().len(), 2);
        assert_eq!(stored.dropped, 0);
        let first = stored.get(0, 0).unwrap();
        let again = stored.get(1, 0).unwrap();
        assert_eq!(first.url, again.url);
    }

    #[tokio::test]
    async fn unwritable_root_drops_images_unless_mandatory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let store = ContentStore::new(&blocker, "/static");
        let doc = document(&[&[b"img"]]);

        let stored = store_images(&store, SessionId::new(), &doc, false).await.unwrap();
        assert_eq!(stored.dropped, 1);
        assert!(stored.get(0, 0).is_none());

        let err = store_images(&store, SessionId::new(), &doc, true)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "STORAGE_ERROR");
    }
}
