//! Card image catalog, an external collaborator.
//!
//! The engine only needs a pool of distinct images to lay boards out of;
//! where they come from (bundled assets, a CDN, user uploads) is the host
//! application's business.

use futures::future::BoxFuture;
use thiserror::Error;

/// One image the board can use for a pair of cards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardImage {
    /// Stable identifier, used as the pair key.
    pub id: String,
    /// Opaque handle to the image content.
    pub content: String,
}

/// Error raised by catalog implementations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog could not be reached or read.
    #[error("card image catalog unavailable: {0}")]
    Unavailable(String),
}

/// Source of card images.
pub trait CardImageCatalog: Send + Sync {
    /// Fetch the full image pool.
    fn all_images(&self) -> BoxFuture<'static, Result<Vec<CardImage>, CatalogError>>;
}

/// Catalog backed by a fixed, in-memory image list.
#[derive(Debug, Clone, Default)]
pub struct StaticImageCatalog {
    images: Vec<CardImage>,
}

impl StaticImageCatalog {
    /// Build a catalog from the given images.
    pub fn new(images: Vec<CardImage>) -> Self {
        Self { images }
    }

    /// Convenience constructor for plain id/content pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(id, content)| CardImage {
                    id: id.into(),
                    content: content.into(),
                })
                .collect(),
        )
    }
}

impl CardImageCatalog for StaticImageCatalog {
    fn all_images(&self) -> BoxFuture<'static, Result<Vec<CardImage>, CatalogError>> {
        let images = self.images.clone();
        Box::pin(async move { Ok(images) })
    }
}
