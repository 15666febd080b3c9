use rand::seq::SliceRandom;

use crate::catalog::CardImage;
use crate::error::ServiceError;
use crate::store::models::CardDocument;

/// Reduce a catalog pool to images with distinct ids, keeping first
/// occurrences in order.
pub(crate) fn distinct_images(pool: &[CardImage]) -> Vec<CardImage> {
    let mut seen = std::collections::HashSet::new();
    pool.iter()
        .filter(|image| seen.insert(image.id.clone()))
        .cloned()
        .collect()
}

/// Lay out a fresh shuffled board of `pairs` pairs from the catalog pool.
///
/// Draws `pairs` distinct images at random, emits two face-down cards per
/// image keyed by the image id, and shuffles the whole board. Fails with
/// [`ServiceError::CatalogExhausted`] when the pool cannot cover the board.
pub fn build_deck(pool: &[CardImage], pairs: usize) -> Result<Vec<CardDocument>, ServiceError> {
    let mut distinct = distinct_images(pool);
    if distinct.len() < pairs {
        return Err(ServiceError::CatalogExhausted {
            needed: pairs,
            available: distinct.len(),
        });
    }

    let mut rng = rand::rng();
    distinct.shuffle(&mut rng);
    distinct.truncate(pairs);

    let mut cards: Vec<CardDocument> = distinct
        .into_iter()
        .flat_map(|image| {
            let card = CardDocument {
                pair_key: image.id,
                image: image.content,
                revealed: false,
                matched: false,
            };
            [card.clone(), card]
        })
        .collect();
    cards.shuffle(&mut rng);

    Ok(cards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn pool(n: usize) -> Vec<CardImage> {
        (0..n)
            .map(|i| CardImage {
                id: format!("img-{i}"),
                content: format!("content-{i}"),
            })
            .collect()
    }

    #[test]
    fn deck_holds_each_chosen_pair_exactly_twice_face_down() {
        let deck = build_deck(&pool(10), 4).unwrap();
        assert_eq!(deck.len(), 8);

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for card in &deck {
            assert!(!card.revealed);
            assert!(!card.matched);
            *counts.entry(card.pair_key.as_str()).or_default() += 1;
        }
        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|&count| count == 2));
    }

    #[test]
    fn short_catalog_is_a_hard_failure() {
        let err = build_deck(&pool(3), 4).unwrap_err();
        match err {
            ServiceError::CatalogExhausted { needed, available } => {
                assert_eq!((needed, available), (4, 3));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn duplicate_catalog_entries_count_once() {
        let mut images = pool(3);
        images.extend(pool(3));
        assert_eq!(distinct_images(&images).len(), 3);
        assert!(build_deck(&images, 4).is_err());
        assert!(build_deck(&images, 3).is_ok());
    }
}
