use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::TripnestError;

use super::photo::{Category, DiscoveryPhoto};

pub const WISHLISTS: &str = "wishlists";
pub const WISHLIST_FIELD: &str = "photos";

const DEFAULT_TITLE: &str = "A beautiful destination";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WishlistEntry {
    pub id: String,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
}

impl WishlistEntry {
    pub fn from_photo(photo: &DiscoveryPhoto) -> Self {
        let title = photo
            .location
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_TITLE)
            .to_string();
        let description = photo
            .description
            .clone()
            .or_else(|| photo.alt_description.clone())
            .unwrap_or_default();
        let category = photo.category.unwrap_or(Category::General).to_string();

        Self {
            id: photo.id.clone(),
            url: photo.url.clone(),
            title,
            description,
            category,
        }
    }
}

/// One user's wishlist. Entries are unique by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wishlist {
    pub photos: Vec<WishlistEntry>,
}

impl Wishlist {
    pub fn from_document(doc: &Document) -> Result<Self, TripnestError> {
        serde_json::from_value(doc.data.clone()).map_err(|e| {
            tracing::warn!(id = %doc.id, error = %e, "Rejecting malformed wishlist document");
            TripnestError::NotFound(format!("wishlist {}", doc.id))
        })
    }

    pub fn find(&self, id: &str) -> Option<&WishlistEntry> {
        self.photos.iter().find(|e| e.id == id)
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    /// Set-union by id. Returns `false` when an entry with the same id is already present.
    pub fn add(&mut self, entry: WishlistEntry) -> bool {
        if self.contains_id(&entry.id) {
            return false;
        }
        self.photos.push(entry);
        true
    }

    /// Removes entries equal to `entry` in every field. Absent entries are a no-op.
    pub fn remove(&mut self, entry: &WishlistEntry) -> bool {
        let before = self.photos.len();
        self.photos.retain(|e| e != entry);
        self.photos.len() != before
    }

    pub fn len(&self) -> usize {
        self.photos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.photos.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, description: &str) -> WishlistEntry {
        WishlistEntry {
            id: id.to_string(),
            url: format!("https://img/{}", id),
            title: "Somewhere".to_string(),
            description: description.to_string(),
            category: "General".to_string(),
        }
    }

    #[test]
    fn test_add_is_idempotent_by_id() {
        let mut list = Wishlist::default();
        assert!(list.add(entry("a", "one")));
        assert!(!list.add(entry("a", "a different description")));
        assert_eq!(list.len(), 1);
        assert_eq!(list.photos[0].description, "one");
    }

    #[test]
    fn test_remove_requires_exact_value() {
        let mut list = Wishlist::default();
        list.add(entry("a", "one"));

        assert!(!list.remove(&entry("a", "drifted")));
        assert_eq!(list.len(), 1);

        assert!(list.remove(&entry("a", "one")));
        assert!(list.is_empty());

        assert!(!list.remove(&entry("missing", "")));
    }

    #[test]
    fn test_entry_from_photo_defaults() {
        let photo = DiscoveryPhoto {
            id: "p".to_string(),
            url: "https://img/p".to_string(),
            alt_description: Some("a beach".to_string()),
            location: None,
            description: None,
            category: None,
        };
        let e = WishlistEntry::from_photo(&photo);
        assert_eq!(e.title, "A beautiful destination");
        assert_eq!(e.description, "a beach");
        assert_eq!(e.category, "General");
    }
}
