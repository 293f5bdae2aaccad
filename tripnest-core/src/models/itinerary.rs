use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::document::Document;
use crate::error::TripnestError;

pub const ITINERARIES: &str = "itineraries";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TripType {
    Adventure,
    Leisure,
    Work,
}

impl fmt::Display for TripType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TripType::Adventure => "adventure",
            TripType::Leisure => "leisure",
            TripType::Work => "work",
        };
        f.write_str(s)
    }
}

impl FromStr for TripType {
    type Err = TripnestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adventure" => Ok(TripType::Adventure),
            "leisure" => Ok(TripType::Leisure),
            "work" => Ok(TripType::Work),
            other => Err(TripnestError::Validation(format!("unknown trip type '{}'", other))),
        }
    }
}

/// Documents written before a type was picked carry `""`.
fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<TripType>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Itinerary {
    pub id: String,
    pub title: String,
    pub destination: String,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(rename = "type", default, deserialize_with = "empty_as_none")]
    pub trip_type: Option<TripType>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(rename = "userId")]
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

impl Itinerary {
    /// Decode a stored document. Malformed documents are reported as missing.
    pub fn from_document(doc: &Document) -> Result<Self, TripnestError> {
        doc.decode::<Self>().map_err(|e| {
            tracing::warn!(id = %doc.id, error = %e, "Rejecting malformed itinerary document");
            TripnestError::NotFound(format!("itinerary {}", doc.id))
        })
    }
}

/// Input for the create-itinerary mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItinerary {
    pub title: String,
    pub destination: String,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(rename = "type", default)]
    pub trip_type: Option<TripType>,
    #[serde(default)]
    pub notes: String,
    /// Local path of a cover photo to upload before the document is written.
    #[serde(default)]
    pub image_path: Option<String>,
}

impl NewItinerary {
    pub fn validate(&self) -> Result<(), TripnestError> {
        if self.title.trim().is_empty() {
            return Err(TripnestError::Validation("title is required".to_string()));
        }
        if self.destination.trim().is_empty() {
            return Err(TripnestError::Validation("destination is required".to_string()));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                return Err(TripnestError::Validation(
                    "end date must not precede start date".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Document body for a freshly created itinerary.
    pub fn to_document_data(
        &self,
        owner_id: &str,
        image_url: &str,
        created_at: DateTime<Utc>,
    ) -> serde_json::Value {
        serde_json::json!({
            "title": self.title.trim(),
            "destination": self.destination.trim(),
            "startDate": self.start_date,
            "endDate": self.end_date,
            "type": self.trip_type.map(|t| t.to_string()).unwrap_or_default(),
            "notes": self.notes,
            "userId": owner_id,
            "createdAt": created_at,
            "isFavorite": false,
            "imageUrl": image_url,
        })
    }

    /// Editable fields for a partial update. Ownership, creation time and the
    /// favorite flag are never touched; the cover is replaced only when a new
    /// one was uploaded.
    pub fn to_update_fields(&self, image_url: Option<&str>) -> serde_json::Map<String, serde_json::Value> {
        let mut fields = serde_json::Map::new();
        fields.insert("title".to_string(), self.title.trim().into());
        fields.insert("destination".to_string(), self.destination.trim().into());
        fields.insert("startDate".to_string(), serde_json::json!(self.start_date));
        fields.insert("endDate".to_string(), serde_json::json!(self.end_date));
        fields.insert(
            "type".to_string(),
            self.trip_type.map(|t| t.to_string()).unwrap_or_default().into(),
        );
        fields.insert("notes".to_string(), self.notes.clone().into());
        if let Some(url) = image_url {
            fields.insert("imageUrl".to_string(), url.into());
        }
        fields
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "filter", content = "type")]
pub enum TypeFilter {
    #[default]
    All,
    Favorites,
    Type(TripType),
}

impl FromStr for TypeFilter {
    type Err = TripnestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(TypeFilter::All),
            "favorites" => Ok(TypeFilter::Favorites),
            other => other.parse().map(TypeFilter::Type),
        }
    }
}

/// Dashboard search box plus type dropdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItineraryFilter {
    pub search: String,
    pub type_filter: TypeFilter,
}

impl ItineraryFilter {
    pub fn new(search: impl Into<String>, type_filter: TypeFilter) -> Self {
        Self {
            search: search.into(),
            type_filter,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.search.is_empty() || self.type_filter != TypeFilter::All
    }

    pub fn matches(&self, itinerary: &Itinerary) -> bool {
        let needle = self.search.to_lowercase();
        let matches_search = itinerary.destination.to_lowercase().contains(&needle);
        let matches_type = match self.type_filter {
            TypeFilter::All => true,
            TypeFilter::Favorites => itinerary.is_favorite,
            TypeFilter::Type(t) => itinerary.trip_type == Some(t),
        };
        matches_search && matches_type
    }

    pub fn apply(&self, itineraries: &[Itinerary]) -> Vec<Itinerary> {
        itineraries
            .iter()
            .filter(|it| self.matches(it))
            .cloned()
            .collect()
    }
}
