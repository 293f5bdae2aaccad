use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::document::{CollectionPath, Document};
use crate::error::TripnestError;

use super::itinerary::ITINERARIES;

pub const ACTIVITIES: &str = "activities";

/// Sub-collection holding the activities of one itinerary.
pub fn activities_collection(itinerary_id: &str) -> CollectionPath {
    CollectionPath::new(ITINERARIES)
        .child(itinerary_id)
        .collection(ACTIVITIES)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub itinerary_id: String,
    pub date: NaiveDate,
    /// Wall-clock `HH:MM`, kept as text so ordering matches the stored form.
    #[serde(default)]
    pub time: String,
    pub title: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Activity {
    pub fn from_document(itinerary_id: &str, doc: &Document) -> Result<Self, TripnestError> {
        let mut doc = doc.clone();
        if let Some(obj) = doc.data.as_object_mut() {
            obj.entry("itineraryId")
                .or_insert_with(|| serde_json::Value::String(itinerary_id.to_string()));
        }
        doc.decode::<Self>().map_err(|e| {
            tracing::warn!(id = %doc.id, error = %e, "Rejecting malformed activity document");
            TripnestError::NotFound(format!("activity {}", doc.id))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewActivity {
    pub date: NaiveDate,
    #[serde(default)]
    pub time: String,
    pub title: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewActivity {
    pub fn validate(&self) -> Result<(), TripnestError> {
        if self.title.trim().is_empty() {
            return Err(TripnestError::Validation("activity title is required".to_string()));
        }
        Ok(())
    }

    pub fn to_document_data(&self, itinerary_id: &str) -> serde_json::Value {
        serde_json::json!({
            "itineraryId": itinerary_id,
            "date": self.date,
            "time": self.time,
            "title": self.title.trim(),
            "location": self.location,
            "notes": self.notes,
        })
    }
}

/// Group activities by day, keeping the incoming (date, time) order inside each day.
pub fn group_by_date(activities: &[Activity]) -> BTreeMap<NaiveDate, Vec<Activity>> {
    let mut grouped: BTreeMap<NaiveDate, Vec<Activity>> = BTreeMap::new();
    for activity in activities {
        grouped.entry(activity.date).or_default().push(activity.clone());
    }
    grouped
}
