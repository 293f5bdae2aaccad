//! Resource keys
//!
//! A key is a resource-type tag plus ordered parameters, written `tag/param/...`.
//! Keys compare structurally, so `itineraries/u1` built twice is the same entry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tripnest_core::TripnestError;

pub const USER: &str = "user";
pub const ITINERARIES: &str = "itineraries";
pub const ITINERARY: &str = "itinerary";
pub const ACTIVITIES: &str = "activities";
pub const WISHLIST: &str = "wishlist";
pub const DISCOVER_PHOTOS: &str = "discover-photos";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    tag: String,
    params: Vec<String>,
}

impl ResourceKey {
    pub fn new(tag: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            tag: tag.into(),
            params,
        }
    }

    pub fn user() -> Self {
        Self::new(USER, vec![])
    }

    pub fn itineraries(uid: &str) -> Self {
        Self::new(ITINERARIES, vec![uid.to_string()])
    }

    pub fn itinerary(id: &str) -> Self {
        Self::new(ITINERARY, vec![id.to_string()])
    }

    pub fn activities(itinerary_id: &str) -> Self {
        Self::new(ACTIVITIES, vec![itinerary_id.to_string()])
    }

    pub fn wishlist(uid: &str) -> Self {
        Self::new(WISHLIST, vec![uid.to_string()])
    }

    pub fn discover_photos() -> Self {
        Self::new(DISCOVER_PHOTOS, vec![])
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn param(&self, idx: usize) -> Option<&str> {
        self.params.get(idx).map(String::as_str)
    }

    /// Owning user id for keys scoped to one user.
    pub fn owner(&self) -> Option<&str> {
        match self.tag.as_str() {
            ITINERARIES | WISHLIST => self.param(0),
            _ => None,
        }
    }

    /// True when a fetcher exists for the tag.
    pub fn is_known(&self) -> bool {
        matches!(
            self.tag.as_str(),
            USER | ITINERARIES | ITINERARY | ACTIVITIES | WISHLIST | DISCOVER_PHOTOS
        )
    }

    /// True for every key whose data belongs to the signed-in user.
    pub fn is_user_scoped(&self) -> bool {
        matches!(
            self.tag.as_str(),
            USER | ITINERARIES | ITINERARY | ACTIVITIES | WISHLIST
        )
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag)?;
        for p in &self.params {
            write!(f, "/{}", p)?;
        }
        Ok(())
    }
}

impl FromStr for ResourceKey {
    type Err = TripnestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim_matches('/').split('/');
        let tag = parts.next().unwrap_or("").trim();
        if tag.is_empty() {
            return Err(TripnestError::Validation("empty resource key".to_string()));
        }
        let params: Vec<String> = parts.map(str::to_string).collect();
        if params.iter().any(|p| p.is_empty()) {
            return Err(TripnestError::Validation(format!(
                "resource key has an empty segment: {}",
                s
            )));
        }

        let expected = match tag {
            USER | DISCOVER_PHOTOS => Some(0),
            ITINERARIES | ITINERARY | ACTIVITIES | WISHLIST => Some(1),
            _ => None,
        };
        if let Some(n) = expected {
            if params.len() != n {
                return Err(TripnestError::Validation(format!(
                    "resource key {} takes {} parameter(s)",
                    tag, n
                )));
            }
        }
        Ok(Self::new(tag, params))
    }
}

impl Serialize for ResourceKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Selects cache entries for invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    Exact(ResourceKey),
    /// Every key with this tag, whatever its parameters.
    Tag(&'static str),
    /// Every key holding the signed-in user's data.
    UserScoped,
}

impl KeyPattern {
    pub fn matches(&self, key: &ResourceKey) -> bool {
        match self {
            KeyPattern::Exact(k) => k == key,
            KeyPattern::Tag(tag) => key.tag() == *tag,
            KeyPattern::UserScoped => key.is_user_scoped(),
        }
    }
}
