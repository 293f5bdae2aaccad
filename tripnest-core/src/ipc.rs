use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, TripnestError};
use crate::models::{Credentials, NewActivity, NewItinerary, WishlistEntry};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A write against a remote collaborator. Each variant invalidates a fixed
/// set of cache keys once it succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mutation {
    CreateItinerary {
        itinerary: NewItinerary,
    },
    UpdateItinerary {
        id: String,
        itinerary: NewItinerary,
    },
    ToggleFavorite {
        id: String,
        is_favorite: bool,
    },
    DeleteItinerary {
        id: String,
    },
    AddActivity {
        itinerary_id: String,
        activity: NewActivity,
    },
    AddToWishlist {
        photo_id: String,
    },
    RemoveFromWishlist {
        entry: WishlistEntry,
    },
    ToggleWishlist {
        photo_id: String,
    },
    SignIn {
        credentials: Credentials,
    },
    SignUp {
        credentials: Credentials,
        #[serde(default)]
        display_name: Option<String>,
    },
    SignOut,
    LoadMorePhotos,
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::CreateItinerary { .. } => "create_itinerary",
            Mutation::UpdateItinerary { .. } => "update_itinerary",
            Mutation::ToggleFavorite { .. } => "toggle_favorite",
            Mutation::DeleteItinerary { .. } => "delete_itinerary",
            Mutation::AddActivity { .. } => "add_activity",
            Mutation::AddToWishlist { .. } => "add_to_wishlist",
            Mutation::RemoveFromWishlist { .. } => "remove_from_wishlist",
            Mutation::ToggleWishlist { .. } => "toggle_wishlist",
            Mutation::SignIn { .. } => "sign_in",
            Mutation::SignUp { .. } => "sign_up",
            Mutation::SignOut => "sign_out",
            Mutation::LoadMorePhotos => "load_more_photos",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TripnestRequest {
    Ping,
    Health,
    /// Settled snapshot of a cache entry (subscribes, waits, then detaches).
    Get {
        key: String,
    },
    /// Stream every state change of a cache entry until the client disconnects.
    Watch {
        key: String,
    },
    Refetch {
        key: String,
    },
    Invoke {
        mutation: Mutation,
    },
    Itineraries {
        #[serde(default)]
        search: Option<String>,
        #[serde(default)]
        filter: Option<String>,
    },
    ItineraryDetail {
        id: String,
    },
    Wishlist,
    Discover,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TripnestResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    #[serde(default)]
    pub error_kind: Option<ErrorKind>,
    pub version: String,
}

impl TripnestResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            error_kind: None,
            version: VERSION.to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            error_kind: Some(ErrorKind::Internal),
            version: VERSION.to_string(),
        }
    }

    pub fn from_error(e: &TripnestError) -> Self {
        let info = e.info();
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(info.message),
            error_kind: Some(info.kind),
            version: VERSION.to_string(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}
