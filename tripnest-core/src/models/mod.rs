pub mod activity;
pub mod itinerary;
pub mod photo;
pub mod user;
pub mod wishlist;

pub use activity::{group_by_date, Activity, NewActivity};
pub use itinerary::{Itinerary, ItineraryFilter, NewItinerary, TripType, TypeFilter};
pub use photo::{Category, DiscoveryPhoto};
pub use user::{Credentials, UserIdentity};
pub use wishlist::{Wishlist, WishlistEntry};
