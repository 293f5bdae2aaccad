pub mod cache;
pub mod discover;
pub mod fetcher;
pub mod itineraries;
pub mod keys;
pub mod mutator;
pub mod session;
pub mod wishlist;
