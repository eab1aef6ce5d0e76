pub mod courier;
pub mod delivery;
pub mod event;
pub mod geofence;
pub mod order;
pub mod restaurant;
pub mod restaurant_assignment;
