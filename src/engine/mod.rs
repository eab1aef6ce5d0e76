pub mod arbiter;
pub mod broadcast;
pub mod candidates;
pub mod delivery;
pub mod expiry;
pub mod geofence;
pub mod preparation;

#[cfg(test)]
mod test_support;
