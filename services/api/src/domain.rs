//! Business rules of the service
//!
//! Services depend on ports only: the users repository, the cache, the REST
//! client and the logger are all injected as trait objects.

pub mod users;
pub mod venues;

pub use users::{UpsertUser, User, UsersRepo, UsersService};
pub use venues::{FoursquareConfig, LabeledLatLng, Location, Venue, VenuesService};
