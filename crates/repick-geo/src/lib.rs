//! Geodesy, 1-D travel times, and station metadata for the repick engine.
//!
//! # Modules
//!
//! - [`geodesy`] -- Spherical and WGS84 distance/azimuth computations.
//! - [`velocity`] -- Radially symmetric P velocity models (`iasp91`,
//!   `ak135`).
//! - [`traveltime`] -- Ray-traced first-arrival travel times and the
//!   [`TravelTimeSource`] seam used by association and relocation.
//! - [`inventory`] -- Station inventory, [`StationIndex`], and per-group
//!   component listing.
//! - [`error`] -- [`GeoError`].
//!
//! [`TravelTimeSource`]: traveltime::TravelTimeSource
//! [`StationIndex`]: inventory::StationIndex
//! [`GeoError`]: error::GeoError

pub mod error;
pub mod geodesy;
pub mod inventory;
pub mod traveltime;
pub mod velocity;

pub use error::GeoError;
pub use geodesy::{DistAz, KM_PER_DEGREE, delazi, delazi_wgs84, destination};
pub use inventory::{Inventory, Station, StationIndex};
pub use traveltime::{PhaseArrival, TravelTimeSource, TravelTimeTable, travel_times};
pub use velocity::{EARTH_RADIUS_KM, VelocityModel};
