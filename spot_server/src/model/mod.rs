//! Shared state owned by the server process.
//!
//! - `live_state` holds the latest quote with its change pulse.
//! - `driver_monitor` tracks the age and error count of the scraping session and
//!   decides when it has to be replaced.

pub mod driver_monitor;
pub mod live_state;
