//! Live state reconciliation for the RawCat pilot console.
//!
//! The crate keeps a local picture of a remote sailing vessel in sync with
//! the vessel's HTTP service while the operator edits the route and switches
//! steering modes:
//! - `settings`: service URL and API key, persisted and bootstrappable.
//! - `poller`: timed fetches with pause, in-flight de-duplication and an
//!   unconfigured guard.
//! - `vessel` / `route`: the two poll streams and their observable state.
//! - `steering`: route / compass / hold-line state machine.
//! - `compass`: orientation event normalization and listener lifetimes.
//! - `edit`: drag, insert and append sessions on the route.
//! - `routing`: external auto-route lookups used to extend the route.
//! - `ais`: nearby traffic from the AIS bounding-box search.
//! - `passthrough`: raw settings/data documents and the theme toggle.
//! - `console`: explicit wiring of all of the above.

pub mod ais;
pub mod compass;
pub mod console;
pub mod edit;
pub mod error;
pub mod model;
pub mod passthrough;
pub mod poller;
pub mod route;
pub mod routing;
pub mod settings;
pub mod steering;
pub mod transport;
pub mod vessel;

#[cfg(test)]
mod mock;

pub use console::{Console, ConsoleOptions, ConsolePollers};
pub use error::{EditError, SyncError};
pub use model::{Coordinate, Location, RouteState, SteeringMode, VesselSnapshot};
