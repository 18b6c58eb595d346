//! Cola de pronósticos para desarrollo: encola pedidos, los despacha de a uno
//! al worker y recibe el acknowledge.

pub mod handlers;
pub mod lease;
pub mod state;

pub use handlers::build_router;
pub use lease::{run_lease_loop, sweep_once};
pub use state::AppState;

use std::time::Duration;

/// Cada cuánto se revisan los leases vencidos.
pub const LEASE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
