//! The `relay_` namespace.

mod relay;
pub use relay::{Relay, RelayApiClient, RelayApiServer};
