//! Map viewer state synchronization: bootstrapping a viewer from static
//! configuration and URL state, resolving layer capabilities, reconciling
//! server-persisted state and restarting on map changes.

pub mod api;
pub mod bootstrap;
pub mod capabilities;
pub mod config;
pub mod error;
pub mod host;
pub mod params;
pub mod reconcile;
pub mod reload;
pub mod session;
pub mod viewer;

#[cfg(test)]
mod testing;
