//! Map state model shared by the viewer and the persisted-state server:
//! the fragment codec, server-record normalization and the layer merger.

pub mod codec;
pub mod merge;
pub mod models;
mod record;
