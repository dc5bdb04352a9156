//! Recording side-path: packets copied from the feed are drained into an
//! external encoder process.

pub mod buffer;
pub mod controls;
pub mod coordinator;
pub mod encoder;
pub mod state;
pub mod writer;
