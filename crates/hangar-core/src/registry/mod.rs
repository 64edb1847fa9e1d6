//! Registry module: the App store and its JSON snapshot.

mod memory;
pub mod snapshot;

pub use memory::AppRegistry;
