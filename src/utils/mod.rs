// Utility functions

pub mod deadline;
pub mod logger;
pub mod retry;

pub use deadline::*;
pub use logger::*;
pub use retry::*;
