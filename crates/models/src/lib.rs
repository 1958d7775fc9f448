mod intent;
mod pool;
mod quote;
mod provider;
mod execution;
mod error;

pub use intent::*;
pub use pool::*;
pub use quote::*;
pub use provider::*;
pub use execution::*;
pub use error::*;
