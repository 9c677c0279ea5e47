pub mod clock;
pub mod loader;
pub mod pipeline;
pub mod store; // Relational store adapters
pub mod transform;

pub use clock::*;
pub use loader::*;
pub use pipeline::*;
pub use store::{connect, RelationalStore};
pub use transform::*;
