pub mod schema;
pub mod table;

pub use schema::*;
pub use table::*;
