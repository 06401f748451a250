pub mod repos;
pub(crate) mod rows;
pub mod schema;
pub mod store;

pub use store::Store;
