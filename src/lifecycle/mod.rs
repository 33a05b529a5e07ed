pub mod plan;
pub mod store;
