mod audit;
mod runs;
mod store;
mod workflows;

pub use store::SqliteStore;
