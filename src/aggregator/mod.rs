pub mod completion;
pub mod engine;
pub mod merge;
pub mod store;
