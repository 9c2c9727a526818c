pub mod analysis;
pub mod completion;
