// Listing pipeline: title processing and catalog storage

pub mod processing;
pub mod storage;
