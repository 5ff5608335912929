pub mod options;
pub mod storage;
