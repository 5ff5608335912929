pub mod archive;
pub mod constraints;
pub mod download;
pub mod error;
pub mod intake;
pub mod migrator;
pub mod options;
pub mod pipeline;
pub mod sandbox;
pub mod scheduler;
pub mod support_files;
pub mod worker;
