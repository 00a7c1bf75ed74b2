pub mod common;
pub mod memory;
pub mod s3;
