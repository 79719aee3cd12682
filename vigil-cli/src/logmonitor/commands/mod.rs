pub mod admin;
pub mod batch;
pub mod daemon;
pub mod status;
pub mod tail;
pub mod write;
