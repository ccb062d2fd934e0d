pub mod batch;
pub mod job;
pub mod submission;
