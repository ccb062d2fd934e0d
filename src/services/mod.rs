pub mod fetcher;
pub mod job_store;
pub mod parser;
pub mod retry;
pub mod storage;
pub mod transformer;
