pub mod counter_service;
pub mod file_service;
