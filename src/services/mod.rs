pub mod paste_service;
pub mod scheduler;
