pub mod health_handlers;
pub mod paste_handlers;
