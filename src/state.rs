//! Shared state handed to every request handler.

use crate::services::paste_service::PasteService;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub service: PasteService,
    /// Public base URL used to build links to new pastes.
    pub site_url: String,
    /// Longest a single paste response may hold its read handle.
    pub read_timeout: Duration,
}

impl AppState {
    pub fn new(service: PasteService, site_url: impl Into<String>, read_timeout: Duration) -> Self {
        let mut site_url = site_url.into();
        while site_url.ends_with('/') {
            site_url.pop();
        }
        Self {
            service,
            site_url,
            read_timeout,
        }
    }
}
