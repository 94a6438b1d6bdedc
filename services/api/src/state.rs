//! Application state shared across handlers

use common::LogProvider;
use std::sync::Arc;

use crate::domain::{UsersService, VenuesService};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub logger: Arc<dyn LogProvider>,
    pub users: UsersService,
    pub venues: VenuesService,
}

impl AppState {
    pub fn new(logger: Arc<dyn LogProvider>, users: UsersService, venues: VenuesService) -> Self {
        Self {
            logger,
            users,
            venues,
        }
    }
}
