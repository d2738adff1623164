// search-core/src/context.rs
//! Daemon-wide state shared by every request handler

use std::sync::Arc;

use crate::driver::QueryDriver;
use crate::name_index::NameIndex;
use crate::shutdown::Shutdown;

/// Built once at startup and handed to each handler on creation.
#[derive(Clone)]
pub struct DaemonContext {
    pub driver: Arc<QueryDriver>,
    pub shutdown: Arc<Shutdown>,
    pub name_index: Arc<NameIndex>,
}

impl DaemonContext {
    pub fn new(driver: Arc<QueryDriver>, shutdown: Arc<Shutdown>, name_index: Arc<NameIndex>) -> Self {
        Self {
            driver,
            shutdown,
            name_index,
        }
    }
}
