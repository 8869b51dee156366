use std::sync::Arc;

use crate::config::Settings;
use crate::pool::ConnectionPool;
use crate::transport::ChannelTransport;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub pool: Arc<ConnectionPool>,
    pub transport: Arc<ChannelTransport>,
}

impl AppState {
    /// Build the pool over an in-process channel transport
    pub fn new(settings: Settings) -> Self {
        let transport = Arc::new(ChannelTransport::new(settings.transport));
        let pool = Arc::new(ConnectionPool::new(&settings, transport.clone()));

        Self {
            settings: Arc::new(settings),
            pool,
            transport,
        }
    }
}
