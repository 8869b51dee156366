mod settings;

pub use settings::{
    OtelConfig, PoolConfig, RateLimitConfig, ReaperConfig, ServerConfig, Settings,
    TransportConfig,
};
