use envconfig::Envconfig;

use sync_common::config::{EnvMsDuration, FetchConfig, StoreConfig};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3301")]
    pub port: u16,

    #[envconfig(default = "900000")]
    pub sync_interval: EnvMsDuration,

    #[envconfig(default = "600000")]
    pub sync_timeout: EnvMsDuration,

    #[envconfig(nested = true)]
    pub store: StoreConfig,

    #[envconfig(nested = true)]
    pub fetch: FetchConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
