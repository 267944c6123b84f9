use envconfig::Envconfig;

use sync_common::config::{FetchConfig, NonEmptyString, StoreConfig};

#[derive(Envconfig)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3300")]
    pub port: u16,

    /// Shared secret upstream sites sign webhook bodies with.
    pub webhook_secret: Option<NonEmptyString>,

    #[envconfig(default = "false")]
    pub webhook_require_signature: bool,

    #[envconfig(default = "5000000")]
    pub max_body_size: usize,

    #[envconfig(default = "100")]
    pub concurrency_limit: usize,

    #[envconfig(nested = true)]
    pub store: StoreConfig,

    #[envconfig(nested = true)]
    pub fetch: FetchConfig,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
