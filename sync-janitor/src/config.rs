use envconfig::Envconfig;

use sync_common::config::{EnvMsDuration, StoreConfig};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(default = "60000")]
    pub cleanup_interval: EnvMsDuration,

    /// How far ahead of an event's start reminders go out.
    #[envconfig(default = "86400000")]
    pub reminder_lead: EnvMsDuration,

    /// How long after an event ends a follow-up may still go out.
    #[envconfig(default = "172800000")]
    pub follow_up_window: EnvMsDuration,

    /// Finished events older than this are deleted. Unset keeps everything.
    pub retention_days: Option<u32>,

    #[envconfig(nested = true)]
    pub store: StoreConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
