use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub round_duration_seconds: u64,
    pub broadcast_min_interval_ms: u64,
}

impl Config {
    pub fn new() -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .expect("Invalid PORT"),
            round_duration_seconds: env::var("ROUND_DURATION_SECONDS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .expect("Invalid ROUND_DURATION_SECONDS"),
            broadcast_min_interval_ms: env::var("BROADCAST_MIN_INTERVAL_MS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .expect("Invalid BROADCAST_MIN_INTERVAL_MS"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
