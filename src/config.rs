use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub port: u16,
    pub node_env: String,

    // Upstream API
    pub api_url: String,
    pub api_referer: String,
    pub content_mirror: String,

    // Timeouts (per call)
    pub graphql_timeout_ms: u64,
    pub clock_timeout_ms: u64,
    pub manifest_timeout_ms: u64,
    pub proxy_timeout_ms: u64,
    pub segment_timeout_ms: u64,

    // Source cache
    pub source_cache_ttl_ms: i64,
    pub source_cache_max_entries: usize,
    pub cache_purge_interval_secs: u64,

    // Misc
    pub user_agent: String,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            // Server
            port: env::var("PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .unwrap_or(3001),
            node_env: env::var("NODE_ENV").unwrap_or_else(|_| "development".to_string()),

            // Upstream API
            api_url: env::var("API_URL")
                .unwrap_or_else(|_| "https://api.allanime.day/api".to_string()),
            api_referer: env::var("API_REFERER")
                .unwrap_or_else(|_| "https://allanime.to".to_string()),
            content_mirror: env::var("CONTENT_MIRROR")
                .unwrap_or_else(|_| "https://allanime.day".to_string()),

            // Timeouts
            graphql_timeout_ms: env::var("GRAPHQL_TIMEOUT_MS")
                .unwrap_or_else(|_| "12000".to_string())
                .parse()
                .unwrap_or(12_000), // 12 seconds

            clock_timeout_ms: env::var("CLOCK_TIMEOUT_MS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .unwrap_or(10_000), // 10 seconds

            manifest_timeout_ms: env::var("MANIFEST_TIMEOUT_MS")
                .unwrap_or_else(|_| "15000".to_string())
                .parse()
                .unwrap_or(15_000), // 15 seconds

            proxy_timeout_ms: env::var("PROXY_TIMEOUT_MS")
                .unwrap_or_else(|_| "60000".to_string())
                .parse()
                .unwrap_or(60_000), // 60 seconds

            segment_timeout_ms: env::var("SEGMENT_TIMEOUT_MS")
                .unwrap_or_else(|_| "60000".to_string())
                .parse()
                .unwrap_or(60_000), // 60 seconds

            // Source cache - short TTL because upstream signed URLs expire
            source_cache_ttl_ms: env::var("SOURCE_CACHE_TTL_MS")
                .unwrap_or_else(|_| "300000".to_string())
                .parse()
                .unwrap_or(300_000), // 5 minutes

            source_cache_max_entries: env::var("SOURCE_CACHE_MAX_ENTRIES")
                .unwrap_or_else(|_| "512".to_string())
                .parse()
                .unwrap_or(512),

            cache_purge_interval_secs: env::var("CACHE_PURGE_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),

            // Misc - browser user agent; some CDNs reject unknown clients
            user_agent: env::var("USER_AGENT").unwrap_or_else(|_| {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                    .to_string()
            }),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
