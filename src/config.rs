use clap::Parser;
use uuid::Uuid;

/// Copilot Gateway
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Server host address
    #[arg(short = 'H', long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Server port
    #[arg(short, long, env = "PORT", default_value = "4000")]
    pub port: u16,

    /// Access token clients must present; generated when unset
    #[arg(short = 'k', long, env = "API_KEY")]
    pub api_key: Option<String>,

    /// GitHub OAuth token; overrides the github-copilot config file lookup
    #[arg(long, env = "COPILOT_OAUTH_TOKEN")]
    pub oauth_token: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Client authentication
    pub api_key: String,
    pub api_key_generated: bool,

    // Copilot credentials
    pub oauth_token: Option<String>,

    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Self {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_args(CliArgs::parse())
    }

    fn from_args(args: CliArgs) -> Self {
        let (api_key, api_key_generated) = match args.api_key.filter(|k| !k.is_empty()) {
            Some(key) => (key, false),
            None => (generate_access_token(), true),
        };

        Config {
            server_host: args.host,
            server_port: args.port,
            api_key,
            api_key_generated,
            oauth_token: args.oauth_token,
            log_level: args.log_level,
        }
    }
}

/// Generates a random access token for clients of this proxy.
fn generate_access_token() -> String {
    format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}
