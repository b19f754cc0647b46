use screenlog_lib::config::AppConfig;
use screenlog_lib::logging::{self, LoggingConfig};
use tracing::error;

#[tokio::main]
async fn main() {
    if let Err(e) = logging::init(&LoggingConfig::from_env()) {
        eprintln!("screenlog: {}", e);
        std::process::exit(1);
    }

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    if let Err(e) = screenlog_lib::run(config).await {
        error!(error = %e, "screenlog exited with an error");
        std::process::exit(1);
    }
}
