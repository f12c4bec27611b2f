//! List models command

use std::path::PathBuf;

use anyhow::Result;

use crate::config::RunnerConfig;
use crate::engine::EndpointClient;

/// Print the models installed on each target. Unreachable targets are
/// reported on stderr and do not stop the listing.
pub async fn list_models(config_path: Option<PathBuf>, urls: Vec<String>) -> Result<()> {
    let mut config = RunnerConfig::load(config_path.as_deref())?;
    if !urls.is_empty() {
        config.urls = urls;
    }

    let client = EndpointClient::from_config(&config)?;

    for url in &config.urls {
        println!("Querying {}...", url);
        match client.list_models(url).await {
            Ok(models) => {
                for model in models {
                    println!("- {}", model);
                }
            }
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    Ok(())
}
