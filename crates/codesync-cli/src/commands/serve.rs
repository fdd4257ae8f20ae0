//! Serve command handler

use anyhow::Result;
use tracing::info;

use codesync_core::{sync, Config};

use crate::output::{Output, OutputFormat};

/// Run the sync daemon until Ctrl-C
pub async fn run(config: Config, output: &Output) -> Result<()> {
    let addr = config.listen_addr()?;

    match output.format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "listening": format!("ws://{}", addr),
                "files_dir": config.files_dir(),
            })
        ),
        OutputFormat::Quiet => {}
        OutputFormat::Human => {
            println!("codesync listening on ws://{}", addr);
            println!("Syncing {}", config.files_dir().display());
            println!("Press Ctrl-C to stop.");
        }
    }

    sync::serve(&config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    info!("Daemon stopped");
    output.message("Stopped.");
    Ok(())
}
