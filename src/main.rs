use anyhow::Result;
use batman::battery::build_commander;
use batman::{BatteryManager, Config};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    batman::logging::init_logging(&config.logging)?;
    info!(
        "BatMan {} starting ({})",
        env!("APP_VERSION"),
        if config.dry_run { "dry run" } else { "live" }
    );

    let commander = build_commander(&config)?;
    let manager = BatteryManager::new(config, commander)
        .map_err(|e| anyhow::anyhow!("Failed to create manager: {}", e))?;
    let handle = manager.handle();

    let mut task = tokio::spawn(manager.run());

    tokio::select! {
        res = &mut task => {
            // The manager only stops on its own after an error
            return match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    error!("Manager failed with error: {}", e);
                    Err(anyhow::anyhow!("Manager error: {}", e))
                }
                Err(e) => Err(anyhow::anyhow!("Manager task panicked: {}", e)),
            };
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received");
        }
    }

    handle.shutdown()?;
    match task.await {
        Ok(Ok(())) => {
            info!("Shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => Err(anyhow::anyhow!("Manager error: {}", e)),
        Err(e) => Err(anyhow::anyhow!("Manager task panicked: {}", e)),
    }
}
