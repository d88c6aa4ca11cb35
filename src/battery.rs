//! Battery actuation sinks
//!
//! The manager talks to the bank through [`BatteryCommander`]. Stance commands
//! and setpoints go to individual units; the grid target goes to the P1 meter
//! attached to the first unit.

use crate::config::Config;
use crate::error::Result;
use crate::logging::{StructuredLogger, get_logger};
use crate::stance::Stance;
use std::sync::Arc;

/// Strategy token the battery firmware understands for `stance`
pub fn strategy_token(stance: Stance) -> &'static str {
    match stance {
        Stance::Nom => "POWER_STRATEGY_NOM",
        Stance::Idle => "POWER_STRATEGY_IDLE",
        Stance::Charge | Stance::Discharge => "POWER_STRATEGY_API",
    }
}

/// Command sink for the battery bank
#[async_trait::async_trait]
pub trait BatteryCommander: Send + Sync {
    async fn set_stance(&self, battery: &str, stance: Stance) -> Result<()>;

    async fn set_setpoint(&self, battery: &str, watts: i32) -> Result<()>;

    /// Combined target for the grid meter (negative = export)
    async fn set_grid_target(&self, watts: i32) -> Result<()>;
}

/// Dry-run sink: logs every command and always succeeds
pub struct LoggingCommander {
    logger: StructuredLogger,
}

impl LoggingCommander {
    pub fn new() -> Self {
        Self {
            logger: get_logger("dry-run"),
        }
    }
}

impl Default for LoggingCommander {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BatteryCommander for LoggingCommander {
    async fn set_stance(&self, battery: &str, stance: Stance) -> Result<()> {
        self.logger.info(&format!(
            "{} -> {} ({})",
            battery,
            stance,
            strategy_token(stance)
        ));
        Ok(())
    }

    async fn set_setpoint(&self, battery: &str, watts: i32) -> Result<()> {
        self.logger
            .info(&format!("{} -> setpoint {} W", battery, watts));
        Ok(())
    }

    async fn set_grid_target(&self, watts: i32) -> Result<()> {
        self.logger.info(&format!("grid target {} W", watts));
        Ok(())
    }
}

#[cfg(feature = "sessy")]
pub use sessy::SessyCommander;

#[cfg(feature = "sessy")]
mod sessy {
    use super::*;
    use crate::config::BatteryUnitConfig;
    use crate::error::BatmanError;
    use reqwest::header::ACCEPT;
    use serde_json::json;

    const STRATEGY_PATH: &str = "api/v1/power/active_strategy";
    const SETPOINT_PATH: &str = "api/v1/power/setpoint";
    const GRID_TARGET_PATH: &str = "api/v1/p1/grid_target";

    /// Client for the units' local REST API
    pub struct SessyCommander {
        client: reqwest::Client,
        units: Vec<BatteryUnitConfig>,
        logger: StructuredLogger,
    }

    impl SessyCommander {
        pub fn new(units: Vec<BatteryUnitConfig>) -> Result<Self> {
            if units.is_empty() {
                return Err(BatmanError::config("No battery units configured"));
            }
            let client = reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()?;
            Ok(Self {
                client,
                units,
                logger: get_logger("sessy"),
            })
        }

        fn unit(&self, battery: &str) -> Result<&BatteryUnitConfig> {
            self.units
                .iter()
                .find(|u| u.name == battery)
                .ok_or_else(|| BatmanError::actuation(battery, "unknown battery unit"))
        }

        async fn post(
            &self,
            unit: &BatteryUnitConfig,
            path: &str,
            body: serde_json::Value,
        ) -> Result<()> {
            let url = format!("{}/{}", unit.url.trim_end_matches('/'), path);
            let resp = self
                .client
                .post(&url)
                .basic_auth(&unit.username, Some(&unit.password))
                .header(ACCEPT, "application/json")
                .json(&body)
                .send()
                .await
                .map_err(|e| BatmanError::actuation(unit.name.clone(), e.to_string()))?;

            if !resp.status().is_success() {
                self.logger
                    .error(&format!("{} rejected {}: {}", unit.name, path, resp.status()));
                return Err(BatmanError::actuation(
                    unit.name.clone(),
                    format!("{} returned {}", path, resp.status()),
                ));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl BatteryCommander for SessyCommander {
        async fn set_stance(&self, battery: &str, stance: Stance) -> Result<()> {
            let unit = self.unit(battery)?;
            self.post(unit, STRATEGY_PATH, json!({ "strategy": strategy_token(stance) }))
                .await
        }

        async fn set_setpoint(&self, battery: &str, watts: i32) -> Result<()> {
            let unit = self.unit(battery)?;
            self.post(unit, SETPOINT_PATH, json!({ "setpoint": watts }))
                .await
        }

        async fn set_grid_target(&self, watts: i32) -> Result<()> {
            let meter = &self.units[0];
            self.post(meter, GRID_TARGET_PATH, json!({ "grid_target": watts }))
                .await
        }
    }
}

/// Build the sink the configuration asks for
pub fn build_commander(config: &Config) -> Result<Arc<dyn BatteryCommander>> {
    #[cfg(feature = "sessy")]
    {
        if !config.dry_run {
            return Ok(Arc::new(SessyCommander::new(config.batteries.units.clone())?));
        }
    }
    #[cfg(not(feature = "sessy"))]
    {
        if !config.dry_run {
            get_logger("battery").warn("Built without the sessy feature; running dry");
        }
    }
    Ok(Arc::new(LoggingCommander::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_tokens() {
        assert_eq!(strategy_token(Stance::Nom), "POWER_STRATEGY_NOM");
        assert_eq!(strategy_token(Stance::Idle), "POWER_STRATEGY_IDLE");
        assert_eq!(strategy_token(Stance::Charge), "POWER_STRATEGY_API");
        assert_eq!(strategy_token(Stance::Discharge), "POWER_STRATEGY_API");
    }

    #[tokio::test]
    async fn logging_commander_accepts_everything() {
        let commander = LoggingCommander::new();
        assert!(commander.set_stance("bat1", Stance::Charge).await.is_ok());
        assert!(commander.set_setpoint("bat1", -2200).await.is_ok());
        assert!(commander.set_grid_target(4400).await.is_ok());
    }

    #[tokio::test]
    async fn dry_run_builds_logging_sink() {
        let config = Config::default();
        assert!(config.dry_run);
        let commander = build_commander(&config).unwrap();
        assert!(commander.set_grid_target(0).await.is_ok());
    }

    #[cfg(feature = "sessy")]
    #[tokio::test]
    async fn sessy_rejects_unknown_unit() {
        let commander = SessyCommander::new(Config::default().batteries.units).unwrap();
        let err = commander.set_stance("bat9", Stance::Nom).await.unwrap_err();
        assert!(matches!(err, crate::error::BatmanError::ActuationFailure { .. }));
    }
}
