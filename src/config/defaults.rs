use super::*;

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/tmp/batman.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for PriceAdjustConfig {
    fn default() -> Self {
        Self {
            hike: 0.021,
            extra: 2.0,
            taxes: 10.15,
            btw: 1.21,
        }
    }
}

impl Default for GreedConfig {
    fn default() -> Self {
        Self {
            mode: GreedMode::Absolute,
            low: 0.0,
            high: 35.0,
        }
    }
}

impl Default for PricesConfig {
    fn default() -> Self {
        Self {
            adjust: PriceAdjustConfig::default(),
            greed: GreedConfig::default(),
            trading: false,
            selection_hours: 8,
        }
    }
}

impl Default for BatteriesConfig {
    fn default() -> Self {
        Self {
            units: vec![
                BatteryUnitConfig {
                    name: "bat1".to_string(),
                    url: "http://192.168.1.51".to_string(),
                    ..Default::default()
                },
                BatteryUnitConfig {
                    name: "bat2".to_string(),
                    url: "http://192.168.1.52".to_string(),
                    ..Default::default()
                },
            ],
            capacity_wh: 5000.0,
            max_charge_w: -2200.0,
            max_discharge_w: 1700.0,
            fill_hours: 1.0,
            ev_charge_limit_w: -1000.0,
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            ev_assist: false,
            ev_assist_above_q3: true,
            discharge_floor_w: 1700.0,
            pv_low_output_w: 50.0,
            nom_assist_w: 100.0,
        }
    }
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            growth_rate: 0.4,
            deadband_fraction: 0.1,
            step_delay_ms: 2000,
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 5000,
            pv_overcurrent_a: 21.0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: "Europe/Amsterdam".to_string(),
            dry_run: true,
            logging: LoggingConfig::default(),
            prices: PricesConfig::default(),
            batteries: BatteriesConfig::default(),
            strategy: StrategyConfig::default(),
            ramp: RampConfig::default(),
            watchdog: WatchdogConfig::default(),
        }
    }
}
