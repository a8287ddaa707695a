//! Builds shutters and their relays from the config.

use std::sync::Arc;

use tracing::info;

use crate::config::{Config, PinConfig, RelayConfig, ShutterConfig};
use crate::mcp23017::Devices;
use crate::pin::{GpioPin, Mcp23017Pin};
use crate::relay::{pair, Dumb, Relay, RelayPool, SetPin, Wired};
use crate::shutter::ShutterController;
use crate::Result;

pub async fn build_shutters(config: &Config, devices: &Devices) -> Result<Vec<ShutterController>> {
    let pool = config.drivers.relay.pool.map(RelayPool::new);
    if let Some(pool) = &pool {
        info!(capacity = pool.capacity(), "relay pool enabled");
    }

    let mut shutters = Vec::with_capacity(config.shutters.len());
    for cfg in &config.shutters {
        shutters.push(build_shutter(cfg, devices, pool.as_ref()).await?);
    }
    Ok(shutters)
}

async fn build_shutter(
    cfg: &ShutterConfig,
    devices: &Devices,
    pool: Option<&RelayPool>,
) -> Result<ShutterController> {
    let up = relay(&cfg.up, &format!("{}-up", cfg.name), devices, pool)?;
    let down = relay(&cfg.down, &format!("{}-down", cfg.name), devices, pool)?;

    let (up, down): (Arc<dyn Relay>, Arc<dyn Relay>) = if cfg.paired {
        let (up, down) = pair(up, down);
        (Arc::new(up), Arc::new(down))
    } else {
        (up, down)
    };

    let shutter = ShutterController::new(
        cfg.name.clone(),
        up,
        down,
        cfg.full_open_position,
        cfg.full_close_position,
        cfg.time_to_close(),
    )?;

    if let Some(position) = cfg.restore_position {
        shutter.reset_position(position).await?;
    }

    info!(
        shutter = %cfg.name,
        open = cfg.full_open_position,
        close = cfg.full_close_position,
        time_to_close = ?cfg.time_to_close(),
        paired = cfg.paired,
        "shutter ready"
    );

    Ok(shutter)
}

fn relay(
    cfg: &RelayConfig,
    name: &str,
    devices: &Devices,
    pool: Option<&RelayPool>,
) -> Result<Arc<dyn Relay>> {
    let relay: Arc<dyn Relay> = match cfg {
        RelayConfig::Dumb => Arc::new(Dumb::new(name)),
        RelayConfig::Wired { pin, normal_closed } => {
            Arc::new(Wired::new(name, set_pin(pin, devices)?, *normal_closed)?)
        }
    };

    Ok(match pool {
        Some(pool) => Arc::new(pool.proxy(relay)),
        None => relay,
    })
}

fn set_pin(cfg: &PinConfig, devices: &Devices) -> Result<Box<dyn SetPin>> {
    Ok(match cfg {
        PinConfig::Gpio { pin } => Box::new(GpioPin::new(*pin)?),
        PinConfig::Mcp23017 { device, pin } => Box::new(Mcp23017Pin::new(devices.get(device)?, *pin)?),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::shutter::State;

    fn devices(config: &Config) -> Devices {
        Devices::new(config.drivers.relay.mcp23017.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn builds_dumb_shutters() {
        let config: Config = r#"
            [drivers.relay]
            pool = 1

            [[shutters]]
            name = "kitchen"
            time_to_close_ms = 1000
            restore_position = 30
            up = { kind = "dumb" }
            down = { kind = "dumb" }

            [[shutters]]
            name = "attic"
            full_open_position = 0
            full_close_position = 50
            paired = false
            up = { kind = "dumb" }
            down = { kind = "dumb" }
        "#
        .parse()
        .unwrap();

        let shutters = build_shutters(&config, &devices(&config)).await.unwrap();

        assert_eq!(shutters.len(), 2);
        assert_eq!(shutters[0].name(), "kitchen");
        assert_eq!(shutters[0].position(), 30);
        assert_eq!(shutters[0].state(), State::Open);
        assert_eq!(shutters[1].position(), 50);
        assert_eq!(shutters[1].state(), State::Closed);

        let scope = CancellationToken::new();
        shutters[0].open(&scope).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(shutters[0].position(), 100);
        assert_eq!(shutters[0].state(), State::Open);
    }

    #[tokio::test]
    async fn unknown_device_fails_the_build() {
        let config = Config {
            log_level: "info".to_string(),
            bridge: Default::default(),
            drivers: Default::default(),
            shutters: vec![ShutterConfig {
                name: "kitchen".to_string(),
                up: RelayConfig::Wired {
                    pin: PinConfig::Mcp23017 {
                        device: "missing".to_string(),
                        pin: 0,
                    },
                    normal_closed: false,
                },
                down: RelayConfig::Dumb,
                full_open_position: 100,
                full_close_position: 0,
                time_to_close_ms: 1000,
                paired: true,
                restore_position: None,
            }],
        };

        let result = build_shutters(&config, &devices(&config)).await;

        assert!(matches!(result, Err(crate::Error::UnknownDevice(id)) if id == "missing"));
    }
}
