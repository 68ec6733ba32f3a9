use std::{path::Path, time::Duration};

use anyhow::Context;
use chrono::Local;
use climate_common::{ActuatorPlan, RuntimeConfig, SensorReading, SensorStore, ThermostatConfig};
use tokio::{
    fs::File,
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use crate::{
    bridge::{self, OverrideCommand, SerialLine},
    client::ControlClient,
};

type LineSource = Box<dyn AsyncBufRead + Unpin + Send>;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = RuntimeConfig::from_env().context("failed to load runtime config")?;
    let device = config.device;

    let client = ControlClient::new(
        &device.controller_url,
        Duration::from_millis(device.request_timeout_ms),
    )?;
    let store = SensorStore::open(&device.readings_db).with_context(|| {
        format!("failed to open sensor database {}", device.readings_db.display())
    })?;
    let mut source = open_line_source(device.serial_path.as_deref()).await?;

    let mut bridge = Bridge {
        thermostat: config.thermostat,
        client,
        store,
        auto_humidifier: None,
        last_plan: None,
    };

    let mut interval =
        tokio::time::interval(Duration::from_millis(device.poll_interval_ms.max(100)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut line = Vec::new();
    let mut input_open = true;

    info!(controller = %device.controller_url, "device bridge started");

    loop {
        tokio::select! {
            // Partial reads stay in `line` if another branch wins.
            read = source.read_until(b'\n', &mut line), if input_open => {
                match read {
                    Ok(0) => {
                        info!("sensor line feed closed");
                        input_open = false;
                    }
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line).into_owned();
                        line.clear();
                        bridge.handle_line(&text).await;
                    }
                    Err(err) => {
                        warn!("failed to read sensor line: {err}");
                        line.clear();
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            _ = interval.tick() => {
                if let Err(err) = bridge.actuate().await {
                    warn!("actuator cycle failed: {err:#}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("device bridge shutting down");
                return Ok(());
            }
        }
    }
}

async fn open_line_source(path: Option<&Path>) -> anyhow::Result<LineSource> {
    match path {
        Some(path) => {
            let file = File::open(path)
                .await
                .with_context(|| format!("failed to open serial device {}", path.display()))?;
            info!("reading sensor lines from {}", path.display());
            Ok(Box::new(BufReader::new(file)))
        }
        None => {
            info!("reading sensor lines from stdin");
            Ok(Box::new(BufReader::new(tokio::io::stdin())))
        }
    }
}

struct Bridge {
    thermostat: ThermostatConfig,
    client: ControlClient,
    store: SensorStore,
    /// Hysteresis state from the previous cycle; `None` until the first.
    auto_humidifier: Option<bool>,
    last_plan: Option<ActuatorPlan>,
}

impl Bridge {
    async fn handle_line(&mut self, line: &str) {
        match bridge::parse_line(line, SensorReading::timestamp_now()) {
            SerialLine::Command(command) => {
                if let Err(err) = self.apply_override(command).await {
                    warn!(?command, "override command failed: {err:#}");
                }
            }
            SerialLine::Reading(reading) => match self.store.insert(&reading) {
                Ok(id) => debug!(id, ?reading, "stored sensor reading"),
                Err(err) => warn!("failed to store sensor reading: {err}"),
            },
            SerialLine::Ignored => {}
        }
    }

    async fn apply_override(&self, command: OverrideCommand) -> anyhow::Result<()> {
        let state = self.client.fetch().await?;
        let patch = bridge::override_patch(command, &state, self.thermostat.override_step_c);
        let state = self.client.push(&patch).await?;

        info!(
            ?command,
            override_active = state.override_active,
            override_setpoint = ?state.override_setpoint,
            "override command applied"
        );
        Ok(())
    }

    async fn actuate(&mut self) -> anyhow::Result<()> {
        let state = self.client.fetch().await?;
        let reading = self
            .store
            .latest_with_temperature()
            .context("failed to read latest sensor reading")?;

        let plan = bridge::plan_cycle(
            &self.thermostat,
            &state,
            reading.as_ref(),
            Local::now().naive_local(),
            self.auto_humidifier
                .unwrap_or_else(|| bridge::resumed_auto_humidifier(&state)),
        );
        self.auto_humidifier = Some(plan.auto_humidifier);

        if self.last_plan != Some(plan) {
            info!(
                heater = plan.heater,
                fan_level = plan.fan_level,
                humidifier = plan.humidifier,
                led = plan.led,
                "actuators changed"
            );
            self.last_plan = Some(plan);
        }

        let patch = bridge::actuation_patch(&plan, &state);
        if !patch.is_empty() {
            self.client.push(&patch).await?;
        }
        Ok(())
    }
}
