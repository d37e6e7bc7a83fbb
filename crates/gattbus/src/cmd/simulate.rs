use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use gattbus_link::DeviceHandle;
use gattbus_protocol::{DeviceSettings, DeviceStatusSnapshot, ProtocolMirror};
use gattbus_session::{
    HealthReport, SessionConfig, SessionController, SessionPhase, SimulatedDevice, WriteOutcome,
};
use serde::Serialize;
use tracing::info;

use crate::cmd::plan::load_settings;
use crate::cmd::{parse_duration, SimulateArgs};
use crate::exit::{
    io_error, session_error, CliResult, DATA_INVALID, HEALTH_CHECK_FAILED, SUCCESS,
};
use crate::output::{print_fields, print_json, print_pretty_fields, schema_id, OutputFormat};

#[derive(Serialize)]
struct WriteReport {
    applied: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed: Option<String>,
}

impl From<WriteOutcome> for WriteReport {
    fn from(outcome: WriteOutcome) -> Self {
        Self {
            failed: outcome.reason(),
            applied: outcome.applied,
        }
    }
}

#[derive(Serialize)]
struct SimulateOutput {
    schema_id: String,
    phase: SessionPhase,
    connects: u32,
    snapshot: Option<DeviceStatusSnapshot>,
    mirror: ProtocolMirror,
    health: HealthReport,
    writes: Vec<WriteReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    interrupted: bool,
}

struct Plan {
    config: SessionConfig,
    apply: Option<DeviceSettings>,
    duration: Duration,
}

pub fn run(args: SimulateArgs, format: OutputFormat) -> CliResult<i32> {
    let plan = Plan {
        config: load_config(args.config.as_deref())?,
        apply: match args.apply.as_deref() {
            Some(path) => Some(load_settings(Some(path))?),
            None => None,
        },
        duration: parse_duration(&args.duration)?,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("start runtime", err))?;
    let out = runtime.block_on(simulate(args, plan))?;

    print_output(&out, format);
    let write_failed = out.writes.iter().any(|write| write.failed.is_some());
    Ok(if write_failed {
        DATA_INVALID
    } else if !out.phase.is_polling() {
        HEALTH_CHECK_FAILED
    } else {
        SUCCESS
    })
}

fn load_config(path: Option<&Path>) -> CliResult<SessionConfig> {
    let Some(path) = path else {
        return Ok(SessionConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|err| io_error(&format!("read {}", path.display()), err))?;
    SessionConfig::from_json(&text)
        .map_err(|err| session_error(&format!("config {}", path.display()), err))
}

async fn simulate(args: SimulateArgs, plan: Plan) -> CliResult<SimulateOutput> {
    let device = SimulatedDevice::new();
    let session = SessionController::new(Arc::new(device.factory()), plan.config)
        .map_err(|err| session_error("config", err))?;
    let handle = DeviceHandle::new(args.address).with_name("simulator");

    session
        .connect(handle.clone())
        .await
        .map_err(|err| session_error(&format!("connect {handle}"), err))?;

    let mut writes = Vec::new();
    if args.power_on {
        let outcome = session
            .set_power(true)
            .await
            .map_err(|err| session_error("power on", err))?;
        writes.push(WriteReport::from(outcome));
    }
    if let Some(settings) = &plan.apply {
        let outcome = session
            .apply_all_settings(settings)
            .await
            .map_err(|err| session_error("apply settings", err))?;
        writes.push(WriteReport::from(outcome));
    }
    if args.corrupt > 0 {
        device.corrupt_next_responses(args.corrupt);
    }

    let mut interrupted = false;
    let mut remaining = plan.duration;
    if args.drop_link {
        let half = plan.duration / 2;
        remaining -= half;
        tokio::select! {
            _ = tokio::time::sleep(half) => device.drop_link(),
            _ = tokio::signal::ctrl_c() => interrupted = true,
        }
    }
    if !interrupted {
        tokio::select! {
            _ = tokio::time::sleep(remaining) => {}
            _ = tokio::signal::ctrl_c() => interrupted = true,
        }
    }

    let out = SimulateOutput {
        schema_id: schema_id("simulate"),
        phase: session.phase(),
        connects: device.connect_count(),
        snapshot: session.snapshot(),
        mirror: session.mirror(),
        health: session.health().await,
        writes,
        last_error: session.last_error().map(|err| err.to_string()),
        interrupted,
    };
    info!(phase = %out.phase, connects = out.connects, "simulation finished");
    session.disconnect().await;
    Ok(out)
}

fn print_output(out: &SimulateOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(out),
        OutputFormat::Table => print_fields(&rows(out)),
        OutputFormat::Pretty => print_pretty_fields(&rows(out)),
    }
}

fn rows(out: &SimulateOutput) -> Vec<(&'static str, String)> {
    let mut rows = vec![
        ("phase", out.phase.to_string()),
        ("connects", out.connects.to_string()),
    ];
    match &out.snapshot {
        Some(status) => {
            rows.push(("run_state", format!("{:?}", status.run_state)));
            rows.push(("voltage", format!("{:.1} V", status.voltage)));
            rows.push(("level", format!("{} ({}%)", status.level, status.run_percent)));
            rows.push(("rpm", status.rpm.to_string()));
        }
        None => rows.push(("run_state", "unknown".to_string())),
    }
    rows.push(("hydrated", out.mirror.is_hydratable().to_string()));
    rows.push(("frames", out.health.frames_received.to_string()));
    rows.push(("desync", out.health.desync.to_string()));
    for write in &out.writes {
        let summary = match &write.failed {
            Some(reason) => format!("{} applied, failed: {reason}", write.applied.len()),
            None => format!("{} applied", write.applied.len()),
        };
        rows.push(("writes", summary));
    }
    if let Some(err) = &out.last_error {
        rows.push(("last_error", err.clone()));
    }
    if out.interrupted {
        rows.push(("interrupted", "true".to_string()));
    }
    rows
}
