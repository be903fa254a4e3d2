//! `gstation` - CLI for groundstation
//!
//! This binary runs the telemetry server and provides commands for inspecting
//! the sample archive, flight logs, systemd units and configuration.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::{DateTime, Local, Utc};
use clap::Parser;

use groundstation::cli::{
    Cli, Command, ConfigCommand, HistoryCommand, LogsCommand, OutputFormat, SampleCommand,
    ServeCommand, ServiceCommand,
};
use groundstation::config::SensorBackend;
use groundstation::recorder;
use groundstation::service::{self, UnitKind};
use groundstation::{init_logging, platform_name, server, Config, Station, Storage, Telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    let config_path = cli.config.clone().unwrap_or_else(Config::default_config_path);

    // Config commands must work even when the file does not load
    let command = match cli.command {
        Command::Config(cmd) => return handle_config(&config_path, cmd),
        command => command,
    };

    let config = Config::load_from(Some(config_path.clone()))
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;

    match command {
        Command::Serve(cmd) => handle_serve(config, &cmd).await,
        Command::Sample(cmd) => handle_sample(config, &cmd).await,
        Command::History(cmd) => handle_history(&config, &cmd),
        Command::Logs(cmd) => handle_logs(&config, cmd),
        Command::Service(cmd) => handle_service(&config, &config_path, cmd),
        Command::Status(cmd) => handle_status(&config, &config_path, cmd.json),
        Command::Prune => handle_prune(&config),
        Command::Config(_) => Ok(()),
    }
}

async fn handle_serve(mut config: Config, cmd: &ServeCommand) -> anyhow::Result<()> {
    cmd.apply(&mut config);
    config.validate()?;
    server::run(&config).await?;
    Ok(())
}

async fn handle_sample(mut config: Config, cmd: &SampleCommand) -> anyhow::Result<()> {
    if cmd.simulate {
        config.sensor.backend = SensorBackend::Simulated;
    }
    let sample = Station::from_config(&config).sample().await;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&sample)?);
        return Ok(());
    }

    let env = &sample.environment;
    let power = &sample.power;
    let host = &sample.system;
    println!("Sample at {}", local_time(sample.timestamp));
    println!("------------------------------");
    println!("Temperature:   {}", value(env.temperature_c, 1, " °C"));
    println!("Humidity:      {}", value(env.humidity, 1, " %"));
    println!("Pressure:      {}", value(env.pressure_hpa, 1, " hPa"));
    println!("Gas:           {}", value(env.gas_ohms, 0, " Ω"));
    println!("Dew point:     {}", value(env.dew_point_c, 1, " °C"));
    println!("Altitude:      {}", value(env.altitude_m, 0, " m"));
    println!(
        "Fire risk:     {}{}",
        value(env.fire_risk_index, 1, ""),
        label(env.fire_risk_level.map(|l| l.label()))
    );
    println!(
        "Air quality:   {}{}",
        value(env.air_quality_index.map(f64::from), 0, ""),
        label(env.air_quality_level.map(|l| l.label()))
    );
    println!(
        "Battery:       {} ({})",
        value(power.battery_percent.map(f64::from), 0, " %"),
        millivolts(power.battery_mv)
    );
    println!("Input:         {}", millivolts(power.vin_mv));
    println!("Output:        {}", millivolts(power.vout_mv));
    println!(
        "Load current:  {}",
        power
            .load_current_ma
            .map_or_else(|| "-".to_string(), |ma| format!("{ma} mA"))
    );
    println!("CPU temp:      {}", value(host.cpu_temp_c, 1, " °C"));
    println!("Load (1m):     {}", value(host.load_1m, 2, ""));
    println!(
        "Memory:        {} / {}",
        value(host.mem_used_mb, 0, " MiB"),
        value(host.mem_total_mb, 0, " MiB")
    );
    println!(
        "Disk free:     {} ({} used)",
        value(host.disk_free_gb, 1, " GiB"),
        value(host.disk_used_pct, 1, " %")
    );
    println!(
        "IP address:    {}",
        host.ip_address.as_deref().unwrap_or("-")
    );
    Ok(())
}

fn handle_history(config: &Config, cmd: &HistoryCommand) -> anyhow::Result<()> {
    let storage = open_archive(config)?;
    let samples = storage.recent_samples(cmd.limit)?;

    match cmd.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&samples)?),
        OutputFormat::Plain => {
            for sample in &samples {
                println!("{}", plain_line(sample));
            }
        }
        OutputFormat::Table => {
            println!(
                "{:<19}  {:>7}  {:>6}  {:>8}  {:>5}  {:>9}",
                "TIME", "TEMP_C", "RH_%", "HPA", "BATT", "FIRE_RISK"
            );
            for sample in &samples {
                let env = &sample.environment;
                println!(
                    "{:<19}  {:>7}  {:>6}  {:>8}  {:>5}  {:>9}",
                    local_time(sample.timestamp),
                    value(env.temperature_c, 1, ""),
                    value(env.humidity, 1, ""),
                    value(env.pressure_hpa, 1, ""),
                    value(sample.power.battery_percent.map(f64::from), 0, ""),
                    env.fire_risk_level.map_or("-", |l| l.label()),
                );
            }
        }
    }

    if samples.is_empty() && cmd.format != OutputFormat::Json {
        println!("No samples archived yet.");
    }
    Ok(())
}

fn handle_logs(config: &Config, cmd: LogsCommand) -> anyhow::Result<()> {
    let storage = open_archive(config)?;
    match cmd {
        LogsCommand::List { limit, json } => {
            let logs = storage.flight_logs(limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&logs)?);
                return Ok(());
            }
            if logs.is_empty() {
                println!("No flight logs recorded.");
                return Ok(());
            }
            println!(
                "{:>4}  {:<19}  {:<19}  {:>6}  PATH",
                "ID", "STARTED", "STOPPED", "ROWS"
            );
            for log in logs {
                let stopped = log
                    .stopped_at
                    .map_or_else(|| "open".to_string(), local_time);
                println!(
                    "{:>4}  {:<19}  {:<19}  {:>6}  {}",
                    log.id,
                    local_time(log.started_at),
                    stopped,
                    log.rows,
                    log.path.display()
                );
                if let Some(note) = &log.note {
                    println!("      note: {note}");
                }
            }
        }
        LogsCommand::Verify { id } => {
            let log = recorder::verify_log(&storage, id)
                .with_context(|| format!("verifying flight log {id}"))?;
            println!("{}: OK ({} rows)", log.path.display(), log.rows);
        }
    }
    Ok(())
}

fn handle_service(config: &Config, config_path: &Path, cmd: ServiceCommand) -> anyhow::Result<()> {
    // The station unit must find the config regardless of its working directory
    let config_path =
        std::fs::canonicalize(config_path).unwrap_or_else(|_| config_path.to_path_buf());

    match cmd {
        ServiceCommand::Render { unit } => {
            print!("{}", service::render(unit.into(), config, &config_path)?);
        }
        ServiceCommand::Install { unit, dir } => {
            let kind = UnitKind::from(unit);
            let contents = service::render(kind, config, &config_path)?;
            let dir = dir.unwrap_or_else(|| config.service.unit_dir.clone());
            let name = kind.unit_name(config);
            let path = service::install_unit(&dir, name, &contents)
                .with_context(|| format!("installing the {kind} unit"))?;
            println!("Wrote {}", path.display());
            println!();
            println!("Enable and start it with:");
            println!("  sudo systemctl daemon-reload");
            println!("  sudo systemctl enable --now {name}.service");
        }
    }
    Ok(())
}

fn handle_status(config: &Config, config_path: &Path, json: bool) -> anyhow::Result<()> {
    let database_path = config.database_path();
    let stats = if database_path.exists() {
        Some(Storage::open(&database_path)?.stats()?)
    } else {
        None
    };
    let backend = match config.sensor.backend {
        SensorBackend::Hardware => "hardware",
        SensorBackend::Simulated => "simulated",
    };

    if json {
        let status = serde_json::json!({
            "platform": platform_name(),
            "config_path": config_path,
            "config_found": config_path.exists(),
            "sensors": backend,
            "listen": config.bind_address(),
            "stream_url": config.camera.stream_url(),
            "database_path": database_path,
            "log_dir": config.log_dir(),
            "archive": stats,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("gstation status");
    println!("---------------");
    println!("Platform:      {}", platform_name());
    println!(
        "Config:        {}{}",
        config_path.display(),
        if config_path.exists() { "" } else { " (not found, using defaults)" }
    );
    println!("Sensors:       {backend}");
    println!("Listen:        http://{}", config.bind_address());
    println!("Stream:        {}", config.camera.stream_url());
    println!("Log dir:       {}", config.log_dir().display());
    println!("Database:      {}", database_path.display());
    match stats {
        Some(stats) => {
            println!("Samples:       {}", stats.total_samples);
            if let (Some(oldest), Some(newest)) = (stats.oldest_sample, stats.newest_sample) {
                println!(
                    "Covering:      {} .. {}",
                    local_time(oldest),
                    local_time(newest)
                );
            }
            println!("Flight logs:   {}", stats.flight_logs);
            println!("Schema:        v{}", stats.schema_version);
            println!("Size:          {}", human_bytes(stats.db_size_bytes));
        }
        None => println!("Samples:       (archive not created yet)"),
    }
    Ok(())
}

fn handle_prune(config: &Config) -> anyhow::Result<()> {
    let storage = open_archive(config)?;
    let deleted = storage.prune(config.max_age(), config.storage.max_samples)?;
    println!(
        "Pruned {deleted} samples; {} remain.",
        storage.count_samples()?
    );
    Ok(())
}

fn handle_config(config_path: &Path, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = Config::load_from(Some(config_path.to_path_buf()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print!("{}", toml_like(&config)?);
            }
        }
        ConfigCommand::Path => {
            println!("{}", config_path.display());
        }
        ConfigCommand::Validate { file } => {
            let path: PathBuf = file.unwrap_or_else(|| config_path.to_path_buf());
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}

fn open_archive(config: &Config) -> anyhow::Result<Storage> {
    let path = config.database_path();
    Storage::open(&path).with_context(|| format!("opening archive {}", path.display()))
}

fn local_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn value(v: Option<f64>, decimals: usize, unit: &str) -> String {
    v.map_or_else(|| "-".to_string(), |v| format!("{v:.decimals$}{unit}"))
}

fn millivolts(mv: Option<i64>) -> String {
    mv.map_or_else(|| "-".to_string(), |mv| format!("{mv} mV"))
}

fn label(l: Option<&str>) -> String {
    l.map_or_else(String::new, |l| format!(" ({l})"))
}

fn plain_line(sample: &Telemetry) -> String {
    let env = &sample.environment;
    format!(
        "{} temp={} rh={} hpa={} batt={} risk={}",
        local_time(sample.timestamp),
        value(env.temperature_c, 1, ""),
        value(env.humidity, 1, ""),
        value(env.pressure_hpa, 1, ""),
        value(sample.power.battery_percent.map(f64::from), 0, "%"),
        env.fire_risk_level.map_or("-", |l| l.label()),
    )
}

#[allow(clippy::cast_precision_loss)]
fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

/// Section-per-line rendering of the effective configuration.
fn toml_like(config: &Config) -> anyhow::Result<String> {
    let json = serde_json::to_value(config)?;
    let mut out = String::new();
    if let serde_json::Value::Object(sections) = json {
        for (section, fields) in sections {
            out.push_str(&format!("[{section}]\n"));
            if let serde_json::Value::Object(fields) = fields {
                for (key, value) in fields {
                    out.push_str(&format!("  {key:<24} {value}\n"));
                }
            }
            out.push('\n');
        }
    }
    Ok(out)
}
