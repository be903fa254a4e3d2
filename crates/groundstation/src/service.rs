//! systemd units for the camera streamer and the ground station.
//!
//! Units are rendered from configuration so the flags that select the camera
//! sensor, resolution and ports live in one place. Installing only writes the
//! unit file; enabling and starting it is left to `systemctl`.

use std::path::{Path, PathBuf};

use crate::config::{CameraConfig, Config};
use crate::error::{Error, Result};

/// Which unit to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    /// `camera-streamer`.
    Camera,
    /// The ground station server.
    Station,
}

impl UnitKind {
    /// Unit name without the `.service` suffix.
    #[must_use]
    pub fn unit_name(self, config: &Config) -> &str {
        match self {
            Self::Camera => &config.service.camera_unit,
            Self::Station => &config.service.station_unit,
        }
    }
}

impl std::fmt::Display for UnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Camera => write!(f, "camera"),
            Self::Station => write!(f, "station"),
        }
    }
}

/// Quote one `ExecStart` argument for systemd.
///
/// `%` introduces a specifier in unit files and must be doubled.
#[must_use]
pub fn quote_arg(arg: &str) -> String {
    let escaped = arg.replace('%', "%%");
    let needs_quotes = escaped.is_empty()
        || escaped
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\' | ';'));
    if !needs_quotes {
        return escaped;
    }
    let mut out = String::with_capacity(escaped.len() + 2);
    out.push('"');
    for c in escaped.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn exec_start(program: &Path, args: &[String]) -> String {
    let mut line = format!("ExecStart={}", quote_arg(&program.to_string_lossy()));
    for arg in args {
        line.push_str(" \\\n  ");
        line.push_str(&quote_arg(arg));
    }
    line
}

/// `camera-streamer` command-line arguments for the configuration.
#[must_use]
pub fn camera_args(camera: &CameraConfig) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(path) = &camera.camera_path {
        args.push(format!("--camera-path={path}"));
    }
    args.push(format!("--camera-type={}", camera.camera_type));
    args.push(format!("--camera-format={}", camera.format));
    args.push(format!("--camera-width={}", camera.width));
    args.push(format!("--camera-height={}", camera.height));
    args.push(format!("--camera-fps={}", camera.fps));
    if let Some(nbufs) = camera.nbufs {
        args.push(format!("--camera-nbufs={nbufs}"));
    }
    for option in &camera.options {
        args.push(format!("--camera-options={option}"));
    }
    args.push(format!("--http-listen={}", camera.http_listen));
    args.push(format!("--http-port={}", camera.http_port));
    if camera.rtsp {
        args.push("--rtsp-port".to_string());
    }
    args.extend(camera.extra_args.iter().cloned());
    args
}

/// Render the `camera-streamer` unit.
#[must_use]
pub fn render_camera_unit(camera: &CameraConfig) -> String {
    format!(
        "[Unit]
Description=camera-streamer web camera
After=network.target
StartLimitIntervalSec=120
StartLimitBurst=10

[Service]
{exec}
DynamicUser=yes
SupplementaryGroups=video i2c
Restart=always
RestartSec=10
Nice=10
IOSchedulingClass=idle
IOSchedulingPriority=7
CPUWeight=20
MemoryMax=250M

[Install]
WantedBy=multi-user.target
",
        exec = exec_start(&camera.binary, &camera_args(camera)),
    )
}

/// Render the ground station unit running `exe -c config_path serve`.
#[must_use]
pub fn render_station_unit(config: &Config, exe: &Path, config_path: &Path) -> String {
    let args = vec![
        "--config".to_string(),
        config_path.to_string_lossy().into_owned(),
        "serve".to_string(),
    ];
    let user = config
        .service
        .user
        .as_ref()
        .map(|user| format!("User={user}\n"))
        .unwrap_or_default();

    format!(
        "[Unit]
Description=Drone ground station telemetry server
After=network-online.target {camera}.service
Wants=network-online.target

[Service]
{exec}
{user}SupplementaryGroups=i2c
Restart=always
RestartSec=5

[Install]
WantedBy=multi-user.target
",
        camera = config.service.camera_unit,
        exec = exec_start(exe, &args),
    )
}

/// Render the unit of the given kind.
///
/// # Errors
///
/// Returns an error if the path of the running executable cannot be found.
pub fn render(kind: UnitKind, config: &Config, config_path: &Path) -> Result<String> {
    match kind {
        UnitKind::Camera => Ok(render_camera_unit(&config.camera)),
        UnitKind::Station => {
            let exe = std::env::current_exe()?;
            Ok(render_station_unit(config, &exe, config_path))
        }
    }
}

/// Write `contents` to `<dir>/<name>.service`, creating `dir` if needed.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub fn install_unit(dir: &Path, name: &str, contents: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|source| Error::DirectoryCreate {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join(format!("{name}.service"));
    std::fs::write(&path, contents)?;
    tracing::info!("Wrote {}", path.display());
    Ok(path)
}
