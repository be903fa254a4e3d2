//! LiFePO4wered-Pi UPS access via `lifepo4wered-cli`.
//!
//! The utility prints register values in several shapes depending on version
//! (`VBAT = 3412`, `3412 mV`, or a bare `3412`), so values are taken as the
//! first integer found in its output.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tracing::trace;

use crate::error::{HardwareError, Result};

/// Default UPS utility name, resolved through `PATH`.
pub const DEFAULT_PROGRAM: &str = "lifepo4wered-cli";

static FIRST_INT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+").expect("valid integer regex"));

/// UPS registers read by the ground station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    /// Battery voltage in mV.
    Vbat,
    /// Configured minimum battery voltage (shutdown threshold) in mV.
    VbatMin,
    /// Input (charger) voltage in mV.
    Vin,
    /// 5V rail output voltage in mV.
    Vout,
    /// Load current in mA.
    Iout,
}

impl Register {
    /// Register name as understood by `lifepo4wered-cli get`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vbat => "VBAT",
            Self::VbatMin => "VBAT_MIN",
            Self::Vin => "VIN",
            Self::Vout => "VOUT",
            Self::Iout => "IOUT",
        }
    }
}

impl std::fmt::Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extract the first (optionally negative) integer from utility output.
#[must_use]
pub fn parse_first_int(output: &str) -> Option<i64> {
    FIRST_INT
        .find(output)
        .and_then(|m| m.as_str().parse::<i64>().ok())
}

/// Runs `lifepo4wered-cli get <REGISTER>`.
#[derive(Debug, Clone)]
pub struct Lifepo4weredCli {
    command: Vec<String>,
    timeout: Duration,
}

impl Lifepo4weredCli {
    /// Create a reader. `command` is the program plus any leading arguments
    /// (for example `["sudo", "lifepo4wered-cli"]`); an empty command falls
    /// back to [`DEFAULT_PROGRAM`].
    #[must_use]
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        let command = if command.is_empty() {
            vec![DEFAULT_PROGRAM.to_string()]
        } else {
            command
        };
        Self { command, timeout }
    }

    /// The program that will be executed.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.command[0]
    }

    /// Read one register.
    ///
    /// Returns `Ok(None)` when the utility ran but printed no number.
    ///
    /// # Errors
    ///
    /// Returns an error if the utility cannot be started, fails, or times out.
    pub async fn get(&self, register: Register) -> Result<Option<i64>> {
        let program = self.program().to_string();
        let mut cmd = Command::new(&program);
        cmd.args(&self.command[1..])
            .arg("get")
            .arg(register.as_str())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| HardwareError::Timeout {
                program: program.clone(),
                timeout: self.timeout,
            })?
            .map_err(|source| HardwareError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(HardwareError::CommandFailed {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        trace!("{} {} -> {}", program, register, stdout.trim());
        Ok(parse_first_int(&stdout))
    }
}

impl Default for Lifepo4weredCli {
    fn default() -> Self {
        Self::new(Vec::new(), Duration::from_secs(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> Lifepo4weredCli {
        // `sh -c SCRIPT sh get REG` puts the register name in $2.
        Lifepo4weredCli::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                script.to_string(),
                "sh".to_string(),
            ],
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_parse_first_int_formats() {
        assert_eq!(parse_first_int("VBAT = 3412"), Some(3412));
        assert_eq!(parse_first_int("3412 mV"), Some(3412));
        assert_eq!(parse_first_int("3412"), Some(3412));
        assert_eq!(parse_first_int("IOUT = -12"), Some(-12));
    }

    #[test]
    fn test_parse_first_int_none() {
        assert_eq!(parse_first_int(""), None);
        assert_eq!(parse_first_int("error: no device"), None);
    }

    #[test]
    fn test_register_names() {
        assert_eq!(Register::Vbat.as_str(), "VBAT");
        assert_eq!(Register::VbatMin.as_str(), "VBAT_MIN");
        assert_eq!(Register::Vin.to_string(), "VIN");
        assert_eq!(Register::Vout.to_string(), "VOUT");
        assert_eq!(Register::Iout.to_string(), "IOUT");
    }

    #[test]
    fn test_default_program() {
        let cli = Lifepo4weredCli::default();
        assert_eq!(cli.program(), DEFAULT_PROGRAM);
    }

    #[tokio::test]
    async fn test_get_reads_value() {
        let cli = shell(r#"echo "$2 = 3412""#);
        assert_eq!(cli.get(Register::Vbat).await.unwrap(), Some(3412));
    }

    #[tokio::test]
    async fn test_get_passes_register_name() {
        let cli = shell(r#"if [ "$2" = "VIN" ]; then echo 5100; else echo 0; fi"#);
        assert_eq!(cli.get(Register::Vin).await.unwrap(), Some(5100));
        assert_eq!(cli.get(Register::Vout).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_get_without_number() {
        let cli = shell("echo unavailable");
        assert_eq!(cli.get(Register::Vbat).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_failure_status() {
        let cli = shell("echo 'I2C error' >&2; exit 3");
        let err = cli.get(Register::Vbat).await.unwrap_err();
        match err {
            HardwareError::CommandFailed { stderr, .. } => assert_eq!(stderr, "I2C error"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_get_missing_program() {
        let cli = Lifepo4weredCli::new(
            vec!["/nonexistent/lifepo4wered-cli".to_string()],
            Duration::from_secs(1),
        );
        let err = cli.get(Register::Vbat).await.unwrap_err();
        assert!(matches!(err, HardwareError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_get_timeout() {
        let cli = Lifepo4weredCli::new(
            vec!["sh".to_string(), "-c".to_string(), "sleep 5".to_string()],
            Duration::from_millis(50),
        );
        let err = cli.get(Register::Vbat).await.unwrap_err();
        assert!(matches!(err, HardwareError::Timeout { .. }));
    }
}
