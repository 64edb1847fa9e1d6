//! DockerCli - `docker` CLI を subprocess で呼ぶ ContainerRuntime 実装
//!
//! すべての呼び出しは `tokio::process::Command` で非同期に実行する。
//! timeout は呼び出し側（reconciler / provisioner）の責務。

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::domain::errors::RuntimeError;
use crate::ports::{ContainerRuntime, ContainerSpec, ContainerStats, RestartPolicy};

/// Mount point of the app working directory inside the container.
const APP_MOUNT: &str = "/app";

#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: PathBuf,
}

struct Output {
    success: bool,
    stdout: String,
    stderr: String,
}

impl DockerCli {
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use an alternative CLI binary (e.g. `podman`).
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, op: &'static str, args: &[String]) -> Result<Output, RuntimeError> {
        debug!(op, ?args, "docker cli");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RuntimeError::Unavailable(format!("{}: {e}", self.binary.display())))?;
        Ok(Output {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    async fn run_ok(&self, op: &'static str, args: &[String]) -> Result<String, RuntimeError> {
        let out = self.run(op, args).await?;
        if out.success {
            Ok(out.stdout)
        } else {
            Err(RuntimeError::failed(op, out.stderr))
        }
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Build the `docker run` argument list for a spec.
pub(crate) fn run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut argv = args(["run", "-d", "--name"]);
    argv.push(spec.name.clone());
    argv.push("--memory".into());
    argv.push(format!("{}m", spec.memory_mb));
    if spec.cpu_cores > 0.0 {
        argv.push("--cpus".into());
        argv.push(format!("{}", spec.cpu_cores));
    }
    argv.push("-v".into());
    argv.push(format!("{}:{APP_MOUNT}", spec.workdir.display()));
    argv.push("-w".into());
    argv.push(APP_MOUNT.into());
    if spec.hardened {
        argv.extend(args([
            "--cap-drop",
            "ALL",
            "--security-opt",
            "no-new-privileges",
        ]));
    }
    match spec.restart {
        RestartPolicy::Never => {}
        RestartPolicy::UnlessStopped => argv.extend(args(["--restart", "unless-stopped"])),
    }
    for (key, value) in &spec.labels {
        argv.push("--label".into());
        argv.push(format!("{key}={value}"));
    }
    argv.push(spec.image.clone());
    argv.extend(spec.command.iter().cloned());
    argv
}

/// Parse `docker stats --format "{{.MemUsage}}|{{.CPUPerc}}"` output,
/// e.g. `12.5MiB / 256MiB|0.53%`.
pub(crate) fn parse_stats(line: &str) -> Option<ContainerStats> {
    let (mem, cpu) = line.split_once('|')?;
    let used = mem.split('/').next()?.trim();
    let cpu_pct = cpu.trim().trim_end_matches('%').parse::<f64>().ok()?;
    Some(ContainerStats {
        ram_mb: parse_size_mb(used)?,
        cpu_pct,
    })
}

fn parse_size_mb(raw: &str) -> Option<u64> {
    let split = raw
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value = number.trim().parse::<f64>().ok()?;
    let mb = match unit.trim() {
        "B" | "" => value / (1024.0 * 1024.0),
        "KiB" | "kB" | "KB" => value / 1024.0,
        "MiB" | "MB" => value,
        "GiB" | "GB" => value * 1024.0,
        "TiB" | "TB" => value * 1024.0 * 1024.0,
        _ => return None,
    };
    Some(mb.round() as u64)
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn ping(&self) -> Result<(), RuntimeError> {
        let out = self
            .run("ping", &args(["info", "--format", "{{.ServerVersion}}"]))
            .await?;
        if out.success {
            Ok(())
        } else {
            Err(RuntimeError::Unavailable(out.stderr))
        }
    }

    async fn exists(&self, name: &str) -> Result<bool, RuntimeError> {
        let out = self
            .run("exists", &args(["container", "inspect", "--format", "{{.Id}}", name]))
            .await?;
        if out.success {
            return Ok(true);
        }
        if out.stderr.contains("No such") {
            return Ok(false);
        }
        Err(RuntimeError::failed("exists", out.stderr))
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let id = self.run_ok("create", &run_args(spec)).await?;
        Ok(if id.is_empty() { spec.name.clone() } else { id })
    }

    async fn inspect(&self, name: &str) -> Result<bool, RuntimeError> {
        let state = self
            .run_ok(
                "inspect",
                &args(["container", "inspect", "--format", "{{.State.Running}}", name]),
            )
            .await?;
        Ok(state == "true")
    }

    async fn stats(&self, name: &str) -> Result<ContainerStats, RuntimeError> {
        let line = self
            .run_ok(
                "stats",
                &args([
                    "stats",
                    "--no-stream",
                    "--format",
                    "{{.MemUsage}}|{{.CPUPerc}}",
                    name,
                ]),
            )
            .await?;
        parse_stats(&line)
            .ok_or_else(|| RuntimeError::failed("stats", format!("unparseable stats: {line}")))
    }

    async fn restart(&self, name: &str) -> Result<(), RuntimeError> {
        self.run_ok("restart", &args(["restart", name])).await.map(|_| ())
    }

    async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        let out = self.run("remove", &args(["rm", "-f", name])).await?;
        if out.success || out.stderr.contains("No such") {
            Ok(())
        } else {
            Err(RuntimeError::failed("remove", out.stderr))
        }
    }
}
