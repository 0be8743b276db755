use std::{io::Write, process::ExitCode, time::Duration};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use url::Url;
use vdc_client::VdcBuilder;
use vdcctl::{
    credentials::resolve_password,
    exec,
    power::{self, PowerLevel},
    ssh::{SshConfig, SshExecutor, DEFAULT_PORT},
    targets::TargetList,
};

#[derive(Debug, Args)]
struct VdcArgs {
    /// vDC panel to log in to
    #[arg(short, long, env = "VDC_LOCATION", default_value = vdc_client::DEFAULT_LOCATION)]
    location: Url,
    #[arg(short, long, env = "VDC_USERNAME")]
    username: String,
    /// Prompted for when not given
    #[arg(short, long, env = "VDC_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// HTTP proxy for all requests to the panel
    #[arg(long, env = "HTTP_PROXY")]
    proxy: Option<Url>,
    /// Pause between two power changes
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    delay: Duration,
    #[arg(long, hide = true, default_value = vdc_client::DEFAULT_DEVICE_HASH)]
    device_hash: String,
}

#[derive(Debug, Args)]
struct PowerArgs {
    /// Comma separated list of VM names
    #[arg(value_name = "vm-name")]
    vms: TargetList,
    #[command(flatten)]
    vdc: VdcArgs,
}

#[derive(Debug, Args)]
struct ExecArgs {
    /// Comma separated list of hosts
    #[arg(value_name = "host-name")]
    hosts: TargetList,
    command: String,
    #[arg(short, long, default_value = "root")]
    username: String,
    /// Prompted for when not given
    #[arg(short, long)]
    password: Option<String>,
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    connect_timeout: Duration,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Power on virtual machines
    #[command(visible_alias = "on")]
    PowerOn(PowerArgs),
    /// Power off virtual machines
    #[command(visible_alias = "off")]
    PowerOff(PowerArgs),
    /// Run a command on hosts over SSH
    Exec(ExecArgs),
}

#[derive(Debug, clap::Parser)]
#[command(version, about)]
struct Opts {
    #[command(subcommand)]
    command: Command,
}

async fn run_power(level: PowerLevel, args: PowerArgs) -> anyhow::Result<()> {
    let VdcArgs {
        location,
        username,
        password,
        proxy,
        delay,
        device_hash,
    } = args.vdc;
    let password = resolve_password(password, &format!("vDC password for {username}")).await?;

    let mut builder = VdcBuilder::new(location.clone());
    if let Some(proxy) = proxy {
        builder.proxy(proxy);
    }
    builder.device_hash(device_hash);
    let session = builder
        .build()?
        .login(&username, &password)
        .await
        .with_context(|| format!("Failed to log in to {location} as {username}"))?;

    power::toggle(&session, level, &args.vms, delay, &mut std::io::stdout()).await
}

async fn run_exec(args: ExecArgs) -> anyhow::Result<()> {
    let password = resolve_password(
        args.password,
        &format!("SSH password for {}", args.username),
    )
    .await?;
    let executor = SshExecutor::new(
        args.username.clone(),
        password,
        SshConfig {
            port: args.port,
            connect_timeout: args.connect_timeout,
        },
    );

    exec::run(
        &executor,
        &args.username,
        &args.hosts,
        &args.command,
        &mut std::io::stdout(),
    )
    .await
}

async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::PowerOn(args) => run_power(PowerLevel::On, args).await,
        Command::PowerOff(args) => run_power(PowerLevel::Off, args).await,
        Command::Exec(args) => run_exec(args).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let opt = match Opts::try_parse() {
        Ok(opt) => opt,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    ExitCode::from(finish(run(opt.command).await, &mut std::io::stdout()))
}

/// Report the outcome of a command, returning the process exit status
fn finish<W: Write>(result: anyhow::Result<()>, out: &mut W) -> u8 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            let _ = writeln!(out, "Error: {e:#}");
            let _ = writeln!(out, "{e:?}");
            1
        }
    }
}
