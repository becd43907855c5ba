//! salttun CLI - userspace UDP VPN tunnel
//!
//! Settings come from `-c NAME VALUE` pairs, then an optional `KEY=VALUE`
//! file, then the environment (ifupdown style with `--ifupdown`).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use tracing_subscriber::{fmt, EnvFilter};

use salttun::config::{
    parse_config_file, EnvSource, IfupdownSource, LayeredSource, MapSource, TunnelSettings,
};
use salttun::protocol::{Context, ProtocolKind};
use salttun::transport::{resolve_addresses, Endpoint, UdpTransport};
use salttun::tunnel::{run_up_script, TunDevice, TunnelDevice};
use salttun::{SaltTunError, Session};

/// salttun - userspace UDP VPN tunnel
#[derive(Parser, Debug)]
#[command(name = "salttun")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Set a configuration value (takes precedence over everything else)
    #[arg(
        short = 'c',
        num_args = 2,
        value_names = ["NAME", "VALUE"],
        action = ArgAction::Append
    )]
    set: Vec<String>,

    /// Read environment settings the way ifupdown exports them (IF_QT_<NAME>)
    #[arg(long)]
    ifupdown: bool,

    /// Path to a KEY=VALUE configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    let source = match build_source(&args) {
        Ok(source) => source,
        Err(e) => return fail(&e),
    };

    let settings = match TunnelSettings::from_source(&source) {
        Ok(settings) => settings,
        Err(e) => return fail(&e.into()),
    };

    let filter = if args.verbose || settings.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(source, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(&e),
    }
}

fn fail(error: &SaltTunError) -> ExitCode {
    eprintln!("Error: {}", error.user_message());
    let code = u8::try_from(error.exit_code()).unwrap_or(u8::MAX);
    ExitCode::from(code)
}

/// Stack the configuration layers in lookup order
fn build_source(args: &Args) -> Result<LayeredSource, SaltTunError> {
    let mut source = LayeredSource::new();

    let pairs: MapSource = args
        .set
        .chunks(2)
        .filter_map(|pair| match pair {
            [name, value] => Some((name.clone(), value.clone())),
            _ => None,
        })
        .collect();
    source.push(pairs);

    if let Some(path) = &args.config {
        source.push(parse_config_file(path)?);
    }

    if args.ifupdown {
        source.push(IfupdownSource);
    } else {
        source.push(EnvSource);
    }

    Ok(source)
}

async fn run(source: LayeredSource, settings: TunnelSettings) -> Result<(), SaltTunError> {
    tracing::info!("salttun starting...");

    let (local, endpoint) = resolve_addresses(&settings).await?;

    let socket = UdpTransport::bind(local, &endpoint)?;
    match endpoint {
        Endpoint::Fixed(remote) => tracing::info!("Remote endpoint: {}", remote),
        Endpoint::Floating(Some(remote)) => {
            tracing::info!("Remote endpoint: {} (floating)", remote)
        }
        Endpoint::Floating(None) => tracing::info!("Waiting for the remote endpoint to appear"),
    }

    let device = TunDevice::create(&settings)?;
    if let Some(script) = &settings.up_script {
        run_up_script(script, device.name()).await?;
    }

    let kind = ProtocolKind::select(&source)?;
    let mut ctx = Context::new();
    let protocol = kind.build(&source, &mut ctx)?;

    let mut session = Session::new(device, socket, endpoint, protocol);
    session.flush(&mut ctx).await;
    session.run(shutdown_signal()).await
}

/// Completes on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use salttun::config::ConfigSource;
    use std::io::Write;

    #[test]
    fn test_command_line_pairs_take_precedence() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "PROTOCOL=nacl0\nLOCAL_PORT=4000").unwrap();

        let args = Args::parse_from([
            "salttun",
            "-c",
            "PROTOCOL",
            "salty",
            "--config",
            file.path().to_str().unwrap(),
            "-c",
            "INTERFACE",
            "tap7",
        ]);
        let source = build_source(&args).unwrap();

        assert_eq!(source.lookup("PROTOCOL").as_deref(), Some("salty"));
        assert_eq!(source.lookup("INTERFACE").as_deref(), Some("tap7"));
        assert_eq!(source.lookup("LOCAL_PORT").as_deref(), Some("4000"));
    }

    #[test]
    fn test_missing_config_file() {
        let args = Args::parse_from(["salttun", "--config", "/nonexistent/salttun.conf"]);
        assert!(matches!(build_source(&args), Err(SaltTunError::Config(_))));
    }

    #[test]
    fn test_debug_setting_reaches_settings() {
        let args = Args::parse_from(["salttun", "--ifupdown", "-c", "DEBUG", "1"]);
        let source = build_source(&args).unwrap();
        assert!(TunnelSettings::from_source(&source).unwrap().debug);
    }

    #[test]
    fn test_pair_needs_value() {
        assert!(Args::try_parse_from(["salttun", "-c", "PROTOCOL"]).is_err());
    }
}
