use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use keyleds_devwatch::{
    Config, DeviceEvent, DeviceRegistry, DeviceWatcher, UdevPlatform, run_until,
};

#[macro_use]
extern crate tracing;

#[cfg(feature = "journald")]
fn journal_layer() -> Option<tracing_journald::Layer> {
    tracing_journald::layer().ok()
}

#[cfg(not(feature = "journald"))]
fn journal_layer() -> Option<tracing_subscriber::layer::Identity> {
    None
}

fn setup_logs() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = fmt::layer().with_target(false);
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new(format!(
        "warn,{}=info",
        env!("CARGO_CRATE_NAME")
    )));

    // `log` records are bridged by tracing-subscriber's tracing-log feature
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(journal_layer())
        .init();
}

#[derive(Parser, Debug)]
#[command(name = "keyleds-devwatch")]
#[command(about = "Watch for hotplugged input devices")]
struct Args {
    /// Configuration file, defaults to $XDG_CONFIG_HOME/keyleds/devwatch.kdl
    config: Option<PathBuf>,

    /// Print the matching devices once and exit
    #[arg(long)]
    list: bool,
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            Config::load(path).with_context(|| format!("failed to load {}", path.display()))?
        }
        None => {
            let path = Config::default_path().context("no configuration directory")?;
            Config::load_or_default(&path)
                .with_context(|| format!("failed to load {}", path.display()))?
        }
    };
    Ok(config)
}

fn print_devices(known: &DeviceRegistry) {
    let mut devices: Vec<_> = known.iter().map(|(_, device)| device).collect();
    devices.sort_by_key(|device| device.sys_path());
    for device in devices {
        println!(
            "{}\tsubsystem={} devtype={} devnode={}",
            device.sys_path(),
            device.subsystem(),
            device.dev_type(),
            device.dev_node()
        );
    }
}

fn log_event(event: &DeviceEvent, known: &DeviceRegistry) {
    let device = event.device();
    match event {
        DeviceEvent::Added(_) => info!(
            syspath = %device.sys_path(),
            devnode = %device.dev_node(),
            known = known.len(),
            "Device added"
        ),
        DeviceEvent::Removed(_) => info!(
            syspath = %device.sys_path(),
            known = known.len(),
            "Device removed"
        ),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    setup_logs();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    debug!(?config, "Loaded configuration");

    let mut watcher = DeviceWatcher::filtered(UdevPlatform, config.criteria.clone())
        .context("invalid match criteria")?;

    if args.list {
        watcher.scan().context("device scan failed")?;
        print_devices(watcher.known());
        return Ok(());
    }

    watcher.subscribe(log_event);
    watcher
        .set_active(true)
        .context("failed to start device monitoring")?;

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };
    run_until(&mut watcher, config.rescan_interval(), shutdown).await?;

    watcher.set_active(false)?;
    Ok(())
}
