//! Remus broker binary.
//!
//! Usage:
//!     remus-broker --client-addr tcp://0.0.0.0:50505 --worker-addr tcp://0.0.0.0:50510

use clap::Parser;
use remus_broker::{BrokerArgs, BrokerConfig, NullFactory, Router, WorkerFactory};
use std::sync::mpsc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

fn main() -> anyhow::Result<()> {
    let args = BrokerArgs::parse();

    remus_logging::init_logging(remus_logging::LogConfig {
        app_name: "remus-broker",
        verbose: false,
        tui_mode: false,
    })?;

    info!(
        client_addr = %args.client_addr,
        worker_addr = %args.worker_addr,
        heartbeat_interval_ms = args.heartbeat_interval_ms,
        "starting remus-broker"
    );

    let factory = build_factory(&args)?;
    let config: BrokerConfig = (&args).into();

    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let shutdown_flag = Arc::new(AtomicBool::new(false));

    install_signal_handler(shutdown_flag.clone());
    std::thread::spawn(move || {
        while !shutdown_flag.load(Ordering::SeqCst) {
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
        let _ = stop_tx.send(());
    });

    let mut router = Router::bind(config, factory)?;
    router.run_with_shutdown(stop_rx)?;

    info!("remus-broker exiting");
    Ok(())
}

fn build_factory(args: &remus_broker::BrokerArgs) -> anyhow::Result<Box<dyn WorkerFactory>> {
    match &args.factory_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "launching with filesystem worker factory");
            let factory = remus_factory_fs::FsFactory::scan(dir, args.max_workers)?;
            Ok(Box::new(factory))
        }
        None => {
            info!("no --factory-dir given; broker will never launch workers itself");
            Ok(Box::new(NullFactory))
        }
    }
}

#[cfg(unix)]
fn install_signal_handler(flag: Arc<AtomicBool>) {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).expect("failed to register signal handlers");
    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!(signal = sig, "received signal, initiating shutdown");
            flag.store(true, Ordering::SeqCst);
        }
    });
}

#[cfg(windows)]
fn install_signal_handler(flag: Arc<AtomicBool>) {
    ctrlc::set_handler(move || {
        info!("received Ctrl+C, initiating shutdown");
        flag.store(true, Ordering::SeqCst);
    })
    .expect("failed to register Ctrl+C handler");
}
