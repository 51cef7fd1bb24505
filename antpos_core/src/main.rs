//! # antpos control core binary
//!
//! Loads the TOML configuration, brings the core up against the simulated
//! bus and logs the status snapshot once a second. An optional second
//! argument limits the run time in seconds, after which the orderly
//! shutdown runs and the process exits 0; without it the process runs
//! until killed. Real hardware integration supplies its own
//! [`FieldbusPort`](antpos_core::bus::FieldbusPort) and front-end.

use std::path::Path;
use std::process;
use std::time::{Duration, Instant};

use antpos::config::{load_config, RegisterMap};
use antpos_core::sim::SimBus;
use antpos_core::supervisor::Control;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| "antpos.toml".to_string());
    let run_seconds: Option<u64> = args.next().and_then(|s| s.parse().ok());

    let config = match load_config(Path::new(&config_path)) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, path = config_path, "configuration rejected");
            process::exit(1);
        }
    };
    let registers = RegisterMap::from(&config);

    let port = SimBus::new(config.period_ns() as u64);
    let control = match Control::new(&config, &registers, port) {
        Ok(control) => control,
        Err(err) => {
            error!(%err, "bring-up failed");
            process::exit(1);
        }
    };

    let started = Instant::now();
    loop {
        std::thread::sleep(Duration::from_secs(1));
        let status = control.status();
        info!(
            state = %status.state,
            az_pos = status.axes[0].cur_pos,
            el_pos = status.axes[1].cur_pos,
            dcsync_ns = status.dcsync_ns,
            exec_max_ns = status.timing.exec_max_ns,
            overruns = status.timing.overruns,
            "status"
        );
        if let Some(limit) = run_seconds {
            if started.elapsed() >= Duration::from_secs(limit) {
                break;
            }
        }
    }

    control.shutdown();
    info!("clean shutdown");
}
