//! Main mower-side executable entry point.
//!
//! # Architecture
//!
//! The executable runs three concurrent parts:
//!
//!     - Sampler thread, on a fixed period:
//!         - Power monitor sensing
//!         - IMU sensing and orientation estimation
//!         - Host statistics (1 Hz)
//!     - StateHub task, the only owner of the mower state:
//!         - Applies telemetry from the sampler
//!         - Applies telecommands from clients
//!         - Publishes the state to all clients
//!     - TmServer task, accepting websocket clients on `/ws`
//!
//! # Modules
//!
//! All processing modules (e.g. `orient_est`) shall meet the following requirements:
//!     1. Provide a public struct implementing the `util::module::State` trait.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::{eyre, WrapErr}, Report};
use log::{error, info, warn};
use std::sync::{atomic::{AtomicBool, Ordering}, Arc};
use std::thread;
use std::time::Duration;
use structopt::StructOpt;
use tokio::sync::watch;
use tokio::time;

// Internal
use comms_if::tm::MowerState;
use mower_lib::{
    host_stats::SysHostStats,
    hub::StateHub,
    orient_est::OrientEst,
    params::{MowerExecParams, SensorParams},
    sampler::Sampler,
    sens_driver::{Imu, PowerMonitor},
    tm_server::TmServer
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    module::State,
    session::Session,
    time::seconds_to_period_or
};

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

/// Mower telemetry and control executable
#[derive(Debug, StructOpt)]
#[structopt(name = "mower_exec")]
struct Opt {
    /// Parameter file, relative to `$MOWER_SW_ROOT/params`
    #[structopt(long, default_value = "mower_exec.toml")]
    params: String,

    /// Override the camera device given in the parameters
    #[structopt(long)]
    camera_device: Option<String>,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
#[tokio::main]
async fn main() -> Result<(), Report> {

    // ---- EARLY INITIALISATION ----

    color_eyre::install()?;

    let opt = Opt::from_args();

    // Initialise session
    let session = Session::new(
        "mower_exec",
        "sessions"
    ).wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session)
        .wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Mower Executable\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let mut params: MowerExecParams = util::params::load(&opt.params)
        .wrap_err("Could not load mower_exec params")?;

    if let Some(cam) = opt.camera_device {
        params.mower.camera_device_id = cam;
    }

    params.validate().wrap_err("Invalid mower_exec params")?;

    info!("Exec parameters loaded for \"{}\"", params.mower.name);
    info!("Camera device: {}", params.mower.camera_device_id);

    // ---- INITIALISE MODULES ----

    info!("Initialising modules...");

    let mut orient_est = OrientEst::default();
    orient_est.init(params.orient_est)
        .wrap_err("Failed to initialise OrientEst")?;
    info!("OrientEst init complete");

    let (power, imu) = start_sensors(&params.sensors);

    let state = MowerState::new(params.battery.voltage_nominal, params.battery.voltage_warn);
    let (hub, hub_handle) = StateHub::new(state, &params.hub);

    info!("Module initialisation complete\n");

    // ---- START TASKS ----

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stop_sampler = Arc::new(AtomicBool::new(false));
    let grace = seconds_to_period_or(params.shutdown_grace_s, Duration::ZERO);

    let tm_server = TmServer::bind(
        &params.api_server.listen_address,
        hub_handle.clone(),
        params.client.clone()
    ).await.wrap_err("Failed to initialise the TmServer")?;
    info!("TmServer initialised");

    let hub_task = tokio::spawn(hub.run(shutdown_rx.clone()));
    let server_task = tokio::spawn(tm_server.run(shutdown_rx, grace));

    let sampler = Sampler::new(
        power,
        imu,
        orient_est,
        Box::new(SysHostStats::new()),
        params.sensors.sample_period_s
    );
    let sampler_thread = {
        let stop = stop_sampler.clone();
        thread::Builder::new()
            .name("sampler".into())
            .spawn(move || sampler.run(hub_handle, stop))
            .wrap_err("Failed to start the sampler thread")?
    };

    info!("Mower running, Ctrl-C or SIGTERM to stop\n");

    // ---- WAIT FOR SHUTDOWN ----

    shutdown_signal()
        .await
        .wrap_err("Could not listen for the shutdown signal")?;

    info!("Shutdown requested");

    stop_sampler.store(true, Ordering::Relaxed);
    shutdown_tx.send(true).ok();

    // ---- SHUTDOWN ----

    match time::timeout(grace + Duration::from_secs(1), server_task).await {
        Ok(r) => r.wrap_err("TmServer task failed")?,
        Err(_) => warn!("TmServer did not stop in time")
    }

    let final_state = hub_task.await.wrap_err("StateHub task failed")?;
    info!(
        "Final state: battery {:.2} V, drive {} at {}, cutter {}",
        final_state.battery.voltage,
        final_state.drive.direction,
        final_state.drive.speed,
        final_state.cutter.speed
    );

    let sampler_join = tokio::task::spawn_blocking(move || sampler_thread.join());
    match time::timeout(grace, sampler_join).await {
        Ok(Ok(Ok(()))) => (),
        Ok(_) => return Err(eyre!("The sampler thread panicked")),
        Err(_) => warn!("Sampler did not stop in time")
    }

    info!("End of execution");

    Ok(())
}

/// Wait for Ctrl-C or SIGTERM.
#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = term.recv() => Ok(())
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Start the sensors given in the parameters. A sensor which can't be started is logged and left
/// out, the mower runs without its telemetry.
#[cfg(all(target_os = "linux", any(target_arch = "arm", target_arch = "aarch64")))]
fn start_sensors(
    params: &SensorParams
) -> (Option<Box<dyn PowerMonitor + Send>>, Option<Box<dyn Imu + Send>>) {
    use mower_lib::sens_driver::{ina219::Ina219, mpu9250::Mpu9250, I2cTransport, InitError};

    let power = params.ina219.as_ref().and_then(|p| {
        let started = I2cTransport::open(&p.device)
            .map_err(InitError::from)
            .and_then(|t| {
                let mut ina = Ina219::with_calibration(t, p.calibration, p.shunt_resistance_ohm);
                ina.start().map(|_| ina)
            });

        match started {
            Ok(ina) => {
                info!("INA219 started at {:#04x}", p.device.address);
                Some(Box::new(ina) as Box<dyn PowerMonitor + Send>)
            },
            Err(e) => {
                error!("Could not start the INA219, battery telemetry disabled: {}", e);
                None
            }
        }
    });

    let imu = params.mpu9250.as_ref().and_then(|p| {
        let started = I2cTransport::open(&p.device)
            .map_err(InitError::from)
            .and_then(|t| {
                let mut mpu = Mpu9250::new(t, rppal::hal::Delay::new(), p.config);
                mpu.start().map(|_| mpu)
            });

        match started {
            Ok(mpu) => {
                info!("MPU9250 started at {:#04x}", p.device.address);
                Some(Box::new(mpu) as Box<dyn Imu + Send>)
            },
            Err(e) => {
                error!("Could not start the MPU9250, compass telemetry disabled: {}", e);
                None
            }
        }
    });

    (power, imu)
}

#[cfg(not(all(target_os = "linux", any(target_arch = "arm", target_arch = "aarch64"))))]
fn start_sensors(
    params: &SensorParams
) -> (Option<Box<dyn PowerMonitor + Send>>, Option<Box<dyn Imu + Send>>) {
    if params.ina219.is_some() || params.mpu9250.is_some() {
        warn!("No I2C bus on this platform, running without sensors");
    }

    (None, None)
}
