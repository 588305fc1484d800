// Local simulation: N devices sharing one simulated air and one matching
// service, each running a full Wave stack.

use anyhow::{Context, Result};
use chrono::Local;
use colored::*;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use wave_core::sim::{SimAir, SimBackend, SimLocationProvider};
use wave_core::{
    LocationFix, MemoryStorage, SessionObserver, WaveConfig, WaveCore, WavePlatform,
};

/// Center of the simulated venue
const VENUE_LATITUDE: f64 = 52.5200;
const VENUE_LONGITUDE: f64 = 13.4050;

pub struct SimulationOptions {
    pub devices: usize,
    pub duration: Duration,
}

#[derive(Debug, Default)]
pub struct SimulationReport {
    pub sessions_started: usize,
    pub discoveries: usize,
    pub matches: Vec<(String, String)>,
}

/// Session id to device name, filled in by the observers
#[derive(Default)]
struct SessionLog {
    owners: Mutex<HashMap<String, String>>,
}

impl SessionLog {
    fn record(&self, session_id: &str, device: &str) {
        self.owners
            .lock()
            .insert(session_id.to_string(), device.to_string());
    }

    fn owner(&self, session_id: &str) -> String {
        self.owners
            .lock()
            .get(session_id)
            .cloned()
            .unwrap_or_else(|| session_id.to_string())
    }
}

struct ConsoleObserver {
    device: String,
    sessions: Arc<SessionLog>,
    quiet: bool,
}

impl SessionObserver for ConsoleObserver {
    fn on_session_started(&self, session_id: &str) {
        self.sessions.record(session_id, &self.device);
        if !self.quiet {
            println!(
                "{} {} {} session {}",
                timestamp().dimmed(),
                self.device.bright_cyan(),
                "▶".green(),
                session_id.bright_yellow()
            );
        }
    }

    fn on_session_stopped(&self, session_id: &str) {
        if !self.quiet {
            println!(
                "{} {} {} session {}",
                timestamp().dimmed(),
                self.device.bright_cyan(),
                "■".red(),
                session_id.bright_yellow()
            );
        }
    }
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S%.3f").to_string()
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A fix scattered around the venue, within roughly 50 m
fn venue_fix(rng: &mut impl Rng) -> LocationFix {
    LocationFix::new(
        VENUE_LATITUDE + rng.gen_range(-0.0005..0.0005),
        VENUE_LONGITUDE + rng.gen_range(-0.0005..0.0005),
        rng.gen_range(30.0..40.0),
        rng.gen_range(5.0..20.0),
        now_ms(),
    )
}

/// Run the simulation to completion. With `quiet` nothing is printed.
pub async fn run(
    config: &WaveConfig,
    options: SimulationOptions,
    quiet: bool,
) -> Result<SimulationReport> {
    if options.devices == 0 {
        anyhow::bail!("At least one device is required");
    }

    // Simulated devices never touch the persisted preferences
    let config = WaveConfig {
        storage_path: None,
        ..config.clone()
    };

    info!(
        devices = options.devices,
        duration = ?options.duration,
        service = %config.service_id(),
        "Simulation starting"
    );

    let air = SimAir::new();
    let backend = Arc::new(SimBackend::new());
    let sessions = Arc::new(SessionLog::default());

    let mut cores = Vec::with_capacity(options.devices);
    let mut observers = Vec::with_capacity(options.devices);
    let mut providers = Vec::with_capacity(options.devices);

    for index in 0..options.devices {
        let name = format!("device-{}", index + 1);
        let device = air.add_device(&name);
        let provider = Arc::new(SimLocationProvider::auto_granting());
        let platform = WavePlatform {
            backend: backend.clone(),
            peripheral: device.peripheral(),
            central: device.central(),
            location: provider.clone(),
        };
        let core = WaveCore::with_storage(config.clone(), platform, Arc::new(MemoryStorage::new()));

        let observer = Arc::new(ConsoleObserver {
            device: name.clone(),
            sessions: sessions.clone(),
            quiet,
        });
        core.controller().set_observer(&observer);

        core.controller()
            .start()
            .await
            .with_context(|| format!("Failed to start {}", name))?;
        debug!(device = %name, "Simulated device started");

        cores.push(core);
        observers.push(observer);
        providers.push(provider);
    }

    {
        let mut rng = rand::thread_rng();
        for provider in &providers {
            provider.deliver_fix(venue_fix(&mut rng));
        }
    }

    let deadline = tokio::time::Instant::now() + options.duration;
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    while tokio::time::Instant::now() < deadline {
        ticker.tick().await;
        air.rebroadcast();
    }

    for core in &cores {
        core.controller().stop().await;
    }

    let reports = backend.reports();
    if !quiet {
        println!();
        println!("{}", "Discoveries".bold());
        for report in &reports {
            let position = match (report.latitude, report.longitude) {
                (Some(lat), Some(lon)) => format!("{:.5}, {:.5}", lat, lon),
                _ => "no fix".to_string(),
            };
            println!(
                "  {} saw {}  {}",
                sessions.owner(&report.session_id).bright_cyan(),
                sessions.owner(&report.discovered_session_id).bright_cyan(),
                position.dimmed()
            );
        }
    }

    let matches: Vec<(String, String)> = backend
        .matches()
        .into_iter()
        .map(|(a, b)| (sessions.owner(&a), sessions.owner(&b)))
        .collect();

    if !quiet {
        println!();
        println!("{}", "Matches".bold());
        if matches.is_empty() {
            println!("  {}", "none".dimmed());
        }
        for (a, b) in &matches {
            println!("  {} {} ⇄ {}", "✓".green(), a.bright_cyan(), b.bright_cyan());
        }
    }

    drop(observers);

    info!(
        sessions = backend.started_sessions().len(),
        discoveries = reports.len(),
        matches = matches.len(),
        "Simulation finished"
    );

    Ok(SimulationReport {
        sessions_started: backend.started_sessions().len(),
        discoveries: reports.len(),
        matches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_two_devices_match() {
        let report = run(
            &WaveConfig::default(),
            SimulationOptions {
                devices: 2,
                duration: Duration::from_millis(600),
            },
            true,
        )
        .await
        .unwrap();

        assert_eq!(report.sessions_started, 2);
        assert_eq!(report.discoveries, 2);
        assert_eq!(report.matches.len(), 1);
    }

    #[tokio::test]
    async fn test_single_device_sees_nobody() {
        let report = run(
            &WaveConfig::default(),
            SimulationOptions {
                devices: 1,
                duration: Duration::from_millis(300),
            },
            true,
        )
        .await
        .unwrap();

        assert_eq!(report.sessions_started, 1);
        assert_eq!(report.discoveries, 0);
        assert!(report.matches.is_empty());
    }

    #[tokio::test]
    async fn test_zero_devices_rejected() {
        let result = run(
            &WaveConfig::default(),
            SimulationOptions {
                devices: 0,
                duration: Duration::from_millis(10),
            },
            true,
        )
        .await;
        assert!(result.is_err());
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_simulation_logs_start_and_finish() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        run(
            &WaveConfig::default(),
            SimulationOptions {
                devices: 1,
                duration: Duration::from_millis(50),
            },
            true,
        )
        .await
        .unwrap();

        let output = String::from_utf8(logs.0.lock().clone()).unwrap();
        assert!(output.contains("Simulation starting"));
        assert!(output.contains("Simulation finished"));
        assert!(output.contains("devices=1"));
    }
}
