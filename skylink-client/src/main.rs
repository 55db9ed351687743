// SkyLink client: geofence classification, trajectory prediction, key exchange and streamed transmission.

mod backend;
mod config;
mod driver;
mod runner;
mod sse;
#[cfg(test)]
mod testing;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use skylink_core::protocol::{TransmitRequest, TransmitResponse};
use skylink_core::trajectory::{self, DEFAULT_INTERVAL_SECS, DEFAULT_STEPS};
use skylink_core::{
    Flight, FullSimulationRequest, GeoPoint, KeyExchangeRequest, Motion, PipelineCoordinator,
    TrackSample,
};
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::backend::{Backend, HttpBackend};
use crate::runner::Runner;

#[derive(Parser, Debug)]
#[command(name = "skylink", version, about = "Geofenced, encrypted position transmission")]
struct Cli {
    /// Path to config file (overrides the default search path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether a position lies in a restricted zone
    Classify {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
    },
    /// Predict future positions and classify each one
    Predict {
        #[arg(long, allow_negative_numbers = true, required_unless_present_any = ["track", "icao24"])]
        lat: Option<f64>,
        #[arg(long, allow_negative_numbers = true, required_unless_present_any = ["track", "icao24"])]
        lon: Option<f64>,
        /// Ground speed in m/s
        #[arg(long, required_unless_present_any = ["track", "icao24"])]
        speed: Option<f64>,
        /// Heading in degrees clockwise from north
        #[arg(long, required_unless_present_any = ["track", "icao24"])]
        heading: Option<f64>,
        /// Track sample LAT,LON,UNIX_SECS; motion is taken from the last two
        #[arg(long, value_parser = parse_sample, num_args = 2.., conflicts_with_all = ["lat", "lon", "speed", "heading", "icao24"])]
        track: Vec<TrackSample>,
        /// Predict from a tracked flight's recorded positions
        #[arg(long, conflicts_with_all = ["lat", "lon", "speed", "heading"])]
        icao24: Option<String>,
        #[arg(long, default_value_t = DEFAULT_STEPS)]
        steps: u32,
        /// Seconds between predicted positions
        #[arg(long, default_value_t = DEFAULT_INTERVAL_SECS)]
        interval: f64,
    },
    /// Perform one key exchange and report its error rate
    Key {
        /// Simulate an eavesdropper
        #[arg(long)]
        eve: bool,
    },
    /// Classify, encrypt and stream a position, then verify the echo
    Run {
        #[arg(long, allow_negative_numbers = true, required_unless_present = "icao24")]
        lat: Option<f64>,
        #[arg(long, allow_negative_numbers = true, required_unless_present = "icao24")]
        lon: Option<f64>,
        /// Ground speed in m/s; with --heading, transmit the last predicted position instead
        #[arg(long, requires = "heading")]
        speed: Option<f64>,
        #[arg(long, requires = "speed")]
        heading: Option<f64>,
        /// Transmit the last predicted position of a tracked flight
        #[arg(long, conflicts_with_all = ["lat", "lon", "speed", "heading"])]
        icao24: Option<String>,
        #[arg(long, default_value_t = DEFAULT_STEPS)]
        steps: u32,
        #[arg(long, default_value_t = DEFAULT_INTERVAL_SECS)]
        interval: f64,
    },
    /// Send one two-bit symbol over the non-streaming path
    Transmit {
        /// One of 00, 01, 10, 11
        message: String,
        /// Key bits; a fresh key is exchanged when absent
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        eve: bool,
        /// Let the backend exchange the key and transmit in a single call
        #[arg(long, conflicts_with_all = ["key", "eve"])]
        full: bool,
    },
    /// List flights tracked by the navigation backend
    Flights,
    /// Query backend health
    Health,
}

fn parse_sample(s: &str) -> Result<TrackSample, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [lat, lon, ts] = parts.as_slice() else {
        return Err(format!("expected LAT,LON,UNIX_SECS, got {s:?}"));
    };
    let num = |v: &str| v.parse::<f64>().map_err(|e| format!("{v:?}: {e}"));
    Ok(TrackSample {
        point: GeoPoint::new(num(lat)?, num(lon)?),
        timestamp: ts.parse().map_err(|e| format!("{ts:?}: {e}"))?,
    })
}

fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn emit<T: Serialize>(json: bool, value: &T, human: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human(value);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let (cfg, path) = config::load(cli.config.as_deref()).context("failed to load configuration")?;
    match &path {
        Some(p) => info!(path = %p.display(), "loaded config"),
        None => info!("using default config"),
    }

    match cli.command {
        Command::Classify { lat, lon } => {
            let point = GeoPoint::new(lat, lon);
            let restricted = cfg.zone_set()?.is_restricted(&point);
            #[derive(Debug, Serialize)]
            struct Classified {
                point: GeoPoint,
                restricted: bool,
            }
            emit(cli.json, &Classified { point, restricted }, |c| {
                let status = if c.restricted { "restricted" } else { "clear" };
                println!("{:.5},{:.5}: {status}", c.point.latitude, c.point.longitude);
            })
        }
        Command::Predict {
            lat,
            lon,
            speed,
            heading,
            track,
            icao24,
            steps,
            interval,
        } => {
            let (origin, motion) = match (icao24, track.as_slice()) {
                (Some(id), _) => {
                    let backend = HttpBackend::new(&cfg)?;
                    block_on(flight_projection(&backend, &id))??
                }
                (None, [.., prev, last]) => {
                    let motion = Motion::from_samples(prev, last)
                        .context("track timestamps must increase")?;
                    (last.point, motion)
                }
                (None, _) => match (lat, lon, speed, heading) {
                    (Some(lat), Some(lon), Some(speed_mps), Some(heading_deg)) => (
                        GeoPoint::new(lat, lon),
                        Motion {
                            speed_mps,
                            heading_deg,
                        },
                    ),
                    _ => bail!("need --lat, --lon, --speed and --heading, --icao24, or two --track samples"),
                },
            };
            let zones = cfg.zone_set()?;
            let points = trajectory::annotate(&trajectory::predict(origin, motion, steps, interval), &zones);
            emit(cli.json, &points, |points| {
                for p in points {
                    let flag = if p.restricted { "  RESTRICTED" } else { "" };
                    println!(
                        "{:>3}  {:.5},{:.5}{flag}",
                        p.step_index, p.point.latitude, p.point.longitude
                    );
                }
            })
        }
        Command::Key { eve } => {
            let backend = HttpBackend::new(&cfg)?;
            let req = KeyExchangeRequest {
                num_qubits: cfg.num_qubits,
                eve,
            };
            let exchange = block_on(backend.exchange_key(&req))?.context("key exchange failed")?;
            let secure = exchange.is_secure(cfg.max_error_rate);
            if !secure {
                warn!(error_rate = exchange.error_rate, "key would be refused");
            }
            emit(cli.json, &exchange, |k| {
                println!("key:        {}", k.key);
                println!("error rate: {:.4}", k.error_rate);
                println!("secure:     {secure}");
            })
        }
        Command::Run {
            lat,
            lon,
            speed,
            heading,
            icao24,
            steps,
            interval,
        } => {
            let backend = HttpBackend::new(&cfg)?;
            let (mut point, motion) = match (icao24, lat, lon) {
                (Some(id), _, _) => {
                    let (origin, motion) = block_on(flight_projection(&backend, &id))??;
                    (origin, Some(motion))
                }
                (None, Some(lat), Some(lon)) => (
                    GeoPoint::new(lat, lon),
                    speed.zip(heading).map(|(speed_mps, heading_deg)| Motion {
                        speed_mps,
                        heading_deg,
                    }),
                ),
                _ => bail!("need --lat and --lon, or --icao24"),
            };
            if let Some(motion) = motion {
                if let Some(last) = trajectory::predict(point, motion, steps, interval).pop() {
                    info!(lat = last.latitude, lon = last.longitude, steps, "transmitting predicted position");
                    point = last;
                }
            }
            let mut coordinator = PipelineCoordinator::new(cfg.zone_set()?, cfg.layout()?);
            coordinator.set_max_error_rate(cfg.max_error_rate);
            let runner = Runner::new(backend, coordinator, cfg.num_qubits);
            let verified = block_on(async {
                let run = runner.run(point);
                tokio::pin!(run);
                tokio::select! {
                    r = &mut run => r,
                    Ok(()) = shutdown_signal() => {
                        info!("interrupted, cancelling run");
                        runner.cancel().await;
                        run.await
                    }
                }
            })?
            .map_err(|e| {
                let kind = if e.is_retryable() { "retryable" } else { "not retryable" };
                anyhow::Error::new(e).context(format!("run failed ({kind})"))
            })?;
            emit(cli.json, &verified, |v| {
                println!("run:        {}", v.run);
                println!("position:   {:.5},{:.5}", v.point.latitude, v.point.longitude);
                println!("restricted: {}", v.restricted);
                println!("rounds:     {}", v.rounds.len());
                println!("ciphertext: {}", v.ciphertext);
            })
        }
        Command::Transmit {
            message,
            key,
            eve,
            full,
        } => {
            let backend = HttpBackend::new(&cfg)?;
            if full {
                let req = FullSimulationRequest::new(&message, cfg.num_qubits)?;
                let response = block_on(backend.full_simulation(&req))??;
                return emit(cli.json, &response, |r| {
                    println!("key:        {}", r.qkd.key);
                    println!("error rate: {:.4}", r.qkd.error_rate);
                    print_transmit(&r.sdc);
                });
            }
            let response = block_on(async {
                let key = match key {
                    Some(k) => k,
                    None => {
                        let req = KeyExchangeRequest {
                            num_qubits: cfg.num_qubits,
                            eve,
                        };
                        backend.exchange_key(&req).await?.key
                    }
                };
                let req = TransmitRequest::new(&message, &key, eve)?;
                backend.transmit(&req).await
            })??;
            emit(cli.json, &response, print_transmit)
        }
        Command::Flights => {
            let backend = HttpBackend::new(&cfg)?;
            let zones = cfg.zone_set()?;
            #[derive(Debug, Serialize)]
            struct Tracked {
                #[serde(flatten)]
                flight: Flight,
                restricted: Option<bool>,
            }
            let tracked: Vec<Tracked> = block_on(backend.flights())??
                .into_iter()
                .map(|flight| {
                    let restricted = flight.position().map(|p| zones.is_restricted(&p));
                    Tracked { flight, restricted }
                })
                .collect();
            emit(cli.json, &tracked, |tracked| {
                for t in tracked {
                    let f = &t.flight;
                    let position = match f.position() {
                        Some(p) => format!("{:.5},{:.5}", p.latitude, p.longitude),
                        None => "-".to_string(),
                    };
                    let flag = if t.restricted == Some(true) { "  RESTRICTED" } else { "" };
                    println!(
                        "{:<8} {:<9} {position}{flag}",
                        f.icao24,
                        f.callsign.as_deref().unwrap_or("-").trim()
                    );
                }
            })
        }
        Command::Health => {
            let backend = HttpBackend::new(&cfg)?;
            let health = block_on(backend.health())??;
            emit(cli.json, &health, |h| println!("{}: {}", h.status, h.message))
        }
    }
}

fn print_transmit(r: &TransmitResponse) {
    if let Some(status) = &r.communication_status {
        println!("status:    {status}");
    }
    if let Some(decrypted) = &r.decrypted_message {
        println!("decrypted: {decrypted}");
    }
}

/// Origin and motion of a tracked flight, from its recorded positions when it has them.
async fn flight_projection(backend: &HttpBackend, icao24: &str) -> Result<(GeoPoint, Motion)> {
    let found = backend
        .flight(icao24)
        .await
        .with_context(|| format!("lookup of flight {icao24} failed"))?;
    found
        .projection()
        .with_context(|| format!("flight {icao24} has no usable position and motion"))
}

fn block_on<F: std::future::Future>(fut: F) -> Result<F::Output> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    Ok(rt.block_on(fut))
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
