//! Demo exporter continuously generating sample metrics and serving them on
//! `GET /metrics`.
//!
//! Configured via environment variables:
//! - `PORT`: port to listen on (`8085` by default);
//! - `LOGLEVEL`: [`EnvFilter`] directives (`info` by default).

use std::{env, net::SocketAddr, thread, time::Duration};

use anyhow::Context as _;
use promexporter::{LabelTuple, Recorder};
use rand_core::{OsRng, RngCore as _};
use tracing_subscriber::{
    fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter,
};

const NAMESPACE: &str = "companyNameSpace";

/// Period of generating a new sample.
const PERIOD: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(env::var("LOGLEVEL").ok().as_deref())?;

    let port = env::var("PORT").unwrap_or_else(|_| "8085".into());
    let port = port
        .parse::<u16>()
        .with_context(|| format!("invalid port `{port}`"))?;

    let recorder = Recorder::builder().build_and_install();
    let devs = recorder.declare_counter_vec(
        NAMESPACE,
        "devs",
        "We are testing this",
        ["method", "type"],
    )?;
    let prods = recorder.declare_counter_vec(
        NAMESPACE,
        "prods",
        "Production Metric",
        ["method", "type", "elevation"],
    )?;

    spawn_generator("devs", move || {
        devs.increment_with_values(&[random(5), random(5)])
    })?;
    spawn_generator("prods", move || {
        prods.increment_with_labels(
            &LabelTuple::new()
                .with("method", random(5))
                .with("type", random(5))
                .with("elevation", random(3)),
        )
    })?;

    tracing::info!(
        port,
        version = env!("CARGO_PKG_VERSION"),
        "starting demo exporter",
    );
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let registry = recorder.registry().clone();
    tokio::select! {
        res = promexporter::exposition::serve(addr, registry) => {
            res.context("failed to serve metrics")?;
        }
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for Ctrl+C")?;
            tracing::info!("shutting down");
        }
    }

    recorder.shutdown();
    Ok(())
}

fn init_logging(level: Option<&str>) -> anyhow::Result<()> {
    let filter = match level.filter(|l| !l.is_empty()) {
        Some(l) => EnvFilter::try_new(l)
            .with_context(|| format!("invalid log level `{l}`"))?,
        None => EnvFilter::new("info"),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json())
        .init();
    Ok(())
}

/// Spawns a thread submitting a sample via the provided `generate` closure
/// every [`PERIOD`], until it fails.
fn spawn_generator<F>(metric: &str, mut generate: F) -> anyhow::Result<()>
where
    F: FnMut() -> Result<(), promexporter::Error> + Send + 'static,
{
    let name = metric.to_owned();
    _ = thread::Builder::new()
        .name(format!("generator:{metric}"))
        .spawn(move || loop {
            thread::sleep(PERIOD);
            if let Err(e) = generate() {
                tracing::warn!(metric = %name, error = %e, "generator stopped");
                break;
            }
        })
        .with_context(|| format!("failed to spawn `{metric}` generator"))?;
    Ok(())
}

/// Returns a random label value in `0..bound` range.
fn random(bound: u32) -> String {
    (OsRng.next_u32() % bound).to_string()
}

