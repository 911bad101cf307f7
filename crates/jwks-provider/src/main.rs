//! `jwks-resolve` - resolve signing keys by key id.
//!
//! Usage: `jwks-resolve <kid>...`
//!
//! The pipeline is configured from `JWKS_*` environment variables (see
//! [`ProviderConfig`]). Each resolved key is printed as one JSON line on
//! stdout; failures go to stderr and make the exit status non-zero.

use jwks_provider::{KeyProvider, ProviderConfig};
use std::io::Write;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let json_logs = std::env::var("JWKS_LOG_JSON").is_ok_and(|v| v.eq_ignore_ascii_case("true"));

    // Logs go to stderr, stdout carries resolved keys only
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jwks_provider=info,jwks_resolve=info".into()),
        )
        .with(json_logs.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();

    let kids: Vec<String> = std::env::args().skip(1).collect();
    if kids.is_empty() {
        eprintln!("usage: jwks-resolve <kid>...");
        return Ok(ExitCode::from(2));
    }

    let config = ProviderConfig::from_env().map_err(|e| {
        error!(target: "jwks.resolve", "Failed to load configuration: {}", e);
        e
    })?;
    let provider = config.into_builder()?.build()?;

    info!(target: "jwks.resolve", count = kids.len(), "Resolving keys");

    let failures = resolve_all(provider.as_ref(), &kids, &mut std::io::stdout().lock()).await?;

    if failures == 0 {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Resolve each kid in order, writing one JSON line per key to `out`.
///
/// Returns the number of kids that failed to resolve.
async fn resolve_all(
    provider: &dyn KeyProvider,
    kids: &[String],
    out: &mut impl Write,
) -> anyhow::Result<usize> {
    let mut failures = 0;

    for kid in kids {
        match provider.get(kid).await {
            Ok(jwk) => {
                serde_json::to_writer(&mut *out, &jwk)?;
                writeln!(out)?;
            }
            Err(e) => {
                failures += 1;
                error!(target: "jwks.resolve", kid = %kid, error_type = e.error_type(), "Key resolution failed");
                eprintln!("{kid}: {e}");
            }
        }
    }

    Ok(failures)
}
