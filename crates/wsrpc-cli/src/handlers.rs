//! Demo handlers served by the `wsrpc` binary.

use std::convert::Infallible;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;
use wsrpc_server::{InvocationContext, MethodRegistry, RegistryError};

/// Arguments of `hello`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct HelloArgs {
    /// Who to greet.
    pub name: String,
}

/// Arguments of `add`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct AddArgs {
    /// Seconds between pushes.
    pub duration: u64,
}

/// Register every demo handler.
pub fn register(registry: &MethodRegistry) -> Result<(), RegistryError> {
    registry.register_normal("hello", hello)?;
    registry.register_stream("add", add)?;
    Ok(())
}

/// `hello {Name}` → `"hello <Name>"`.
pub async fn hello(_ctx: InvocationContext, args: HelloArgs) -> Result<String, Infallible> {
    Ok(format!("hello {}", args.name))
}

/// `add {Duration}`: push `"cnt = N"` every `Duration` seconds until the
/// connection goes away.
pub async fn add(ctx: InvocationContext, args: AddArgs) -> Result<(), String> {
    if args.duration == 0 {
        return Err("Duration must be at least 1 second".into());
    }
    debug!(duration = args.duration, "add stream started");

    let period = Duration::from_secs(args.duration);
    let first = time::Instant::now()
        .checked_add(period)
        .ok_or_else(|| format!("Duration {} is out of range", args.duration))?;
    let mut ticker = time::interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut cnt = 0u64;
    loop {
        tokio::select! {
            () = ctx.cancelled() => {
                debug!(pushed = cnt, "add stream stopped");
                return Ok(());
            }
            _ = ticker.tick() => {}
        }
        ctx.push(&format!("cnt = {cnt}"))
            .await
            .map_err(|e| e.to_string())?;
        cnt += 1;
    }
}
