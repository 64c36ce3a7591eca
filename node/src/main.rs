use std::{env, str::FromStr};

use anyhow::{Context, Result};
use engine::{EngineConfig, NetCoordinator, SingleProcess};
use log::info;
use tokio::signal;

mod demo;

const DEFAULT_MASTER_ADDR: &str = "127.0.0.1:29500";
const CONNECT_RETRIES: usize = 50;

/// Reads `key` from the environment, `default` if unset.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value.parse().with_context(|| format!("invalid {key}: {value}")),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let rank: usize = env_or("RANK", 0)?;
    let world_size: usize = env_or("WORLD_SIZE", 1)?;
    let master_addr: String = env_or("MASTER_ADDR", DEFAULT_MASTER_ADDR.to_string())?;

    let cfg = match env::var("CONFIG") {
        Ok(path) => EngineConfig::from_path(&path).with_context(|| format!("loading {path}"))?,
        Err(_) => EngineConfig::default(),
    };

    info!(rank = rank, world_size = world_size; "starting node");

    if world_size <= 1 {
        return demo::run(&mut SingleProcess, &cfg).await.map_err(Into::into);
    }

    let mut coord = NetCoordinator::establish(rank, world_size, master_addr, CONNECT_RETRIES)
        .await
        .context("joining the process group")?;

    tokio::select! {
        ret = demo::run(&mut coord, &cfg) => {
            ret?;
            info!("wrapping up, disconnecting...");
        }
        _ = signal::ctrl_c() => {
            info!("received SIGTERM");
            return Ok(());
        }
    }

    coord.shutdown().await?;
    Ok(())
}
