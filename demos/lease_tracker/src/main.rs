//! # lease_tracker
//!
//! Two replicas sharing one in-process log.
//!
//! The `owner` replica grants a handful of short leases. The `janitor`
//! replica reacts to each lease when it expires and releases it, which in
//! turn prunes the lease from both replicas.
//!
//! ## Configuration
//!
//! - `RUST_LOG` filters log output (default `info`).
//! - `LEASE_TTL_MS` sets the lease duration (default 500).

mod lease;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{TimeDelta, Utc};
use replica_reactor::{Db, DbConfig};
use replica_schema::Entity;
use replica_wire::{Manifest, MemoryLog};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lease::Lease;

const VERSION: &str = "leases-v1";
const DEFAULT_TTL_MS: u64 = 500;

fn lease_ttl() -> Result<Duration> {
    match std::env::var("LEASE_TTL_MS") {
        Ok(raw) => {
            let ms = raw.parse().with_context(|| format!("LEASE_TTL_MS={raw:?}"))?;
            Ok(Duration::from_millis(ms))
        }
        Err(_) => Ok(Duration::from_millis(DEFAULT_TTL_MS)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let ttl = lease_ttl()?;
    info!(ttl_ms = ttl.as_millis() as u64, "lease tracker starting");

    let log = MemoryLog::new(Manifest::new(VERSION, "leases"));

    let (owner, owner_reactor) = Db::open(
        DbConfig::new([VERSION], Arc::new(log.connect()))
            .track_entity::<Lease>()
            .with_source("owner"),
    )?;

    let (snapshots, mut observed) = mpsc::unbounded_channel();
    let (_janitor, janitor_reactor) = Db::open(
        DbConfig::new([VERSION], Arc::new(log.connect()))
            .track_entity::<Lease>()
            .with_source("janitor")
            .with_observer(snapshots)
            .with_reaction(|txn, batch| {
                let now = Utc::now();
                for eid in batch {
                    let Some(lease) = txn.get::<Lease>(eid.id()) else {
                        continue;
                    };
                    if lease.expired(now) {
                        info!(lease = %eid, holder = %lease.holder, "releasing expired lease");
                        txn.annotate("reason", "expired");
                        txn.set(Lease {
                            released: true,
                            ..(*lease).clone()
                        })?;
                    }
                }
                Ok(())
            }),
    )?;

    let owner_task = tokio::spawn(owner_reactor.run());
    let janitor_task = tokio::spawn(janitor_reactor.run());
    owner.ready().await?;

    let ttl = TimeDelta::from_std(ttl)?;
    let grants = [("l1", "printer", "alice"), ("l2", "scanner", "bob"), ("l3", "plotter", "alice")];
    for (n, (id, resource, holder)) in (1..).zip(grants) {
        owner
            .try_transact(|txn| {
                txn.annotate("reason", "granted");
                txn.set(Lease {
                    id: id.to_string(),
                    resource: resource.to_string(),
                    holder: holder.to_string(),
                    expires: Some(Utc::now() + ttl * n),
                    released: false,
                })?;
                Ok(())
            })
            .await?;
    }
    let held = owner.snapshot().search::<Lease>("by_holder", &[&"alice"]).len();
    info!(granted = grants.len(), held_by_alice = held, "leases granted");

    // The janitor's view empties once every lease has been released.
    let mut seen = false;
    while let Some(snapshot) = observed.recv().await {
        let live = snapshot.len::<Lease>();
        seen |= live > 0;
        info!(live, ts = %snapshot.ts(), "janitor view");
        if seen && live == 0 {
            break;
        }
    }

    // The owner prunes them too, once the releases reach it.
    while owner.snapshot().len::<Lease>() > 0 {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    info!(
        position = %owner.position(),
        kind = Lease::kind().name(),
        entries = log.entries().len(),
        "all leases released"
    );

    owner_task.abort();
    janitor_task.abort();
    Ok(())
}
