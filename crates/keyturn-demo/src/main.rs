//! Demo: drive a complete lock session against the in-process
//! simulated lock.
//!
//! Runs the full flow - connect, discover, subscribe, fetch key
//! material, deliver the ticket, then unlock and lock over the secure
//! channel - and prints the notice stream as it arrives.
//!
//! RUST_LOG=debug shows every link event and state transition.

use anyhow::Result;
use tracing::info;

use keyturn_core::driver::LockDriver;
use keyturn_core::harness::{rig, SimulatedLockConfig};
use keyturn_core::session::SessionNotice;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = SimulatedLockConfig {
        pad_final_chunk: true, // exercise the firmware's padded chunks
        low_battery: true,
        ..Default::default()
    };
    let rig = rig(config).await;
    info!(lock = %rig.lock_id, "starting session against simulated lock");

    let mut notices = rig.notices;
    let audit = rig.audit.clone();

    let (driver, handle) = LockDriver::new(rig.session, rig.events);
    let driver_task = tokio::spawn(driver.run());

    let printer = tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            match notice {
                SessionNotice::Connecting => info!("notice: connecting"),
                SessionNotice::Ready => info!("notice: secure channel ready"),
                SessionNotice::LowBattery => info!("notice: lock battery is low"),
                SessionNotice::Locked => info!("notice: locked"),
                SessionNotice::Unlocked => info!("notice: unlocked"),
                SessionNotice::ConnectivityLost => info!("notice: connectivity lost"),
                SessionNotice::ConnectivityRestored => info!("notice: connectivity restored"),
                SessionNotice::Failed(failure) => info!(%failure, "notice: session failed"),
            }
        }
    });

    handle.connect().await?;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    handle.unlock().await?;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    handle.lock().await?;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    handle.close().await?;
    driver_task.await??;
    printer.await?;

    for event in audit.events().await {
        info!(?event, "audit");
    }

    Ok(())
}
