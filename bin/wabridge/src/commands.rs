use std::time::Duration;

use anyhow::{bail, Context};
use tracing::info;

use wabridge_core::{Config, MessageQuery, Paths, SessionStartState};
use wabridge_orchestrator::Orchestrator;

fn load_config(paths: &Paths) -> anyhow::Result<Config> {
    Config::load(&paths.config_file()).context("loading config")
}

/// Build an orchestrator with an already-authenticated session, or fail
/// with a pointer to `wabridge start`.
async fn connect(paths: &Paths) -> anyhow::Result<Orchestrator> {
    let config = load_config(paths)?;
    let orchestrator = Orchestrator::new(config, paths);
    if !orchestrator.try_restore().await? {
        bail!("not authenticated — run `wabridge start` and scan the QR code first");
    }
    Ok(orchestrator)
}

pub async fn start(paths: &Paths, headed: bool, wait_secs: u64) -> anyhow::Result<()> {
    let mut config = load_config(paths)?;
    if headed {
        config.headless = false;
    }
    let orchestrator = Orchestrator::new(config, paths);

    if orchestrator.try_restore().await? {
        println!("Session restored — already authenticated.");
        orchestrator.close_session().await?;
        return Ok(());
    }

    let outcome = orchestrator.start_session().await?;
    match outcome.state {
        SessionStartState::Authenticated => {
            println!("Session authenticated.");
            orchestrator.close_session().await?;
            return Ok(());
        }
        SessionStartState::QrReady => {
            if let Ok(qr) = orchestrator.get_qr_code().await {
                println!("Scan this QR code with your phone:");
                println!("{}", qr.data_url);
            }
        }
        SessionStartState::Loading => {
            println!("Page is still loading; waiting for the interface...");
        }
    }

    // Poll until the scan lands or the wait budget runs out.
    let deadline = std::time::Instant::now() + Duration::from_secs(wait_secs);
    loop {
        if std::time::Instant::now() > deadline {
            orchestrator.close_session().await?;
            bail!("QR code was not scanned within {}s", wait_secs);
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        let status = orchestrator.get_status().await?;
        if status.authenticated {
            println!("Authenticated. Session profile saved for silent restore.");
            orchestrator.close_session().await?;
            return Ok(());
        }
        info!(state = ?status.state, "Waiting for authentication");
    }
}

pub fn status(paths: &Paths) -> anyhow::Result<()> {
    let config = load_config(paths)?;
    let orchestrator = Orchestrator::new(config, paths);
    let record = orchestrator.session_record();
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

pub async fn qr(paths: &Paths) -> anyhow::Result<()> {
    let config = load_config(paths)?;
    let orchestrator = Orchestrator::new(config, paths);
    let outcome = orchestrator.start_session().await?;
    if outcome.state == SessionStartState::Authenticated {
        orchestrator.close_session().await?;
        bail!("already authenticated; no QR code to show");
    }
    let qr = orchestrator.get_qr_code().await?;
    println!("{}", qr.data_url);
    orchestrator.close_session().await?;
    Ok(())
}

pub async fn messages(
    paths: &Paths,
    limit: Option<usize>,
    unread: bool,
    chat: Option<String>,
    contact: Option<String>,
) -> anyhow::Result<()> {
    let orchestrator = connect(paths).await?;
    let query = MessageQuery {
        limit,
        unread: unread.then_some(true),
        chat,
        contact,
    };
    let batch = orchestrator.get_messages(query).await?;
    println!("{}", serde_json::to_string_pretty(&batch)?);
    orchestrator.close_session().await?;
    Ok(())
}

pub async fn latest(paths: &Paths) -> anyhow::Result<()> {
    let orchestrator = connect(paths).await?;
    let batch = orchestrator.get_latest_message().await?;
    println!("{}", serde_json::to_string_pretty(&batch)?);
    orchestrator.close_session().await?;
    Ok(())
}

pub async fn send(paths: &Paths, chat: &str, message: &str) -> anyhow::Result<()> {
    let orchestrator = connect(paths).await?;
    let receipt = orchestrator.send_message(chat, message).await?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    orchestrator.close_session().await?;
    Ok(())
}

pub async fn chats(paths: &Paths) -> anyhow::Result<()> {
    let orchestrator = connect(paths).await?;
    let chats = orchestrator.list_chats().await?;
    println!("{}", serde_json::to_string_pretty(&chats)?);
    orchestrator.close_session().await?;
    Ok(())
}

pub async fn contacts(paths: &Paths) -> anyhow::Result<()> {
    let orchestrator = connect(paths).await?;
    let contacts = orchestrator.list_contacts().await?;
    println!("{}", serde_json::to_string_pretty(&contacts)?);
    orchestrator.close_session().await?;
    Ok(())
}

pub async fn unread(paths: &Paths) -> anyhow::Result<()> {
    let orchestrator = connect(paths).await?;
    let summary = orchestrator.unread_summary().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    orchestrator.close_session().await?;
    Ok(())
}

pub fn doctor(paths: &Paths) -> anyhow::Result<()> {
    println!("wabridge doctor");

    match wabridge_browser::find_chrome_binary() {
        Some(path) => println!("  [ok] browser binary: {}", path),
        None => println!("  [!!] no Chrome/Chromium binary found"),
    }

    let probe = paths.base.join(".doctor_probe");
    match std::fs::write(&probe, "ok") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            println!("  [ok] data dir writable: {}", paths.base.display());
        }
        Err(e) => println!("  [!!] data dir not writable: {}", e),
    }

    match Config::load(&paths.config_file()) {
        Ok(config) => println!(
            "  [ok] config loaded (headless={}, rateLimitDelayMs={})",
            config.headless, config.rate_limit_delay_ms
        ),
        Err(e) => println!("  [!!] config invalid: {}", e),
    }

    let record = wabridge_storage::SessionStore::new(paths.session_file()).load();
    println!(
        "  [ok] session record: authenticated={}, restoreFailed={:?}",
        record.authenticated, record.restore_failed
    );

    Ok(())
}
