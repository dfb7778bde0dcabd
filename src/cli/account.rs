use std::{path::Path, sync::Arc};

use anyhow::Result;

use crate::{
    remote::identity::{self, AuthSession},
    storage::Storage,
    utils::clock::DefaultClock,
};

pub async fn process_login(
    data_dir: &Path,
    server_url: String,
    user_id: String,
    token: Option<String>,
) -> Result<()> {
    let session = AuthSession {
        server_url,
        user_id,
        token,
    };
    identity::save_session(data_dir, &session).await?;

    // Opening the store with a session on disk wires the remote in, so the
    // first reconciliation happens right here.
    let storage = super::open_storage(data_dir, Arc::new(DefaultClock)).await?;
    storage.close().await;

    println!("Logged in as {} at {}", session.user_id, session.server_url);
    let stats = storage.sync_stats();
    if stats.failed > 0 {
        println!("{} push(es) failed, check the logs", stats.failed);
    } else if stats.pushed > 0 {
        println!("Pushed {} document(s)", stats.pushed);
    }
    Ok(())
}

pub async fn process_logout(data_dir: &Path) -> Result<()> {
    if identity::load_session(data_dir).await?.is_none() {
        println!("Not logged in");
        return Ok(());
    }
    identity::clear_session(data_dir).await?;
    println!("Logged out. Local data is kept");
    Ok(())
}

pub async fn process_account(data_dir: &Path) -> Result<()> {
    match identity::load_session(data_dir).await? {
        Some(session) => {
            println!("Logged in as {} at {}", session.user_id, session.server_url);
            println!(
                "Token: {}",
                if session.token.is_some() { "set" } else { "none" }
            );
        }
        None => println!("Not logged in"),
    }
    Ok(())
}

pub async fn process_sync(storage: &Arc<Storage>) -> Result<()> {
    if !storage.is_logged_in() {
        println!("Not logged in");
        return Ok(());
    }

    let summary = storage.reconcile().await?;
    if summary.pushed_up {
        println!("Pushed local state to the server");
    } else {
        println!("Reconciled, pulled {} day batch(es)", summary.days_pulled);
    }
    Ok(())
}
