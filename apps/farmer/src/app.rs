//! Application orchestrator: opens the store and runs the data channel.

use std::sync::Arc;

use shardkeep_data_channel::{ChannelServer, ServerEvent, TokenEntry};
use shardkeep_storage::{FsManager, validate_hash};
use tokio::sync::broadcast::error::RecvError;

use crate::config::{Config, Grant};

/// Runs the farmer until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let store = FsManager::open(&config.storage_path).await?;
    tracing::info!(path = %store.root().display(), "shard store opened");

    let server = ChannelServer::new(config.channel_settings(), Arc::new(store));
    let granted = apply_grants(&server, &config.grants);
    if granted > 0 {
        tracing::info!(granted, "static grants loaded");
    }

    let mut events = server.events();
    let addr = server.bind().await?;
    tracing::info!(%addr, "data channel ready");

    let server_run = Arc::clone(&server);
    let runner = tokio::spawn(async move { server_run.run().await });

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                break;
            }
            event = events.recv() => match event {
                Ok(ServerEvent::AcceptFailed(e)) => tracing::warn!("accept failed: {e}"),
                Ok(ServerEvent::Closed) | Err(RecvError::Closed) => break,
                Ok(ServerEvent::Listening(_)) | Err(RecvError::Lagged(_)) => {}
            },
        }
    }

    server.close();
    runner.await??;
    Ok(())
}

/// Authorizes the configured grants. Returns how many were accepted.
fn apply_grants(server: &ChannelServer, grants: &[Grant]) -> usize {
    let mut granted = 0;
    for grant in grants {
        if grant.token.is_empty() {
            tracing::warn!(hash = %grant.hash, "skipping grant without token");
            continue;
        }
        if let Err(e) = validate_hash(&grant.hash) {
            tracing::warn!("skipping grant: {e}");
            continue;
        }
        server.allow(grant.token.clone(), TokenEntry::with_ttl(&grant.hash, grant.ttl()));
        granted += 1;
    }
    granted
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardkeep_storage::{MemoryManager, content_hash};

    fn grant(token: &str, hash: &str) -> Grant {
        Grant {
            token: token.into(),
            hash: hash.into(),
            ttl_secs: 60,
        }
    }

    #[tokio::test]
    async fn grants_are_validated() {
        let server = ChannelServer::new(
            Config::default().channel_settings(),
            Arc::new(MemoryManager::new()),
        );
        let hash = content_hash(b"shard");
        let grants = vec![
            grant("tok1", &hash),
            grant("", &hash),
            grant("tok3", "../../etc/passwd"),
        ];

        assert_eq!(apply_grants(&server, &grants), 1);
        assert!(server.registry().contains("tok1"));
        assert_eq!(server.registry().len(), 1);
    }
}
