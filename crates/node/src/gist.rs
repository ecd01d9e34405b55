//! Local mirror of the global identity-state tree (GIST).
//!
//! Each identity with a published transition contributes
//! `Poseidon(genesis_id) -> last published state`; identities still at
//! genesis are absent, as on chain. Rebuilding scans every identity's log,
//! so the mirror is cached and rebuilt only when the published-transition
//! watermark moves.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tokio::sync::Mutex;
use tracing::debug;

use idenstate_circuits::{gist_key, GIST_DEPTH};
use idenstate_core::field::fr_to_decimal;
use idenstate_core::{Fr, Id, MemoryNodeStore, SparseMerkleTree};
use idenstate_store::{identity, state_transition};

use crate::error::NodeError;

const IDENTITY_PAGE: i64 = 500;

/// Count and latest time of published transitions.
pub type Watermark = (i64, Option<DateTime<Utc>>);

#[derive(Clone, Debug)]
pub struct GistSnapshot {
    pub store: MemoryNodeStore,
    pub tree: SparseMerkleTree,
}

#[derive(Debug, Default)]
pub struct GistCache {
    cached: Mutex<Option<(Watermark, GistSnapshot)>>,
}

impl GistCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the mirror at the current watermark, rebuilt if stale.
    pub async fn snapshot(&self, conn: &mut PgConnection) -> Result<GistSnapshot, NodeError> {
        let watermark = state_transition::published_watermark(&mut *conn).await?;
        let mut cached = self.cached.lock().await;
        if let Some(snapshot) = fresh(cached.as_ref(), &watermark) {
            return Ok(snapshot.clone());
        }
        let snapshot = build_gist(published_states(conn).await?).await?;
        *cached = Some((watermark, snapshot.clone()));
        Ok(snapshot)
    }
}

fn fresh<'a>(cached: Option<&'a (Watermark, GistSnapshot)>, watermark: &Watermark) -> Option<&'a GistSnapshot> {
    cached.filter(|(seen, _)| seen == watermark).map(|(_, snapshot)| snapshot)
}

/// Latest published state of every identity that has one.
async fn published_states(conn: &mut PgConnection) -> Result<Vec<(Id, Fr)>, NodeError> {
    let mut states = Vec::new();
    let mut offset = 0;
    loop {
        let page = identity::list(&mut *conn, None, IDENTITY_PAGE, offset).await?;
        for record in &page {
            let published = state_transition::list(&mut *conn, record.id)
                .await?
                .into_iter()
                .filter(|t| t.is_published())
                .last();
            if let Some(t) = published {
                states.push((record.did.id, t.new.state));
            }
        }
        if (page.len() as i64) < IDENTITY_PAGE {
            break;
        }
        offset += IDENTITY_PAGE;
    }
    Ok(states)
}

/// Build a GIST of [`GIST_DEPTH`] levels over `(genesis id, state)` leaves.
pub async fn build_gist<I>(states: I) -> Result<GistSnapshot, NodeError>
where
    I: IntoIterator<Item = (Id, Fr)>,
{
    let mut store = MemoryNodeStore::new();
    let mut tree = SparseMerkleTree::create(&mut store, GIST_DEPTH).await?;
    for (id, state) in states {
        tree.add(&mut store, gist_key(&id)?, state).await?;
    }
    debug!(root = %fr_to_decimal(&tree.root()), "built local GIST mirror");
    Ok(GistSnapshot { store, tree })
}
