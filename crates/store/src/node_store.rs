//! Postgres-backed sparse Merkle tree storage.
//!
//! [`PgNodeStore`] borrows a connection. Given a connection with an open
//! transaction, every read and write joins that transaction; each
//! [`NodeStore::commit`] additionally runs under its own savepoint so a
//! failed tree mutation leaves no partial nodes behind.

use async_trait::async_trait;
use sqlx::{Connection, PgConnection};
use tracing::trace;

use idenstate_core::field::{fr_from_le_bytes, fr_to_le_bytes};
use idenstate_core::smt::{Node, WriteBatch};
use idenstate_core::{Fr, NodeStore, StorageError};

use crate::error::{corrupt, db_id, storage_error, tree_id_from_db};

pub struct PgNodeStore<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgNodeStore<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

async fn insert_node(conn: &mut PgConnection, tree: i64, key: &Fr, node: &Node) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO mt_node (tree_id, node_key, node) VALUES ($1, $2, $3)
         ON CONFLICT (tree_id, node_key) DO NOTHING",
    )
    .bind(tree)
    .bind(&fr_to_le_bytes(key)[..])
    .bind(node.encode())
    .execute(conn)
    .await
    .map_err(storage_error)?;
    Ok(())
}

async fn upsert_root(conn: &mut PgConnection, tree: i64, root: &Fr) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO mt_root (tree_id, root) VALUES ($1, $2)
         ON CONFLICT (tree_id) DO UPDATE SET root = EXCLUDED.root, updated_at = now()",
    )
    .bind(tree)
    .bind(&fr_to_le_bytes(root)[..])
    .execute(conn)
    .await
    .map_err(storage_error)?;
    Ok(())
}

#[async_trait]
impl NodeStore for PgNodeStore<'_> {
    async fn next_tree_id(&mut self) -> Result<u64, StorageError> {
        let id: i64 = sqlx::query_scalar("SELECT nextval('mt_id_seq')")
            .fetch_one(&mut *self.conn)
            .await
            .map_err(storage_error)?;
        tree_id_from_db(id)
    }

    async fn get_node(&mut self, tree_id: u64, key: &Fr) -> Result<Option<Node>, StorageError> {
        let record: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT node FROM mt_node WHERE tree_id = $1 AND node_key = $2")
                .bind(db_id(tree_id)?)
                .bind(&fr_to_le_bytes(key)[..])
                .fetch_optional(&mut *self.conn)
                .await
                .map_err(storage_error)?;
        record.map(|bytes| Node::decode(&bytes)).transpose()
    }

    async fn put_node(&mut self, tree_id: u64, key: &Fr, node: &Node) -> Result<(), StorageError> {
        insert_node(&mut *self.conn, db_id(tree_id)?, key, node).await
    }

    async fn get_root(&mut self, tree_id: u64) -> Result<Option<Fr>, StorageError> {
        let record: Option<Vec<u8>> = sqlx::query_scalar("SELECT root FROM mt_root WHERE tree_id = $1")
            .bind(db_id(tree_id)?)
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(storage_error)?;
        record
            .map(|bytes| fr_from_le_bytes(&bytes).map_err(|e| corrupt("tree root", e)))
            .transpose()
    }

    async fn put_root(&mut self, tree_id: u64, root: &Fr) -> Result<(), StorageError> {
        upsert_root(&mut *self.conn, db_id(tree_id)?, root).await
    }

    async fn commit(&mut self, tree_id: u64, batch: WriteBatch) -> Result<(), StorageError> {
        let tree = db_id(tree_id)?;
        let (nodes, root) = batch.into_parts();
        let mut tx = self.conn.begin().await.map_err(storage_error)?;
        for (key, node) in &nodes {
            insert_node(&mut *tx, tree, key, node).await?;
        }
        if let Some(root) = root {
            upsert_root(&mut *tx, tree, &root).await?;
        }
        tx.commit().await.map_err(storage_error)?;
        trace!(tree_id, nodes = nodes.len(), "committed tree batch");
        Ok(())
    }
}
