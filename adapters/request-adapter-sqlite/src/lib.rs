//! SQLite implementation of the podsync request adapter.
//!
//! Requests live in the `requests` table, their pending destinations in
//! `request_to_pods`. Foreign keys are enforced, so associating a request with
//! an unknown pod fails and deleting a pod drops its pending associations.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use sqlx::{
	SqliteConnection,
	sqlite::{self, SqlitePool},
};
use std::path::Path;

use podsync_types::prelude::*;
use podsync_types::request_adapter::{
	PendingRequests, Pod, RequestAdapter, RequestBody, RequestEndpoint, RequestToPodAdapter,
	RequestTx,
};

mod pod;
mod request;
mod schema;
mod utils;

use crate::utils::inspect;

pub const DB_FILE_NAME: &str = "requests.db";

#[derive(Debug)]
pub struct RequestAdapterSqlite {
	db: SqlitePool,
}

impl RequestAdapterSqlite {
	/// Open (or create) the request database inside `dir`
	pub async fn new(dir: impl AsRef<Path>) -> ClResult<Self> {
		tokio::fs::create_dir_all(dir.as_ref()).await?;

		let opts = sqlite::SqliteConnectOptions::new()
			.filename(dir.as_ref().join(DB_FILE_NAME))
			.create_if_missing(true)
			.foreign_keys(true)
			.journal_mode(sqlite::SqliteJournalMode::Wal);
		let db = sqlite::SqlitePoolOptions::new()
			.max_connections(5)
			.connect_with(opts)
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;

		schema::init_db(&db).await.inspect_err(inspect).or(Err(Error::DbError))?;

		Ok(Self { db })
	}

	/// Open a transaction that callers can also use for their own writes
	/// through [`SqliteRequestTx::conn`]
	pub async fn begin_tx(&self) -> ClResult<SqliteRequestTx> {
		let tx = self.db.begin().await.inspect_err(inspect).map_err(|_| Error::DbError)?;
		Ok(SqliteRequestTx { tx })
	}

	pub async fn create_pod(&self, host: &str, public_key: Option<&str>) -> ClResult<PodId> {
		pod::create(&self.db, host, public_key).await
	}

	pub async fn read_pod(&self, pod_id: PodId) -> ClResult<Pod> {
		pod::read(&self.db, pod_id).await
	}

	pub async fn delete_pod(&self, pod_id: PodId) -> ClResult<()> {
		pod::delete(&self.db, pod_id).await
	}
}

pub struct SqliteRequestTx {
	tx: sqlx::Transaction<'static, sqlx::Sqlite>,
}

impl SqliteRequestTx {
	pub fn conn(&mut self) -> &mut SqliteConnection {
		&mut self.tx
	}
}

#[async_trait]
impl RequestTx for SqliteRequestTx {
	async fn create_request(
		&mut self,
		endpoint: RequestEndpoint,
		body: &RequestBody,
	) -> ClResult<RequestId> {
		request::create(&mut self.tx, endpoint, body).await
	}

	async fn set_pods(&mut self, request_id: RequestId, pod_ids: &[PodId]) -> ClResult<()> {
		request::set_pods(&mut self.tx, request_id, pod_ids).await
	}

	async fn commit(self: Box<Self>) -> ClResult<()> {
		self.tx.commit().await.inspect_err(inspect).map_err(|_| Error::DbError)
	}

	async fn rollback(self: Box<Self>) -> ClResult<()> {
		self.tx.rollback().await.inspect_err(inspect).map_err(|_| Error::DbError)
	}
}

#[async_trait]
impl RequestAdapter for RequestAdapterSqlite {
	async fn begin(&self) -> ClResult<Box<dyn RequestTx>> {
		Ok(Box::new(self.begin_tx().await?))
	}

	async fn list_pending(
		&self,
		limit_pods: usize,
		limit_per_pod: usize,
	) -> ClResult<PendingRequests> {
		request::list_pending(&self.db, limit_pods, limit_per_pod).await
	}

	async fn count_requests(&self) -> ClResult<u64> {
		request::count(&self.db).await
	}

	async fn remove_with_empty_to(&self) -> ClResult<u64> {
		request::remove_with_empty_to(&self.db).await
	}

	async fn remove_all(&self) -> ClResult<()> {
		request::remove_all(&self.db).await
	}
}

#[async_trait]
impl RequestToPodAdapter for RequestAdapterSqlite {
	async fn remove_by_request_ids_and_pod(
		&self,
		request_ids: &[RequestId],
		pod_id: PodId,
	) -> ClResult<()> {
		request::remove_by_request_ids_and_pod(&self.db, request_ids, pod_id).await
	}

	async fn list_pod_ids(&self, request_id: RequestId) -> ClResult<Vec<PodId>> {
		request::list_pod_ids(&self.db, request_id).await
	}
}

// vim: ts=4
