//! Pod rows referenced by request associations

use sqlx::{Row, SqlitePool};

use podsync_types::prelude::*;
use podsync_types::request_adapter::Pod;

use crate::utils::*;

pub(crate) async fn create(
	db: &SqlitePool,
	host: &str,
	public_key: Option<&str>,
) -> ClResult<PodId> {
	let res = sqlx::query("INSERT INTO pods (host, public_key) VALUES (?, ?) RETURNING pod_id")
		.bind(host)
		.bind(public_key)
		.fetch_one(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	Ok(PodId(res.get(0)))
}

pub(crate) async fn read(db: &SqlitePool, pod_id: PodId) -> ClResult<Pod> {
	let res = sqlx::query("SELECT host, public_key FROM pods WHERE pod_id=?")
		.bind(pod_id.0)
		.fetch_one(db)
		.await;

	map_res(res, |row| {
		Ok(Pod { pod_id, host: row.try_get("host")?, public_key: row.try_get("public_key")? })
	})
}

/// Delete a pod; its pending associations go with it
pub(crate) async fn delete(db: &SqlitePool, pod_id: PodId) -> ClResult<()> {
	let res = sqlx::query("DELETE FROM pods WHERE pod_id=?")
		.bind(pod_id.0)
		.execute(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	if res.rows_affected() == 0 {
		return Err(Error::NotFound);
	}
	Ok(())
}

// vim: ts=4
