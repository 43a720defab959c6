//! Request and request-to-pod persistence

use sqlx::{Row, SqliteConnection, SqlitePool, sqlite::SqliteRow};

use podsync_types::prelude::*;
use podsync_types::request_adapter::*;
use podsync_types::types::now;

use crate::utils::*;

/// Insert a request row, returning its id
pub(crate) async fn create(
	conn: &mut SqliteConnection,
	endpoint: RequestEndpoint,
	body: &RequestBody,
) -> ClResult<RequestId> {
	let request = serde_json::to_string(body)?;

	let res = sqlx::query(
		"INSERT INTO requests (endpoint, request, created_at)
		VALUES (?, ?, ?) RETURNING request_id",
	)
	.bind(endpoint.as_str())
	.bind(request)
	.bind(now().0)
	.fetch_one(&mut *conn)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	Ok(RequestId(res.get(0)))
}

/// Associate a request with pods. Existing pairs are kept as they are.
pub(crate) async fn set_pods(
	conn: &mut SqliteConnection,
	request_id: RequestId,
	pod_ids: &[PodId],
) -> ClResult<()> {
	for pod_id in pod_ids {
		sqlx::query("INSERT OR IGNORE INTO request_to_pods (request_id, pod_id) VALUES (?, ?)")
			.bind(request_id.0)
			.bind(pod_id.0)
			.execute(&mut *conn)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
	}

	Ok(())
}

fn read_pending(row: &SqliteRow, pod_id: PodId) -> Result<PendingRequest, sqlx::Error> {
	let endpoint: &str = row.try_get("endpoint")?;
	let body: &str = row.try_get("request")?;

	Ok(PendingRequest {
		request: Request {
			request_id: RequestId(row.try_get("request_id")?),
			endpoint: endpoint.parse().map_err(decode_err)?,
			body: serde_json::from_str(body).map_err(decode_err)?,
			created_at: Timestamp(row.try_get("created_at")?),
		},
		pod: Pod {
			pod_id,
			host: row.try_get("host")?,
			public_key: row.try_get("public_key")?,
		},
	})
}

/// List pending requests, pods with the oldest pending request first
pub(crate) async fn list_pending(
	db: &SqlitePool,
	limit_pods: usize,
	limit_per_pod: usize,
) -> ClResult<PendingRequests> {
	let mut tx = db.begin().await.inspect_err(inspect).map_err(|_| Error::DbError)?;

	let pods = sqlx::query(
		"SELECT rp.pod_id, min(rp.request_id) AS oldest
		FROM request_to_pods rp
		GROUP BY rp.pod_id
		ORDER BY oldest, rp.pod_id
		LIMIT ?",
	)
	.bind(limit_pods as i64)
	.fetch_all(&mut *tx)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;
	let pod_ids = collect_res(pods.iter().map(|row| row.try_get::<i64, _>("pod_id").map(PodId)))?;

	let mut res = PendingRequests::new();
	for pod_id in pod_ids {
		let rows = sqlx::query(
			"SELECT r.request_id, r.endpoint, r.request, r.created_at, p.host, p.public_key
			FROM request_to_pods rp
			JOIN requests r ON r.request_id=rp.request_id
			JOIN pods p ON p.pod_id=rp.pod_id
			WHERE rp.pod_id=?
			ORDER BY rp.request_id
			LIMIT ?",
		)
		.bind(pod_id.0)
		.bind(limit_per_pod as i64)
		.fetch_all(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

		let pending = collect_res(rows.iter().map(|row| read_pending(row, pod_id)))?;
		if !pending.is_empty() {
			res.insert(pod_id, pending);
		}
	}
	tx.commit().await.map_err(|_| Error::DbError)?;

	Ok(res)
}

pub(crate) async fn count(db: &SqlitePool) -> ClResult<u64> {
	let res = sqlx::query("SELECT count(*) FROM requests")
		.fetch_one(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	Ok(res.get::<i64, _>(0) as u64)
}

/// Delete requests no pod is waiting for. The predicate is evaluated by the
/// DELETE itself, so an association added concurrently keeps its request.
pub(crate) async fn remove_with_empty_to(db: &SqlitePool) -> ClResult<u64> {
	let res = sqlx::query(
		"DELETE FROM requests
		WHERE NOT EXISTS (
			SELECT 1 FROM request_to_pods rp WHERE rp.request_id=requests.request_id
		)",
	)
	.execute(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	Ok(res.rows_affected())
}

pub(crate) async fn remove_all(db: &SqlitePool) -> ClResult<()> {
	let mut tx = db.begin().await.map_err(|_| Error::DbError)?;

	sqlx::query("DELETE FROM request_to_pods")
		.execute(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	sqlx::query("DELETE FROM requests")
		.execute(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	tx.commit().await.map_err(|_| Error::DbError)?;

	Ok(())
}

pub(crate) async fn remove_by_request_ids_and_pod(
	db: &SqlitePool,
	request_ids: &[RequestId],
	pod_id: PodId,
) -> ClResult<()> {
	if request_ids.is_empty() {
		return Ok(());
	}

	let mut query = sqlx::QueryBuilder::new("DELETE FROM request_to_pods WHERE pod_id=");
	query.push_bind(pod_id.0).push(" AND request_id IN ");
	query = push_in_ids(query, request_ids);

	query.build().execute(db).await.inspect_err(inspect).map_err(|_| Error::DbError)?;

	Ok(())
}

pub(crate) async fn list_pod_ids(db: &SqlitePool, request_id: RequestId) -> ClResult<Vec<PodId>> {
	let res = sqlx::query("SELECT pod_id FROM request_to_pods WHERE request_id=? ORDER BY pod_id")
		.bind(request_id.0)
		.fetch_all(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	collect_res(res.iter().map(|row| row.try_get::<i64, _>("pod_id").map(PodId)))
}

// vim: ts=4
