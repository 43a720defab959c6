//! Database schema initialization

use sqlx::SqlitePool;

/// Initialize the database schema with all required tables and indexes
pub(crate) async fn init_db(db: &SqlitePool) -> Result<(), sqlx::Error> {
	let mut tx = db.begin().await?;

	// Pods
	//******
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS pods (
		pod_id integer NOT NULL,
		host text NOT NULL,
		public_key text,
		created_at datetime DEFAULT (unixepoch()),
		PRIMARY KEY(pod_id)
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_pods_host ON pods(host)")
		.execute(&mut *tx)
		.await?;

	// Requests
	//**********
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS requests (
		request_id integer PRIMARY KEY AUTOINCREMENT,
		endpoint text NOT NULL,
		request json NOT NULL,		-- operation type and payload
		created_at datetime DEFAULT (unixepoch())
	)",
	)
	.execute(&mut *tx)
	.await?;

	// One row per pod a request is still pending for
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS request_to_pods (
		request_id integer NOT NULL REFERENCES requests(request_id) ON DELETE CASCADE,
		pod_id integer NOT NULL REFERENCES pods(pod_id) ON DELETE CASCADE,
		PRIMARY KEY(request_id, pod_id)
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_request_to_pods_podid
		ON request_to_pods(pod_id, request_id)",
	)
	.execute(&mut *tx)
	.await?;

	tx.commit().await?;

	Ok(())
}

// vim: ts=4
