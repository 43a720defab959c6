//! Request scheduler: creates requests and prepares them for dispatch cycles.
//!
//! The cycle driver itself (timing, network dispatch, retries) lives outside
//! this crate and is written against [`RequestKind`], so one driver can serve
//! several request kinds with different limits and storage.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use crate::batch::{self, RequestBatches};
use crate::prelude::*;
use crate::settings::RequestLimits;

/// Policy and storage a dispatch cycle needs for one kind of request
#[async_trait]
pub trait RequestKind: Send + Sync {
	/// Label used in diagnostics
	fn description(&self) -> &str;
	/// Maximum number of pods served per cycle
	fn limit_pods(&self) -> usize;
	/// Maximum number of requests grouped per pod per cycle
	fn limit_per_pod(&self) -> usize;

	fn request_adapter(&self) -> &dyn RequestAdapter;
	fn request_to_pod_adapter(&self) -> &dyn RequestToPodAdapter;

	fn build_request_objects(&self, requests: &PendingRequests) -> RequestBatches;

	/// Called by the driver once a cycle has been dispatched
	async fn after_requests_hook(&self);
}

#[derive(Debug, Clone)]
pub struct CreateRequestOptions<'a> {
	pub typ: RequestType,
	pub endpoint: RequestEndpoint,
	pub data: serde_json::Value,
	pub to_ids: &'a [PodId],
}

#[derive(Debug)]
pub struct RequestScheduler {
	limits: RequestLimits,
	description: &'static str,
	requests: Arc<dyn RequestAdapter>,
	request_to_pods: Arc<dyn RequestToPodAdapter>,
}

impl RequestScheduler {
	pub fn new<A>(adapter: Arc<A>, limits: RequestLimits) -> Self
	where
		A: RequestAdapter + RequestToPodAdapter + 'static,
	{
		let requests: Arc<dyn RequestAdapter> = adapter.clone();
		let request_to_pods: Arc<dyn RequestToPodAdapter> = adapter;
		Self { limits, description: "requests", requests, request_to_pods }
	}

	pub fn limits(&self) -> RequestLimits {
		self.limits
	}

	/// Queue a request for every pod in `opts.to_ids`.
	///
	/// The request and its pod associations are written through `tx`, so
	/// they become visible together when the caller commits. Nothing is
	/// written when there are no destination pods. Duplicate pod ids are
	/// associated once.
	pub async fn create_request(
		&self,
		opts: CreateRequestOptions<'_>,
		tx: &mut dyn RequestTx,
	) -> ClResult<Option<RequestId>> {
		// If there are no destination pods abort
		if opts.to_ids.is_empty() {
			return Ok(None);
		}

		let mut seen = HashSet::with_capacity(opts.to_ids.len());
		let pod_ids: Vec<PodId> =
			opts.to_ids.iter().copied().filter(|id| seen.insert(*id)).collect();

		let body = RequestBody { typ: opts.typ, data: opts.data };
		let request_id = tx.create_request(opts.endpoint, &body).await?;
		tx.set_pods(request_id, &pod_ids).await?;

		debug!(
			"→ REQUEST {}: {:?} on {} for {} pods",
			request_id,
			body.typ,
			opts.endpoint,
			pod_ids.len()
		);
		Ok(Some(request_id))
	}

	/// Fetch pending requests within the configured limits and group them
	pub async fn pending_batches(&self) -> ClResult<RequestBatches> {
		let pending =
			self.requests.list_pending(self.limits.limit_pods, self.limits.limit_per_pod).await?;
		Ok(batch::build_request_objects(&pending))
	}
}

#[async_trait]
impl RequestKind for RequestScheduler {
	fn description(&self) -> &str {
		self.description
	}

	fn limit_pods(&self) -> usize {
		self.limits.limit_pods
	}

	fn limit_per_pod(&self) -> usize {
		self.limits.limit_per_pod
	}

	fn request_adapter(&self) -> &dyn RequestAdapter {
		self.requests.as_ref()
	}

	fn request_to_pod_adapter(&self) -> &dyn RequestToPodAdapter {
		self.request_to_pods.as_ref()
	}

	fn build_request_objects(&self, requests: &PendingRequests) -> RequestBatches {
		batch::build_request_objects(requests)
	}

	/// Flush requests with no pod. Failures are logged only; the next cycle
	/// retries the purge.
	async fn after_requests_hook(&self) {
		match self.requests.remove_with_empty_to().await {
			Ok(0) => {}
			Ok(removed) => debug!("Removed {} {} with no pods", removed, self.description),
			Err(err) => error!("Error when removing {} with no pods: {}", self.description, err),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::batch::BatchKey;
	use crate::memory::InMemoryRequestAdapter;
	use std::sync::atomic::{AtomicUsize, Ordering};

	fn setup(pods: usize) -> (Arc<InMemoryRequestAdapter>, RequestScheduler, Vec<PodId>) {
		let _ = tracing_subscriber::fmt().with_test_writer().try_init();
		let adapter = InMemoryRequestAdapter::new();
		let pod_ids = (1..=pods)
			.map(|i| adapter.create_pod(&format!("pod{}.example.com", i), None).unwrap())
			.collect();
		let scheduler = RequestScheduler::new(adapter.clone(), RequestLimits::default());
		(adapter, scheduler, pod_ids)
	}

	fn opts(to_ids: &[PodId]) -> CreateRequestOptions<'_> {
		CreateRequestOptions {
			typ: RequestType::Add,
			endpoint: RequestEndpoint::Videos,
			data: serde_json::json!({ "id": 42 }),
			to_ids,
		}
	}

	async fn create(
		adapter: &InMemoryRequestAdapter,
		scheduler: &RequestScheduler,
		to_ids: &[PodId],
	) -> Option<RequestId> {
		let mut tx = adapter.begin().await.unwrap();
		let request_id = scheduler.create_request(opts(to_ids), tx.as_mut()).await.unwrap();
		tx.commit().await.unwrap();
		request_id
	}

	/// Counts calls and fails every write
	#[derive(Default)]
	struct RecordingTx {
		calls: Arc<AtomicUsize>,
	}

	#[async_trait]
	impl RequestTx for RecordingTx {
		async fn create_request(
			&mut self,
			_endpoint: RequestEndpoint,
			_body: &RequestBody,
		) -> ClResult<RequestId> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			Err(Error::DbError)
		}

		async fn set_pods(&mut self, _request_id: RequestId, _pod_ids: &[PodId]) -> ClResult<()> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			Err(Error::DbError)
		}

		async fn commit(self: Box<Self>) -> ClResult<()> {
			Ok(())
		}

		async fn rollback(self: Box<Self>) -> ClResult<()> {
			Ok(())
		}
	}

	/// Purge always fails
	#[derive(Debug, Default)]
	struct FailingAdapter {
		purges: AtomicUsize,
	}

	#[async_trait]
	impl RequestAdapter for FailingAdapter {
		async fn begin(&self) -> ClResult<Box<dyn RequestTx>> {
			Ok(Box::new(RecordingTx::default()))
		}

		async fn list_pending(&self, _: usize, _: usize) -> ClResult<PendingRequests> {
			Err(Error::DbError)
		}

		async fn count_requests(&self) -> ClResult<u64> {
			Err(Error::DbError)
		}

		async fn remove_with_empty_to(&self) -> ClResult<u64> {
			self.purges.fetch_add(1, Ordering::SeqCst);
			Err(Error::DbError)
		}

		async fn remove_all(&self) -> ClResult<()> {
			Err(Error::DbError)
		}
	}

	#[async_trait]
	impl RequestToPodAdapter for FailingAdapter {
		async fn remove_by_request_ids_and_pod(&self, _: &[RequestId], _: PodId) -> ClResult<()> {
			Err(Error::DbError)
		}

		async fn list_pod_ids(&self, _: RequestId) -> ClResult<Vec<PodId>> {
			Err(Error::DbError)
		}
	}

	#[tokio::test]
	async fn test_empty_destinations_write_nothing() {
		let (_adapter, scheduler, _) = setup(0);
		let mut tx = RecordingTx::default();
		let calls = tx.calls.clone();

		let res = scheduler.create_request(opts(&[]), &mut tx).await;
		assert!(matches!(res, Ok(None)));
		assert_eq!(calls.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn test_create_request_associates_every_pod() {
		let (adapter, scheduler, pods) = setup(7);
		let to_ids = [pods[4], pods[6]];

		let request_id = create(&adapter, &scheduler, &to_ids).await.unwrap();

		assert_eq!(adapter.count_requests().await.unwrap(), 1);
		assert_eq!(adapter.list_pod_ids(request_id).await.unwrap(), vec![pods[4], pods[6]]);

		let pending = adapter.list_pending(10, 10).await.unwrap();
		let request = &pending[&pods[4]][0].request;
		assert_eq!(request.endpoint, RequestEndpoint::Videos);
		assert_eq!(request.body.typ, RequestType::Add);
		assert_eq!(request.body.data, serde_json::json!({ "id": 42 }));
	}

	#[tokio::test]
	async fn test_duplicate_destinations_associated_once() {
		let (adapter, scheduler, pods) = setup(3);
		let to_ids = [pods[2], pods[0], pods[2], pods[0]];

		let request_id = create(&adapter, &scheduler, &to_ids).await.unwrap();

		assert_eq!(adapter.count_requests().await.unwrap(), 1);
		assert_eq!(adapter.list_pod_ids(request_id).await.unwrap(), vec![pods[0], pods[2]]);
	}

	#[tokio::test]
	async fn test_storage_error_propagates() {
		let (adapter, scheduler, pods) = setup(1);

		let mut tx = adapter.begin().await.unwrap();
		let res = scheduler.create_request(opts(&[pods[0], PodId(404)]), tx.as_mut()).await;
		assert!(matches!(res, Err(Error::DbError)));
		tx.rollback().await.unwrap();

		assert_eq!(adapter.count_requests().await.unwrap(), 0);
		assert!(adapter.list_pending(10, 10).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_create_composes_with_caller_transaction() {
		let (adapter, scheduler, pods) = setup(2);

		let mut tx = adapter.begin().await.unwrap();
		let first = scheduler.create_request(opts(&pods[..1]), tx.as_mut()).await.unwrap();
		let second = scheduler.create_request(opts(&pods), tx.as_mut()).await.unwrap();
		assert!(first.is_some() && second.is_some());
		assert_eq!(adapter.count_requests().await.unwrap(), 0);

		tx.commit().await.unwrap();
		assert_eq!(adapter.count_requests().await.unwrap(), 2);
	}

	#[tokio::test]
	async fn test_cleanup_after_delivery() {
		let (adapter, scheduler, pods) = setup(7);
		let request_id = create(&adapter, &scheduler, &[pods[4], pods[6]]).await.unwrap();

		// delivered to pod 7 only
		adapter.remove_by_request_ids_and_pod(&[request_id], pods[6]).await.unwrap();
		scheduler.after_requests_hook().await;
		assert_eq!(adapter.count_requests().await.unwrap(), 1);
		assert_eq!(adapter.list_pod_ids(request_id).await.unwrap(), vec![pods[4]]);

		adapter.remove_by_request_ids_and_pod(&[request_id], pods[4]).await.unwrap();
		scheduler.after_requests_hook().await;
		assert_eq!(adapter.count_requests().await.unwrap(), 0);
	}

	#[tokio::test]
	async fn test_cleanup_idempotent() {
		let (adapter, scheduler, pods) = setup(1);
		let delivered = create(&adapter, &scheduler, &pods).await.unwrap();
		let _pending = create(&adapter, &scheduler, &pods).await.unwrap();
		adapter.remove_by_request_ids_and_pod(&[delivered], pods[0]).await.unwrap();

		assert_eq!(adapter.remove_with_empty_to().await.unwrap(), 1);
		assert_eq!(adapter.remove_with_empty_to().await.unwrap(), 0);
		scheduler.after_requests_hook().await;
		assert_eq!(adapter.count_requests().await.unwrap(), 1);
	}

	#[tokio::test]
	async fn test_cleanup_hook_twice() {
		let (adapter, scheduler, pods) = setup(2);
		let delivered = create(&adapter, &scheduler, &pods).await.unwrap();
		let pending = create(&adapter, &scheduler, &pods).await.unwrap();
		for pod_id in &pods {
			adapter.remove_by_request_ids_and_pod(&[delivered], *pod_id).await.unwrap();
		}

		scheduler.after_requests_hook().await;
		assert_eq!(adapter.count_requests().await.unwrap(), 1);
		scheduler.after_requests_hook().await;
		assert_eq!(adapter.count_requests().await.unwrap(), 1);
		assert_eq!(adapter.list_pod_ids(pending).await.unwrap(), pods);
	}

	#[tokio::test]
	async fn test_cleanup_error_swallowed() {
		let adapter = Arc::new(FailingAdapter::default());
		let scheduler = RequestScheduler::new(adapter.clone(), RequestLimits::default());

		scheduler.after_requests_hook().await;
		scheduler.after_requests_hook().await;
		assert_eq!(adapter.purges.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn test_request_kind_surface() {
		let adapter = InMemoryRequestAdapter::new();
		let limits = RequestLimits::new(1, 2).unwrap();
		let scheduler = RequestScheduler::new(adapter.clone(), limits);
		let kind: &dyn RequestKind = &scheduler;

		assert_eq!(kind.description(), "requests");
		assert_eq!(kind.limit_pods(), 1);
		assert_eq!(kind.limit_per_pod(), 2);
		assert_eq!(kind.request_adapter().count_requests().await.unwrap(), 0);
	}

	#[tokio::test]
	async fn test_pending_batches_respect_limits() {
		let adapter = InMemoryRequestAdapter::new();
		let pods: Vec<PodId> = (1..=3)
			.map(|i| adapter.create_pod(&format!("pod{}.example.com", i), None).unwrap())
			.collect();
		let scheduler = RequestScheduler::new(adapter.clone(), RequestLimits::new(2, 2).unwrap());

		let mut ids = Vec::new();
		for _ in 0..3 {
			ids.push(create(&adapter, &scheduler, &pods).await.unwrap());
		}

		let batches = scheduler.pending_batches().await.unwrap();
		assert_eq!(batches.len(), 2);
		for (key, batch) in &batches {
			assert_eq!(key.endpoint, RequestEndpoint::Videos);
			assert_eq!(batch.ids, ids[..2].to_vec());
		}
		for pod_id in &pods[..2] {
			let key = BatchKey { pod_id: *pod_id, endpoint: RequestEndpoint::Videos };
			assert!(batches.contains_key(&key));
		}
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn test_concurrent_creates() {
		let (adapter, scheduler, pods) = setup(3);
		let scheduler = Arc::new(scheduler);

		let handles: Vec<_> = (0..16)
			.map(|_| {
				let adapter = adapter.clone();
				let scheduler = scheduler.clone();
				let pods = pods.clone();
				tokio::spawn(async move { create(&adapter, &scheduler, &pods).await })
			})
			.collect();

		for handle in handles {
			let request_id = handle.await.unwrap().unwrap();
			assert_eq!(adapter.list_pod_ids(request_id).await.unwrap(), pods);
		}
		assert_eq!(adapter.count_requests().await.unwrap(), 16);
	}
}

// vim: ts=4
