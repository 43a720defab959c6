//! In-memory request storage.
//!
//! Used by tests and by embedders that do not need persistence. Transaction
//! writes are buffered and applied under a single lock on commit.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use podsync_types::{lock, types::now};

use crate::prelude::*;

#[derive(Debug, Default)]
struct State {
	last_id: i64,
	last_pod_id: i64,
	requests: BTreeMap<RequestId, Request>,
	request_to_pods: BTreeSet<(RequestId, PodId)>,
	pods: BTreeMap<PodId, Pod>,
}

#[derive(Debug, Default)]
pub struct InMemoryRequestAdapter {
	state: Arc<Mutex<State>>,
}

impl InMemoryRequestAdapter {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn create_pod(&self, host: &str, public_key: Option<&str>) -> ClResult<PodId> {
		let mut state = lock!(self.state)?;
		state.last_pod_id += 1;
		let pod_id = PodId(state.last_pod_id);
		state.pods.insert(
			pod_id,
			Pod { pod_id, host: host.into(), public_key: public_key.map(Into::into) },
		);
		Ok(pod_id)
	}
}

#[derive(Debug)]
enum Write {
	Request(Request),
	Pod(RequestId, PodId),
}

struct InMemoryRequestTx {
	state: Arc<Mutex<State>>,
	writes: Vec<Write>,
}

impl InMemoryRequestTx {
	fn has_request(&self, state: &State, request_id: RequestId) -> bool {
		state.requests.contains_key(&request_id)
			|| self
				.writes
				.iter()
				.any(|w| matches!(w, Write::Request(r) if r.request_id == request_id))
	}
}

#[async_trait]
impl RequestTx for InMemoryRequestTx {
	async fn create_request(
		&mut self,
		endpoint: RequestEndpoint,
		body: &RequestBody,
	) -> ClResult<RequestId> {
		let request_id = {
			let mut state = lock!(self.state)?;
			state.last_id += 1;
			RequestId(state.last_id)
		};
		self.writes.push(Write::Request(Request {
			request_id,
			endpoint,
			body: body.clone(),
			created_at: now(),
		}));
		Ok(request_id)
	}

	async fn set_pods(&mut self, request_id: RequestId, pod_ids: &[PodId]) -> ClResult<()> {
		let state = lock!(self.state)?;
		if !self.has_request(&state, request_id) {
			warn!("DB: request {} does not exist", request_id);
			return Err(Error::DbError);
		}
		if let Some(pod_id) = pod_ids.iter().find(|pod_id| !state.pods.contains_key(pod_id)) {
			warn!("DB: pod {} does not exist", pod_id);
			return Err(Error::DbError);
		}
		drop(state);

		self.writes.extend(pod_ids.iter().map(|pod_id| Write::Pod(request_id, *pod_id)));
		Ok(())
	}

	async fn commit(self: Box<Self>) -> ClResult<()> {
		let InMemoryRequestTx { state, writes } = *self;
		let mut state = lock!(state)?;
		for write in writes {
			match write {
				Write::Request(request) => {
					state.requests.insert(request.request_id, request);
				}
				Write::Pod(request_id, pod_id) => {
					state.request_to_pods.insert((request_id, pod_id));
				}
			}
		}
		Ok(())
	}

	async fn rollback(self: Box<Self>) -> ClResult<()> {
		Ok(())
	}
}

#[async_trait]
impl RequestAdapter for InMemoryRequestAdapter {
	async fn begin(&self) -> ClResult<Box<dyn RequestTx>> {
		Ok(Box::new(InMemoryRequestTx { state: Arc::clone(&self.state), writes: Vec::new() }))
	}

	async fn list_pending(
		&self,
		limit_pods: usize,
		limit_per_pod: usize,
	) -> ClResult<PendingRequests> {
		let state = lock!(self.state)?;

		// Oldest pending request of every pod
		let mut oldest: BTreeMap<PodId, RequestId> = BTreeMap::new();
		for (request_id, pod_id) in &state.request_to_pods {
			oldest.entry(*pod_id).or_insert(*request_id);
		}
		let mut pods: Vec<(RequestId, PodId)> =
			oldest.into_iter().map(|(pod_id, request_id)| (request_id, pod_id)).collect();
		pods.sort();

		let mut res = PendingRequests::new();
		for (_, pod_id) in pods.into_iter().take(limit_pods) {
			let Some(pod) = state.pods.get(&pod_id) else { continue };
			let pending: Vec<PendingRequest> = state
				.request_to_pods
				.iter()
				.filter(|(_, p)| *p == pod_id)
				.filter_map(|(request_id, _)| state.requests.get(request_id))
				.take(limit_per_pod)
				.map(|request| PendingRequest { request: request.clone(), pod: pod.clone() })
				.collect();
			res.insert(pod_id, pending);
		}

		Ok(res)
	}

	async fn count_requests(&self) -> ClResult<u64> {
		Ok(lock!(self.state)?.requests.len() as u64)
	}

	async fn remove_with_empty_to(&self) -> ClResult<u64> {
		let mut state = lock!(self.state)?;
		let pending: BTreeSet<RequestId> =
			state.request_to_pods.iter().map(|(request_id, _)| *request_id).collect();
		let before = state.requests.len();
		state.requests.retain(|request_id, _| pending.contains(request_id));
		Ok((before - state.requests.len()) as u64)
	}

	async fn remove_all(&self) -> ClResult<()> {
		let mut state = lock!(self.state)?;
		state.request_to_pods.clear();
		state.requests.clear();
		Ok(())
	}
}

#[async_trait]
impl RequestToPodAdapter for InMemoryRequestAdapter {
	async fn remove_by_request_ids_and_pod(
		&self,
		request_ids: &[RequestId],
		pod_id: PodId,
	) -> ClResult<()> {
		let mut state = lock!(self.state)?;
		for request_id in request_ids {
			state.request_to_pods.remove(&(*request_id, pod_id));
		}
		Ok(())
	}

	async fn list_pod_ids(&self, request_id: RequestId) -> ClResult<Vec<PodId>> {
		let state = lock!(self.state)?;
		Ok(state
			.request_to_pods
			.range((request_id, PodId(i64::MIN))..=(request_id, PodId(i64::MAX)))
			.map(|(_, pod_id)| *pod_id)
			.collect())
	}
}


// vim: ts=4
