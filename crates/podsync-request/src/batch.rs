//! Grouping of pending requests into per-pod batches
//!
//! One batch is sent per (pod, endpoint) pair in a dispatch cycle. Grouping
//! works on an immutable snapshot and holds no state, so it is safe to call
//! from any number of tasks at once.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::prelude::*;

/// Batch grouping key. Displays as the pod id followed by the endpoint,
/// e.g. `3videos`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchKey {
	pub pod_id: PodId,
	pub endpoint: RequestEndpoint,
}

impl std::fmt::Display for BatchKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}{}", self.pod_id, self.endpoint)
	}
}

/// Requests to send to one pod on one endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct RequestBatch {
	pub to_pod: Pod,
	pub endpoint: RequestEndpoint,
	/// Request ids, to remove the associations once delivered
	pub ids: Vec<RequestId>,
	/// Request bodies, in the same order as `ids`
	pub datas: Vec<RequestBody>,
}

#[derive(Serialize)]
struct BatchPayload<'a> {
	data: &'a [RequestBody],
}

impl RequestBatch {
	/// JSON body posted to the pod's endpoint
	pub fn to_payload(&self) -> ClResult<serde_json::Value> {
		Ok(serde_json::to_value(BatchPayload { data: &self.datas })?)
	}
}

pub type RequestBatches = BTreeMap<BatchKey, RequestBatch>;

/// Group pending requests by (pod, endpoint).
///
/// Within a batch, requests keep their relative input order. Limits are not
/// applied here; the caller decides how much of the pending set to pass in.
pub fn build_request_objects(requests: &PendingRequests) -> RequestBatches {
	let mut grouped = RequestBatches::new();

	for (to_pod_id, pending) in requests {
		for PendingRequest { request, pod } in pending {
			let key = BatchKey { pod_id: *to_pod_id, endpoint: request.endpoint };

			let batch = grouped.entry(key).or_insert_with(|| RequestBatch {
				to_pod: pod.clone(),
				endpoint: request.endpoint,
				ids: Vec::new(),
				datas: Vec::new(),
			});

			batch.ids.push(request.request_id);
			batch.datas.push(request.body.clone());
		}
	}

	grouped
}


// vim: ts=4
