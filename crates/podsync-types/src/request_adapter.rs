//! Adapter that stores outbound pod requests and their pending destinations.
//!
//! A request is one change notification; every destination pod it still has
//! to reach is recorded as a request-to-pod association. Associations are
//! created together with the request inside a [`RequestTx`], removed one pod
//! at a time by the delivery path, and requests left with no association are
//! purged by [`RequestAdapter::remove_with_empty_to`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::prelude::*;

/// Operation carried by a request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
	#[serde(rename = "add")]
	Add,
	#[serde(rename = "update")]
	Update,
	#[serde(rename = "remove")]
	Remove,
	#[serde(rename = "report-abuse")]
	ReportAbuse,
}

/// Remote resource kind a request is posted to
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RequestEndpoint {
	#[serde(rename = "videos")]
	Videos,
	#[serde(rename = "videos/qadu")]
	VideosQadu,
	#[serde(rename = "videos/events")]
	VideosEvents,
}

impl RequestEndpoint {
	pub fn as_str(&self) -> &'static str {
		match self {
			RequestEndpoint::Videos => "videos",
			RequestEndpoint::VideosQadu => "videos/qadu",
			RequestEndpoint::VideosEvents => "videos/events",
		}
	}
}

impl std::fmt::Display for RequestEndpoint {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for RequestEndpoint {
	type Err = Error;

	fn from_str(s: &str) -> ClResult<Self> {
		match s {
			"videos" => Ok(RequestEndpoint::Videos),
			"videos/qadu" => Ok(RequestEndpoint::VideosQadu),
			"videos/events" => Ok(RequestEndpoint::VideosEvents),
			_ => Err(Error::ValidationError(format!("unknown request endpoint: {}", s))),
		}
	}
}

/// Stored request body: the operation and its opaque payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestBody {
	#[serde(rename = "type")]
	pub typ: RequestType,
	pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
	#[serde(rename = "id")]
	pub request_id: RequestId,
	pub endpoint: RequestEndpoint,
	#[serde(rename = "request")]
	pub body: RequestBody,
	#[serde(rename = "createdAt")]
	pub created_at: Timestamp,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pod {
	#[serde(rename = "id")]
	pub pod_id: PodId,
	pub host: Box<str>,
	#[serde(rename = "publicKey")]
	pub public_key: Option<Box<str>>,
}

/// One request still pending delivery to one pod
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
	pub request: Request,
	pub pod: Pod,
}

/// Pending requests grouped by destination pod, each list in request order
pub type PendingRequests = BTreeMap<PodId, Vec<PendingRequest>>;

/// Atomic write scope for creating requests.
///
/// Writes made through a transaction become visible together on `commit`.
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait RequestTx: Send {
	async fn create_request(
		&mut self,
		endpoint: RequestEndpoint,
		body: &RequestBody,
	) -> ClResult<RequestId>;

	/// Associate a request with destination pods. Associating the same pair
	/// twice is a no-op.
	async fn set_pods(&mut self, request_id: RequestId, pod_ids: &[PodId]) -> ClResult<()>;

	async fn commit(self: Box<Self>) -> ClResult<()>;
	async fn rollback(self: Box<Self>) -> ClResult<()>;
}

/// Request collection
#[async_trait]
pub trait RequestAdapter: Debug + Send + Sync {
	/// Open an atomic scope for creating requests
	async fn begin(&self) -> ClResult<Box<dyn RequestTx>>;

	/// Fetch pending requests for at most `limit_pods` pods (oldest pending
	/// request first) and at most `limit_per_pod` requests per pod
	async fn list_pending(
		&self,
		limit_pods: usize,
		limit_per_pod: usize,
	) -> ClResult<PendingRequests>;

	async fn count_requests(&self) -> ClResult<u64>;

	/// Delete every request without a remaining association, returning the
	/// number of deleted requests
	async fn remove_with_empty_to(&self) -> ClResult<u64>;

	async fn remove_all(&self) -> ClResult<()>;
}

/// Request-to-pod association collection
#[async_trait]
pub trait RequestToPodAdapter: Debug + Send + Sync {
	/// Drop the associations between `pod_id` and the given requests, marking
	/// them delivered to that pod
	async fn remove_by_request_ids_and_pod(
		&self,
		request_ids: &[RequestId],
		pod_id: PodId,
	) -> ClResult<()>;

	/// Pods a request is still pending for, ascending
	async fn list_pod_ids(&self, request_id: RequestId) -> ClResult<Vec<PodId>>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_request_body_json() {
		let body =
			RequestBody { typ: RequestType::ReportAbuse, data: serde_json::json!({ "id": 42 }) };
		let json = serde_json::to_value(&body).unwrap();
		assert_eq!(json, serde_json::json!({ "type": "report-abuse", "data": { "id": 42 } }));
	}

	#[test]
	fn test_endpoint_from_str() {
		assert_eq!("videos/qadu".parse::<RequestEndpoint>().unwrap(), RequestEndpoint::VideosQadu);
		assert!("pods".parse::<RequestEndpoint>().is_err());
	}

	#[test]
	fn test_pod_skips_missing_key() {
		let pod = Pod { pod_id: PodId(3), host: "pod3.example.com".into(), public_key: None };
		let json = serde_json::to_value(&pod).unwrap();
		assert_eq!(json, serde_json::json!({ "id": 3, "host": "pod3.example.com" }));
	}
}

// vim: ts=4
