pub use podsync_types::prelude::*;
pub use podsync_types::request_adapter::{
	PendingRequest, PendingRequests, Pod, Request, RequestAdapter, RequestBody, RequestEndpoint,
	RequestToPodAdapter, RequestTx, RequestType,
};

// vim: ts=4
