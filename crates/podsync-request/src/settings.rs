//! Request batching limits

use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// Default maximum number of pods served in one cycle
pub const REQUESTS_LIMIT_PODS: usize = 10;
/// Default maximum number of requests grouped per pod in one cycle
pub const REQUESTS_LIMIT_PER_POD: usize = 5;

pub const ENV_LIMIT_PODS: &str = "PODSYNC_REQUESTS_LIMIT_PODS";
pub const ENV_LIMIT_PER_POD: &str = "PODSYNC_REQUESTS_LIMIT_PER_POD";

/// Ceilings applied by the dispatch cycle when fetching pending requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRequestLimits")]
pub struct RequestLimits {
	#[serde(rename = "limitPods")]
	pub limit_pods: usize,
	#[serde(rename = "limitPerPod")]
	pub limit_per_pod: usize,
}

#[derive(Deserialize)]
struct RawRequestLimits {
	#[serde(rename = "limitPods")]
	limit_pods: usize,
	#[serde(rename = "limitPerPod")]
	limit_per_pod: usize,
}

impl TryFrom<RawRequestLimits> for RequestLimits {
	type Error = Error;

	fn try_from(raw: RawRequestLimits) -> ClResult<Self> {
		Self::new(raw.limit_pods, raw.limit_per_pod)
	}
}

impl Default for RequestLimits {
	fn default() -> Self {
		Self { limit_pods: REQUESTS_LIMIT_PODS, limit_per_pod: REQUESTS_LIMIT_PER_POD }
	}
}

impl RequestLimits {
	pub fn new(limit_pods: usize, limit_per_pod: usize) -> ClResult<Self> {
		if limit_pods == 0 {
			return Err(Error::ValidationError("limit_pods must be positive".into()));
		}
		if limit_per_pod == 0 {
			return Err(Error::ValidationError("limit_per_pod must be positive".into()));
		}
		Ok(Self { limit_pods, limit_per_pod })
	}

	/// Load limits from the process environment.
	///
	/// | Variable                          | Default |
	/// |-----------------------------------|---------|
	/// | `PODSYNC_REQUESTS_LIMIT_PODS`     | `10`    |
	/// | `PODSYNC_REQUESTS_LIMIT_PER_POD`  | `5`     |
	pub fn from_env() -> ClResult<Self> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ClResult<Self> {
		let limit_pods = parse_limit(ENV_LIMIT_PODS, lookup(ENV_LIMIT_PODS), REQUESTS_LIMIT_PODS)?;
		let limit_per_pod =
			parse_limit(ENV_LIMIT_PER_POD, lookup(ENV_LIMIT_PER_POD), REQUESTS_LIMIT_PER_POD)?;
		Self::new(limit_pods, limit_per_pod)
	}
}

fn parse_limit(name: &str, value: Option<String>, default: usize) -> ClResult<usize> {
	match value {
		None => Ok(default),
		Some(value) => value
			.trim()
			.parse()
			.map_err(|_| Error::ValidationError(format!("{} is not a number: {:?}", name, value))),
	}
}


// vim: ts=4
