// Copyright (C) 2023 QuerentAI LLC.
// This file is part of Querent.

// The Licensed Work is licensed under the Business Source License 1.1 (BSL 1.1).
// You may use this file in compliance with the BSL 1.1, subject to the following restrictions:
// 1. You may not use the Licensed Work for AI-related services, database services,
//    or any service or product offering that provides database, big data, or analytics
//    services to third parties unless explicitly authorized by QuerentAI LLC.
// 2. For more details, see the LICENSE file or visit https://mariadb.com/bsl11/.

// For inquiries about alternative licensing arrangements, please contact contact@querent.xyz.

// The Licensed Work is provided "AS IS", WITHOUT WARRANTY OF ANY KIND, express or implied,
// including but not limited to the warranties of merchantability, fitness for a particular purpose,
// and non-infringement. See the Business Source License for more details.

// This software includes code developed by QuerentAI LLC (https://querent.ai).

use rand::{distributions::Alphanumeric, prelude::*};

const ADJECTIVES: &[&str] = &[
	"amber",
	"ancient",
	"billowing",
	"bold",
	"broken",
	"cold",
	"crimson",
	"damp",
	"dawn",
	"empty",
	"falling",
	"frosty",
	"hidden",
	"icy",
	"lingering",
	"misty",
	"nameless",
	"patient",
	"polished",
	"quiet",
	"restless",
	"silent",
	"snowy",
	"solitary",
	"sparkling",
	"still",
	"twilight",
	"wandering",
	"weathered",
	"wild",
	"winter",
	"withered",
];

/// Returns a randomly generated, human readable id.
///
/// Ids generated from a single process are unique with overwhelming
/// probability: the 10 alphanumeric characters of the slug carry close
/// to 60 bits of entropy.
pub fn new_quid(name: &str) -> String {
	let mut rng = rand::thread_rng();
	let adjective = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
	let slug: String = rng.sample_iter(&Alphanumeric).take(10).map(char::from).collect();
	format!("{name}-{adjective}-{slug}")
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use super::new_quid;

	#[test]
	fn test_quid() {
		let cool_ids: HashSet<String> =
			std::iter::repeat_with(|| new_quid("req")).take(1000).collect();
		assert_eq!(cool_ids.len(), 1000);
	}

	#[test]
	fn test_quid_keeps_prefix() {
		let id = new_quid("stream");
		assert!(id.starts_with("stream-"));
	}
}
