use sha2::{Digest, Sha256};

/// the stored form of a flag: lowercase hex SHA-256 of the trimmed value
pub fn hash_flag(raw: &str) -> String {
	format!("{:x}", Sha256::digest(raw.trim().as_bytes()))
}

/// checks a submitted flag against a stored digest
///
/// Empty or whitespace-only submissions never match, even against a digest of the empty string.
pub fn verify(submitted: &str, stored_digest: &str) -> bool {
	let submitted = submitted.trim();
	if submitted.is_empty() {
		return false;
	}

	constant_time_eq(hash_flag(submitted).as_bytes(), stored_digest.trim().as_bytes())
}

// length is not secret (every digest is 64 hex chars), content is
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}

	let mut diff = 0u8;
	for (x, y) in a.iter().zip(b) {
		diff |= x ^ y;
	}

	diff == 0
}
