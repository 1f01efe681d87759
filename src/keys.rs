//! Tool-side signing key management.
//!
//! Each platform registration owns a [`ToolKeySet`]: the RS256 keypairs the
//! tool signs deep-linking responses and client assertions with. Keys are
//! identified by a `kid` derived from the SHA-256 fingerprint of the public
//! SPKI, and a rotated key stays published through an overlap window so
//! in-flight tokens remain verifiable.

// crates.io
use base64::prelude::*;
use jsonwebtoken::EncodingKey;
use rsa::{
	RsaPrivateKey, RsaPublicKey,
	pkcs8::{EncodePrivateKey, EncodePublicKey},
	traits::PublicKeyParts,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

const RSA_BITS: usize = 2048;

/// A single RS256 signing keypair with rotation metadata.
#[derive(Clone)]
pub struct ToolKey {
	/// Key identifier carried in JWT headers and the published JWKS.
	pub kid: String,
	/// When the keypair was generated.
	pub created_at: DateTime<Utc>,
	/// Deadline after which the key is no longer published or used; `None`
	/// while the key is current.
	pub retire_after: Option<DateTime<Utc>>,
	private_pem: String,
	public: RsaPublicKey,
}
impl ToolKey {
	/// Generate a fresh 2048-bit RSA keypair.
	///
	/// The `rsa` crate draws randomness through the `rand_core` 0.6 traits, so
	/// key generation uses the OS RNG directly rather than the injected
	/// [`RandomSource`](crate::clock::RandomSource) seam.
	pub fn generate(now: DateTime<Utc>) -> Result<Self> {
		let private = RsaPrivateKey::new(&mut rand_core::OsRng, RSA_BITS)?;
		let public = private.to_public_key();
		let private_pem = private.to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)?.to_string();
		let kid = derive_kid(&public)?;

		Ok(Self { kid, created_at: now, retire_after: None, private_pem, public })
	}

	/// Signing key handle for `jsonwebtoken`.
	pub fn encoding_key(&self) -> Result<EncodingKey> {
		Ok(EncodingKey::from_rsa_pem(self.private_pem.as_bytes())?)
	}

	/// Public JWK representation for the tenant JWKS endpoint.
	pub fn public_jwk(&self) -> ToolJwk {
		ToolJwk {
			kty: "RSA".into(),
			key_use: "sig".into(),
			alg: "RS256".into(),
			kid: self.kid.clone(),
			n: BASE64_URL_SAFE_NO_PAD.encode(self.public.n().to_bytes_be()),
			e: BASE64_URL_SAFE_NO_PAD.encode(self.public.e().to_bytes_be()),
		}
	}

	/// Whether the key may still be published and used at `now`.
	pub fn is_live(&self, now: DateTime<Utc>) -> bool {
		self.retire_after.map(|deadline| now < deadline).unwrap_or(true)
	}
}
impl std::fmt::Debug for ToolKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		// Private material stays out of logs.
		f.debug_struct("ToolKey")
			.field("kid", &self.kid)
			.field("created_at", &self.created_at)
			.field("retire_after", &self.retire_after)
			.finish_non_exhaustive()
	}
}

/// Public JWK exported for one tool key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolJwk {
	/// Key type; always `RSA`.
	pub kty: String,
	/// Key usage; always `sig`.
	#[serde(rename = "use")]
	pub key_use: String,
	/// Signing algorithm; always `RS256`.
	pub alg: String,
	/// Key identifier.
	pub kid: String,
	/// RSA modulus, base64url.
	pub n: String,
	/// RSA public exponent, base64url.
	pub e: String,
}

/// JWKS document exported at the per-tenant JWKS endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolJwks {
	/// Published keys, newest first.
	pub keys: Vec<ToolJwk>,
}

/// The set of signing keys owned by one registration.
///
/// The newest live key is the current signing key; rotated keys remain in the
/// set (and in the published JWKS) until their overlap deadline passes.
#[derive(Clone, Debug)]
pub struct ToolKeySet {
	keys: Vec<ToolKey>,
}
impl ToolKeySet {
	/// Create a key set with a single freshly generated key.
	pub fn generate(now: DateTime<Utc>) -> Result<Self> {
		Ok(Self { keys: vec![ToolKey::generate(now)?] })
	}

	/// The current signing key.
	pub fn current(&self) -> Result<&ToolKey> {
		self.keys.last().ok_or_else(|| Error::Key("Key set is empty.".into()))
	}

	/// Look up a live key by `kid`.
	pub fn find(&self, kid: &str, now: DateTime<Utc>) -> Option<&ToolKey> {
		self.keys.iter().find(|key| key.kid == kid && key.is_live(now))
	}

	/// Rotate in a new signing key.
	///
	/// The previous current key gets a retire deadline of `now + overlap` and
	/// stays published until then; keys past their deadline are pruned.
	pub fn rotate(&mut self, now: DateTime<Utc>, overlap: Duration) -> Result<&ToolKey> {
		let overlap = chrono::TimeDelta::from_std(overlap).map_err(|err| {
			Error::Validation { field: "key_overlap", reason: err.to_string() }
		})?;

		if let Some(current) = self.keys.last_mut() {
			current.retire_after = Some(now + overlap);
		}

		self.keys.retain(|key| key.is_live(now));
		self.keys.push(ToolKey::generate(now)?);

		self.current()
	}

	/// Export every live key as a JWKS document, newest first.
	pub fn published_jwks(&self, now: DateTime<Utc>) -> ToolJwks {
		ToolJwks {
			keys: self.keys.iter().rev().filter(|key| key.is_live(now)).map(ToolKey::public_jwk).collect(),
		}
	}
}

fn derive_kid(public: &RsaPublicKey) -> Result<String> {
	let spki = public
		.to_public_key_der()
		.map_err(|err| Error::Key(format!("Failed to encode SPKI: {err}.")))?;
	let digest = Sha256::digest(spki.as_bytes());

	// First 16 bytes of the fingerprint give a compact, collision-safe kid.
	Ok(BASE64_URL_SAFE_NO_PAD.encode(&digest[..16]))
}
