//! Shared fixtures: a platform-side signing key and its JWKS document.

#![allow(dead_code)]

// crates.io
use base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::{
	RsaPrivateKey,
	pkcs8::EncodePrivateKey,
	traits::PublicKeyParts,
};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

/// An RSA keypair standing in for the platform's token-signing key.
pub struct PlatformSigner {
	encoding: EncodingKey,
	pub kid: String,
	pub jwks_body: String,
}
impl PlatformSigner {
	pub fn generate(kid: &str) -> Self {
		let private = RsaPrivateKey::new(&mut rand_core::OsRng, 2048).expect("platform key");
		let public = private.to_public_key();
		let pem = private.to_pkcs8_pem(rsa::pkcs8::LineEnding::LF).expect("pem");
		let encoding = EncodingKey::from_rsa_pem(pem.as_bytes()).expect("encoding key");
		let jwks_body = serde_json::json!({
			"keys": [{
				"kty": "RSA",
				"use": "sig",
				"alg": "RS256",
				"kid": kid,
				"n": BASE64_URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
				"e": BASE64_URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
			}]
		})
		.to_string();

		Self { encoding, kid: kid.into(), jwks_body }
	}

	pub fn sign(&self, claims: &serde_json::Value) -> String {
		self.sign_with_kid(claims, &self.kid)
	}

	/// Sign with an arbitrary `kid`, which need not be in the JWKS.
	pub fn sign_with_kid(&self, claims: &serde_json::Value, kid: &str) -> String {
		let mut header = Header::new(Algorithm::RS256);

		header.kid = Some(kid.into());

		jsonwebtoken::encode(&header, claims, &self.encoding).expect("sign")
	}
}

/// Serve the signer's JWKS document at `/jwks` on the mock platform.
pub async fn mount_jwks(server: &MockServer, signer: &PlatformSigner) {
	Mock::given(method("GET"))
		.and(path("/jwks"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_string(signer.jwks_body.clone())
				.insert_header("content-type", "application/json"),
		)
		.mount(server)
		.await;
}
