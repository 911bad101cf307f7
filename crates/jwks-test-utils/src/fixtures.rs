//! Deterministic JWK fixtures.
//!
//! Key material is derived from a seed so the same kid always produces the
//! same record.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jwks_provider::Jwk;
use serde_json::{json, Value};

/// RSA modulus of a 2048-bit test key (base64url).
pub const TEST_RSA_MODULUS: &str = "vGChUGMTWZNfRsXxd-BtzC4RDYOMqtIhWHol--HNib5SgudWBg6rEcxvR6LWrx57N6vfo68wwT9_FHlZpaK6NXA_dWFW4f3NftfWLL7Bqy90sO4vijM6LMSE6rnl5VB9_Gsynk7_jyTgYWdTwKur0YRec93eha9oCEXmy7Ob1I2dJ8OQmv2GlvA7XZalMxAq4rFnXLzNQ7hCsHrUJP1p7_7SolWm9vTokkmckzSI_mAH2R27Z56DmI7jUkL9fLU-jz-fz4bkNg-mPz4R-kUmM_ld3-xvto79BtxJvOw5qqtLNnRjiDzoqRv-WrBdw5Vj8Pvrg1fwscfVWHlmq-1pFQ";

/// Deterministic 32-byte Ed25519 public key bytes for a kid.
fn okp_public_bytes(kid: &str) -> [u8; 32] {
    let seed = kid
        .bytes()
        .fold(0u8, |acc, b| acc.wrapping_mul(31).wrapping_add(b));
    let mut bytes = [0u8; 32];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = seed.wrapping_add(i as u8).wrapping_mul(7);
    }
    bytes
}

/// JSON form of an Ed25519 (OKP) signing key with the given kid.
///
/// # Example
/// ```rust,ignore
/// let value = test_jwk_json("key-1");
/// assert_eq!(value["kty"], "OKP");
/// ```
pub fn test_jwk_json(kid: &str) -> Value {
    json!({
        "kid": kid,
        "kty": "OKP",
        "crv": "Ed25519",
        "alg": "EdDSA",
        "use": "sig",
        "x": URL_SAFE_NO_PAD.encode(okp_public_bytes(kid)),
    })
}

/// Ed25519 (OKP) signing key with the given kid.
pub fn test_jwk(kid: &str) -> Jwk {
    serde_json::from_value(test_jwk_json(kid)).expect("fixture JWK should parse")
}

/// JSON form of an RSA signing key with the given kid.
pub fn test_rsa_jwk_json(kid: &str) -> Value {
    json!({
        "kid": kid,
        "kty": "RSA",
        "alg": "RS256",
        "use": "sig",
        "n": TEST_RSA_MODULUS,
        "e": "AQAB",
    })
}

/// JWKS document containing one Ed25519 key per kid.
///
/// # Example
/// ```rust,ignore
/// Mock::given(method("GET"))
///     .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body(&["a", "b"])))
///     .mount(&server)
///     .await;
/// ```
pub fn jwks_body(kids: &[&str]) -> Value {
    json!({
        "keys": kids.iter().map(|kid| test_jwk_json(kid)).collect::<Vec<_>>(),
    })
}
