//! JSON Web Key records as published in a JWKS document.
//!
//! The provider pipeline treats a [`Jwk`] as opaque: it is keyed by `kid`
//! and passed through. Only [`Jwk::decoding_key`] looks at the
//! algorithm-specific members.

use crate::error::{JwksError, Result};
use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// JSON Web Key from a JWKS endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key ID - used to select the correct key for verification.
    pub kid: String,

    /// Key type (e.g. "RSA", "EC", "OKP").
    pub kty: String,

    /// Algorithm (e.g. "RS256").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// Key use (e.g. "sig").
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,

    /// Allowed operations. Publishers send either a list or a single string.
    #[serde(
        default,
        deserialize_with = "deserialize_key_ops",
        skip_serializing_if = "Option::is_none"
    )]
    pub key_ops: Option<Vec<String>>,

    /// X.509 certificate chain (base64 DER).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x5c: Option<Vec<String>>,

    /// X.509 certificate SHA-1 thumbprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x5t: Option<String>,

    /// X.509 certificate URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x5u: Option<String>,

    /// Algorithm-specific members (`n`, `e`, `crv`, `x`, `y`, ...).
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

/// JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct JwkSet {
    /// List of JSON Web Keys. A document without `keys` parses as empty.
    #[serde(default)]
    pub keys: Vec<Jwk>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KeyOps {
    One(String),
    Many(Vec<String>),
}

fn deserialize_key_ops<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let ops = Option::<KeyOps>::deserialize(deserializer)?;
    Ok(ops.map(|ops| match ops {
        KeyOps::One(op) => vec![op],
        KeyOps::Many(ops) => ops,
    }))
}

impl Jwk {
    /// Allowed operations joined with commas, `None` when absent or empty.
    #[must_use]
    pub fn operations(&self) -> Option<String> {
        match self.key_ops.as_deref() {
            None | Some([]) => None,
            Some(ops) => Some(ops.join(",")),
        }
    }

    /// String-valued algorithm-specific member.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.additional.get(name).and_then(serde_json::Value::as_str)
    }

    /// Build a verification key from the record's key material.
    ///
    /// # Errors
    ///
    /// Returns `JwksError::InvalidKey` if the key type is unsupported or a
    /// required component is missing or malformed.
    pub fn decoding_key(&self) -> Result<DecodingKey> {
        match self.kty.as_str() {
            "RSA" => {
                let n = self.required_attribute("n")?;
                let e = self.required_attribute("e")?;
                DecodingKey::from_rsa_components(n, e).map_err(|e| self.invalid(&e))
            }
            "EC" => {
                let x = self.required_attribute("x")?;
                let y = self.required_attribute("y")?;
                DecodingKey::from_ec_components(x, y).map_err(|e| self.invalid(&e))
            }
            "OKP" => {
                let x = self.required_attribute("x")?;
                DecodingKey::from_ed_components(x).map_err(|e| self.invalid(&e))
            }
            other => Err(JwksError::InvalidKey(format!(
                "Unsupported key type '{other}' for kid {}",
                self.kid
            ))),
        }
    }

    fn required_attribute(&self, name: &str) -> Result<&str> {
        self.attribute(name).ok_or_else(|| {
            JwksError::InvalidKey(format!(
                "Missing '{name}' component for kid {}",
                self.kid
            ))
        })
    }

    fn invalid(&self, err: &jsonwebtoken::errors::Error) -> JwksError {
        JwksError::InvalidKey(format!("Invalid key material for kid {}: {err}", self.kid))
    }
}
