use anyhow::Result;
use base64::{
    Engine,
    engine::general_purpose::URL_SAFE_NO_PAD,
};
use hmac::{
    Hmac,
    Mac,
};
use sha2::Sha256;

use crate::{
    core::{
        error::TokenError,
        id::SessionId,
        roles::PeerRole,
        types::{
            Dictionary,
            Value,
        },
    },
    serializer::serializer::SerializerType,
};

type HmacSha256 = Hmac<Sha256>;

/// Signs a claim map into a compact token.
///
/// The token is two dot-separated base64url segments: the JSON-encoded
/// claims and an HMAC-SHA256 over the encoded claims, keyed by the shared
/// secret.
pub fn sign(secret: &str, claims: &Dictionary) -> Result<String> {
    let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| TokenError::Malformed(err.to_string()))?;
    mac.update(body.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    Ok(format!("{body}.{signature}"))
}

/// Verifies a compact token and returns its claim map.
///
/// Fails with [`TokenError::BadSignature`] when the MAC does not match,
/// which callers surface as a setup rejection or a per-frame drop.
pub fn verify(secret: &str, token: &str) -> Result<Dictionary> {
    let (body, signature) = token
        .split_once('.')
        .ok_or_else(|| TokenError::Malformed("expected two token segments".to_owned()))?;
    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|err| TokenError::Malformed(err.to_string()))?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| TokenError::Malformed(err.to_string()))?;
    mac.update(body.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| TokenError::BadSignature)?;
    let claims = URL_SAFE_NO_PAD
        .decode(body)
        .map_err(|err| TokenError::Malformed(err.to_string()))?;
    Ok(serde_json::from_slice(&claims).map_err(|err| TokenError::Malformed(err.to_string()))?)
}

/// The verified claims of a setup token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupClaims {
    /// Session ID chosen by the initiator.
    pub id: SessionId,
    /// Role the initiator takes on the session.
    pub role: PeerRole,
    /// Namespace the session is bound to.
    pub namespace: String,
    /// Serializer in effect after the setup exchange.
    pub serialization: SerializerType,
}

impl SetupClaims {
    /// Signs the claims into a setup token.
    pub fn into_token(&self, secret: &str) -> Result<String> {
        let claims = Dictionary::from_iter([
            ("id".to_owned(), Value::String(self.id.to_string())),
            (
                "type".to_owned(),
                Value::String(self.role.wire_name().to_owned()),
            ),
            ("namespace".to_owned(), Value::String(self.namespace.clone())),
            (
                "serialization".to_owned(),
                Value::String(self.serialization.wire_name().to_owned()),
            ),
        ]);
        sign(secret, &claims)
    }

    /// Verifies a setup token and decodes its claims.
    pub fn from_token(secret: &str, token: &str) -> Result<Self> {
        let claims = verify(secret, token)?;
        let claim = |key: &str| -> Result<&str> {
            claims
                .get(key)
                .and_then(Value::string)
                .ok_or_else(|| TokenError::Malformed(format!("missing claim '{key}'")).into())
        };
        Ok(Self {
            id: SessionId::try_from(claim("id")?)
                .map_err(|err| TokenError::Malformed(err.to_string()))?,
            role: PeerRole::try_from(claim("type")?)
                .map_err(|err| TokenError::Malformed(err.to_owned()))?,
            namespace: claim("namespace")?.to_owned(),
            serialization: SerializerType::try_from(claim("serialization")?)
                .map_err(|err| TokenError::Malformed(err.to_owned()))?,
        })
    }
}

/// Seals a request payload for a session with payload encryption enabled.
///
/// The payload map becomes the single claim `data` of a signed token, which
/// replaces the payload position of the envelope.
pub fn seal_payload(secret: &str, payload: Dictionary) -> Result<String> {
    sign(
        secret,
        &Dictionary::from_iter([("data".to_owned(), Value::Dictionary(payload))]),
    )
}

/// Opens a sealed request payload.
pub fn open_payload(secret: &str, token: &str) -> Result<Dictionary> {
    let mut claims = verify(secret, token)?;
    match claims.remove("data") {
        Some(Value::Dictionary(payload)) => Ok(payload),
        _ => Err(TokenError::Malformed("missing claim 'data'".to_owned()).into()),
    }
}

#[cfg(test)]
mod token_test {
    use crate::{
        auth::token::{
            SetupClaims,
            open_payload,
            seal_payload,
            sign,
            verify,
        },
        core::{
            error::TokenError,
            id::SessionId,
            roles::PeerRole,
            types::{
                Dictionary,
                Value,
            },
        },
        serializer::serializer::SerializerType,
    };

    const SECRET: &str = "abcd1234";

    #[test]
    fn round_trips_claims() {
        let claims = Dictionary::from_iter([("a".to_owned(), Value::Integer(1))]);
        let token = sign(SECRET, &claims).unwrap();
        pretty_assertions::assert_eq!(verify(SECRET, &token).unwrap(), claims);
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = sign(SECRET, &Dictionary::default()).unwrap();
        assert_matches::assert_matches!(verify("wxyz5678", &token), Err(err) => {
            assert_matches::assert_matches!(err.downcast_ref::<TokenError>(), Some(TokenError::BadSignature));
        });
    }

    #[test]
    fn rejects_tampered_body() {
        let claims = Dictionary::from_iter([("role".to_owned(), Value::String("user".to_owned()))]);
        let token = sign(SECRET, &claims).unwrap();
        let forged_claims =
            Dictionary::from_iter([("role".to_owned(), Value::String("admin".to_owned()))]);
        let forged = sign(SECRET, &forged_claims).unwrap();
        let spliced = format!(
            "{}.{}",
            forged.split_once('.').unwrap().0,
            token.split_once('.').unwrap().1
        );
        assert_matches::assert_matches!(verify(SECRET, &spliced), Err(err) => {
            assert_matches::assert_matches!(err.downcast_ref::<TokenError>(), Some(TokenError::BadSignature));
        });
    }

    #[test]
    fn rejects_garbage_token() {
        assert_matches::assert_matches!(verify(SECRET, "garbage"), Err(err) => {
            assert_matches::assert_matches!(err.downcast_ref::<TokenError>(), Some(TokenError::Malformed(_)));
        });
    }

    #[test]
    fn setup_claims_round_trip() {
        let claims = SetupClaims {
            id: SessionId::generate(),
            role: PeerRole::Server,
            namespace: "shared".to_owned(),
            serialization: SerializerType::Json,
        };
        let token = claims.into_token(SECRET).unwrap();
        pretty_assertions::assert_eq!(SetupClaims::from_token(SECRET, &token).unwrap(), claims);
    }

    #[test]
    fn sealed_payload_round_trips() {
        let payload = Dictionary::from_iter([
            ("action".to_owned(), Value::String("add".to_owned())),
            (
                "args".to_owned(),
                Value::List(Vec::from_iter([Value::Integer(1), Value::Integer(2)])),
            ),
        ]);
        let token = seal_payload(SECRET, payload.clone()).unwrap();
        pretty_assertions::assert_eq!(open_payload(SECRET, &token).unwrap(), payload);
    }
}
