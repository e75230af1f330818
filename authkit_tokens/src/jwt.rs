//! Unverified decoding of compact JWTs
//!
//! Tokens handled by the store arrive from a server that the client already
//! trusts through its own session, so only the header and payload are
//! decoded; the signature is never checked here. Decoded values must only be
//! used to reason about a token's lifetime, never to authorize anything.

use authkit_clock::UnixTime;
use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{self, DecodeError};

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The untrusted header of a JWT
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Header(Map<String, Value>);

impl Header {
    /// The `alg` header, if present
    pub fn alg(&self) -> Option<&str> {
        self.0.get("alg").and_then(Value::as_str)
    }

    /// The `typ` header, if present
    pub fn typ(&self) -> Option<&str> {
        self.0.get("typ").and_then(Value::as_str)
    }

    /// The `kid` header, if present
    pub fn kid(&self) -> Option<&str> {
        self.0.get("kid").and_then(Value::as_str)
    }

    /// All header values
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// The untrusted claims of a JWT
///
/// Registered time claims are only reported when they are numbers; any
/// other representation is treated as absent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Map<String, Value>);

impl Claims {
    /// The `exp` claim
    pub fn exp(&self) -> Option<UnixTime> {
        self.time_claim("exp")
    }

    /// The `iat` claim
    pub fn iat(&self) -> Option<UnixTime> {
        self.time_claim("iat")
    }

    /// The `sub` claim
    pub fn sub(&self) -> Option<&str> {
        self.str_claim("sub")
    }

    /// The `sid` (session ID) claim
    pub fn sid(&self) -> Option<&str> {
        self.str_claim("sid")
    }

    /// The `org_id` claim
    pub fn org_id(&self) -> Option<&str> {
        self.str_claim("org_id")
    }

    /// Gets an arbitrary claim
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Deserializes an arbitrary claim into a concrete type
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.0
            .get(name)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    fn str_claim(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    fn time_claim(&self, name: &str) -> Option<UnixTime> {
        let value = self.0.get(name)?;
        if let Some(secs) = value.as_u64() {
            Some(UnixTime(secs))
        } else {
            // Fractional or negative times still count as numbers
            value
                .as_f64()
                .filter(|f| f.is_finite())
                .map(|f| UnixTime(f.max(0.0).floor() as u64))
        }
    }
}

impl From<Map<String, Value>> for Claims {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// The header and claims of a JWT, decoded without verification
#[derive(Clone, Debug, PartialEq)]
#[must_use]
pub struct DecodedJwt {
    header: Header,
    claims: Claims,
}

impl DecodedJwt {
    /// The untrusted header
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The untrusted claims
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// Extracts the header and claims
    pub fn extract(self) -> (Header, Claims) {
        (self.header, self.claims)
    }
}

/// Decodes the header and payload of a compact JWT
///
/// # Errors
///
/// Returns an error if the token does not have at least three `.`-separated
/// sections, or if either of the first two sections is not base64url-encoded
/// JSON.
pub fn decode(token: &str) -> Result<DecodedJwt, DecodeError> {
    let mut parts = token.split('.');
    let (h_str, p_str) = match (parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(p), Some(_)) => (h, p),
        _ => return Err(DecodeError::MalformedJwt),
    };

    let header = decode_section(h_str).map_err(error::malformed_jwt_header)?;
    let claims = decode_section(p_str).map_err(error::malformed_jwt_payload)?;

    Ok(DecodedJwt { header, claims })
}

fn decode_section<T: DeserializeOwned>(section: &str) -> Result<T, error::BoxError> {
    let raw = URL_SAFE_LENIENT.decode(section)?;
    Ok(serde_json::from_slice(&raw)?)
}

#[cfg(test)]
pub(crate) mod test_tokens {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use serde_json::json;

    use crate::AccessToken;

    /// Builds an unsigned token carrying the given claims
    pub(crate) fn with_claims(claims: serde_json::Value) -> AccessToken {
        let header = URL_SAFE_NO_PAD.encode(json!({ "alg": "RS256", "typ": "JWT" }).to_string());
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        AccessToken::new(format!("{header}.{payload}.c2lnbmF0dXJl"))
    }

    /// Builds a token issued at `iat` and expiring at `exp`
    pub(crate) fn issued(iat: u64, exp: u64) -> AccessToken {
        with_claims(json!({ "sub": "user_01", "sid": "session_01", "iat": iat, "exp": exp }))
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_header_and_claims() -> Result<()> {
        let token = test_tokens::with_claims(json!({
            "sub": "user_01",
            "sid": "session_01",
            "org_id": "org_01",
            "iat": 1_700_000_000u64,
            "exp": 1_700_003_600u64,
            "role": "admin",
        }));

        let decoded = decode(token.as_str())?;
        assert_eq!(decoded.header().alg(), Some("RS256"));
        assert_eq!(decoded.header().typ(), Some("JWT"));
        assert_eq!(decoded.claims().sub(), Some("user_01"));
        assert_eq!(decoded.claims().sid(), Some("session_01"));
        assert_eq!(decoded.claims().org_id(), Some("org_01"));
        assert_eq!(decoded.claims().iat(), Some(UnixTime(1_700_000_000)));
        assert_eq!(decoded.claims().exp(), Some(UnixTime(1_700_003_600)));
        assert_eq!(decoded.claims().get_as::<String>("role").as_deref(), Some("admin"));
        Ok(())
    }

    #[test]
    fn rejects_too_few_segments() {
        assert!(matches!(decode("not-a-jwt"), Err(DecodeError::MalformedJwt)));
        assert!(matches!(decode("a.b"), Err(DecodeError::MalformedJwt)));
    }

    #[test]
    fn rejects_bad_json() {
        let header = URL_SAFE_LENIENT.encode(b"{\"alg\":\"none\"}");
        let payload = URL_SAFE_LENIENT.encode(b"not json");
        let token = format!("{header}.{payload}.sig");
        assert!(matches!(
            decode(&token),
            Err(DecodeError::MalformedJwtPayload(_))
        ));

        assert!(matches!(
            decode("!!!.e30.sig"),
            Err(DecodeError::MalformedJwtHeader(_))
        ));
    }

    #[test]
    fn tolerates_padding() -> Result<()> {
        let token = "eyJhbGciOiJub25lIn0=.eyJleHAiOjF9.";
        let decoded = decode(token)?;
        assert_eq!(decoded.claims().exp(), Some(UnixTime(1)));
        Ok(())
    }

    #[test]
    fn non_numeric_times_are_absent() -> Result<()> {
        let token = test_tokens::with_claims(json!({ "exp": "tomorrow", "iat": 12.9 }));
        let decoded = decode(token.as_str())?;
        assert_eq!(decoded.claims().exp(), None);
        assert_eq!(decoded.claims().iat(), Some(UnixTime(12)));
        Ok(())
    }
}
