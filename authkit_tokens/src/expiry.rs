//! Lifetime inspection and renewal timing for access tokens

use std::time::Duration;

use authkit_clock::{Clock, DurationSecs, System, UnixTime};
use serde::{Deserialize, Serialize};

use crate::{jwt, jwt::Claims, AccessTokenRef};

/// Configuration for deciding when a token should be renewed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExpiryPolicy {
    default_buffer: DurationSecs,
    short_lived_buffer: DurationSecs,
    short_lived_threshold: DurationSecs,
    #[serde(with = "millis")]
    min_refresh_delay: Duration,
    #[serde(with = "millis")]
    max_refresh_delay: Duration,
    #[serde(with = "millis")]
    opaque_retry_delay: Duration,
}

impl Default for ExpiryPolicy {
    /// Default expiry policy
    ///
    /// Tokens are renewed 60 seconds before they expire, or 30 seconds before
    /// if their total lifetime is 5 minutes or less. Renewal delays are
    /// clamped between 15 seconds and 24 hours. Tokens whose expiry cannot be
    /// determined are re-checked every 5 minutes.
    fn default() -> Self {
        Self {
            default_buffer: DurationSecs(60),
            short_lived_buffer: DurationSecs(30),
            short_lived_threshold: DurationSecs(300),
            min_refresh_delay: Duration::from_secs(15),
            max_refresh_delay: Duration::from_secs(24 * 60 * 60),
            opaque_retry_delay: Duration::from_secs(5 * 60),
        }
    }
}

impl ExpiryPolicy {
    /// Constructs a new policy
    ///
    /// A token is considered expiring once no more than `default_buffer` remains,
    /// or `short_lived_buffer` when its lifetime is no more than
    /// `short_lived_threshold`. Other values keep their defaults.
    pub fn new(
        default_buffer: DurationSecs,
        short_lived_buffer: DurationSecs,
        short_lived_threshold: DurationSecs,
    ) -> Self {
        Self {
            default_buffer,
            short_lived_buffer,
            short_lived_threshold,
            ..Self::default()
        }
    }

    /// Sets the bounds applied to any computed renewal delay
    pub fn with_refresh_delay_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.min_refresh_delay = min;
        self.max_refresh_delay = max.max(min);
        self
    }

    /// Sets the delay used to re-check tokens whose expiry is unknown
    pub fn with_opaque_retry_delay(mut self, delay: Duration) -> Self {
        self.opaque_retry_delay = delay;
        self
    }

    /// The buffer used for tokens with a normal lifetime
    pub fn default_buffer(&self) -> DurationSecs {
        self.default_buffer
    }

    /// The delay used to re-check tokens whose expiry is unknown
    pub fn opaque_retry_delay(&self) -> Duration {
        self.opaque_retry_delay
    }

    /// The shortest delay before a scheduled renewal
    pub fn min_refresh_delay(&self) -> Duration {
        self.min_refresh_delay
    }

    /// Inspects a token's lifetime using the system clock
    ///
    /// Returns `None` for tokens that cannot be introspected: anything that is
    /// not a JWT, or a JWT without a numeric `exp` claim.
    pub fn parse(&self, token: &AccessTokenRef) -> Option<TokenInfo> {
        self.parse_with_clock(token, &System)
    }

    /// Inspects a token's lifetime based on the current time as reported by
    /// the provided clock
    pub fn parse_with_clock<C: Clock + ?Sized>(
        &self,
        token: &AccessTokenRef,
        clock: &C,
    ) -> Option<TokenInfo> {
        self.parse_at(token, clock.now())
    }

    /// Inspects a token's lifetime as of the provided time
    pub fn parse_at(&self, token: &AccessTokenRef, now: UnixTime) -> Option<TokenInfo> {
        let claims = jwt::decode(token.as_str()).ok()?.extract().1;
        let expires_at = claims.exp()?;
        let issued_at = claims.iat();

        let lifetime = expires_at - issued_at.unwrap_or(now);
        let buffer = self.buffer_for(lifetime);

        Some(TokenInfo {
            time_until_expiry: now.seconds_until(expires_at),
            is_expiring: expires_at <= now + buffer,
            expires_at,
            issued_at,
            buffer,
            claims,
        })
    }

    /// The buffer applied to a token with the given total lifetime
    pub fn buffer_for(&self, lifetime: DurationSecs) -> DurationSecs {
        if lifetime <= self.short_lived_threshold {
            self.short_lived_buffer
        } else {
            self.default_buffer
        }
    }

    /// Computes how long to wait before renewing a token
    ///
    /// With an unknown remaining lifetime, the opaque retry delay is used.
    /// Tokens already inside `buffer` are due immediately. Otherwise the
    /// delay targets the start of the buffer window, clamped to the
    /// configured bounds.
    pub fn next_refresh_delay(
        &self,
        time_until_expiry: Option<i64>,
        buffer: DurationSecs,
    ) -> Duration {
        let remaining = match time_until_expiry {
            Some(remaining) => remaining,
            None => return self.opaque_retry_delay,
        };

        let buffer = i64::try_from(buffer.0).unwrap_or(i64::MAX);
        if remaining <= buffer {
            return Duration::ZERO;
        }

        let ideal = Duration::from_secs(remaining.abs_diff(buffer));
        self.clamp_delay(ideal)
    }

    /// Clamps a renewal delay into the configured bounds
    pub fn clamp_delay(&self, delay: Duration) -> Duration {
        delay.clamp(self.min_refresh_delay, self.max_refresh_delay)
    }

    /// Computes the renewal delay for a token that may or may not be a JWT
    pub fn refresh_delay_for(&self, token: &AccessTokenRef, now: UnixTime) -> Duration {
        match self.parse_at(token, now) {
            Some(info) => info.refresh_delay(self),
            None => self.opaque_retry_delay,
        }
    }
}

/// A token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is valid and outside of its renewal buffer
    Fresh,
    /// The token is valid, but should be renewed
    Expiring,
    /// The token is no longer valid
    Expired,
}

/// Lifetime information derived from a token's claims
#[derive(Clone, Debug, PartialEq)]
pub struct TokenInfo {
    claims: Claims,
    expires_at: UnixTime,
    issued_at: Option<UnixTime>,
    time_until_expiry: i64,
    buffer: DurationSecs,
    is_expiring: bool,
}

impl TokenInfo {
    /// The token's decoded claims
    #[inline]
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// The time the token expires
    #[inline]
    pub fn expires_at(&self) -> UnixTime {
        self.expires_at
    }

    /// The time the token was issued, if stated
    #[inline]
    pub fn issued_at(&self) -> Option<UnixTime> {
        self.issued_at
    }

    /// Seconds until expiry as of parsing; negative once expired
    #[inline]
    pub fn time_until_expiry(&self) -> i64 {
        self.time_until_expiry
    }

    /// The renewal buffer selected for this token
    #[inline]
    pub fn buffer(&self) -> DurationSecs {
        self.buffer
    }

    /// Whether the token is inside its renewal buffer
    #[inline]
    pub fn is_expiring(&self) -> bool {
        self.is_expiring
    }

    /// The token's status as of parsing
    pub fn status(&self) -> TokenStatus {
        if self.time_until_expiry <= 0 {
            TokenStatus::Expired
        } else if self.is_expiring {
            TokenStatus::Expiring
        } else {
            TokenStatus::Fresh
        }
    }

    /// How long to wait before renewing this token under `policy`
    pub fn refresh_delay(&self, policy: &ExpiryPolicy) -> Duration {
        policy.next_refresh_delay(Some(self.time_until_expiry), self.buffer)
    }
}

pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{jwt::test_tokens, AccessToken};

    const NOW: u64 = 1_700_000_000;

    fn policy() -> ExpiryPolicy {
        ExpiryPolicy::default()
    }

    #[test]
    fn short_lived_token_uses_small_buffer() {
        let token = test_tokens::issued(NOW - 15, NOW + 45);
        let info = policy().parse_at(&token, UnixTime(NOW)).unwrap();
        assert_eq!(info.buffer(), DurationSecs(30));
        assert_eq!(info.time_until_expiry(), 45);
        assert!(!info.is_expiring());
        assert_eq!(info.status(), TokenStatus::Fresh);

        let token = test_tokens::issued(NOW - 40, NOW + 20);
        let info = policy().parse_at(&token, UnixTime(NOW)).unwrap();
        assert_eq!(info.buffer(), DurationSecs(30));
        assert!(info.is_expiring());
        assert_eq!(info.status(), TokenStatus::Expiring);
    }

    #[test]
    fn long_lived_token_uses_default_buffer() {
        let token = test_tokens::issued(NOW - 3540, NOW + 60);
        let info = policy().parse_at(&token, UnixTime(NOW)).unwrap();
        assert_eq!(info.buffer(), DurationSecs(60));
        // The edge of the buffer already counts as expiring
        assert!(info.is_expiring());

        let info = policy().parse_at(&token, UnixTime(NOW - 1)).unwrap();
        assert!(!info.is_expiring());
    }

    #[test]
    fn lifetime_threshold_is_inclusive() {
        let token = test_tokens::issued(NOW, NOW + 300);
        let info = policy().parse_at(&token, UnixTime(NOW)).unwrap();
        assert_eq!(info.buffer(), DurationSecs(30));

        let token = test_tokens::issued(NOW, NOW + 301);
        let info = policy().parse_at(&token, UnixTime(NOW)).unwrap();
        assert_eq!(info.buffer(), DurationSecs(60));
    }

    #[test]
    fn missing_iat_measures_lifetime_from_now() {
        let token = test_tokens::with_claims(json!({ "exp": NOW + 200 }));
        let info = policy().parse_at(&token, UnixTime(NOW)).unwrap();
        assert_eq!(info.issued_at(), None);
        assert_eq!(info.buffer(), DurationSecs(30));
    }

    #[test]
    fn expired_token_reports_negative_remaining() {
        let token = test_tokens::issued(NOW - 3600, NOW - 10);
        let info = policy().parse_at(&token, UnixTime(NOW)).unwrap();
        assert_eq!(info.time_until_expiry(), -10);
        assert!(info.is_expiring());
        assert_eq!(info.status(), TokenStatus::Expired);
        assert_eq!(info.refresh_delay(&policy()), Duration::ZERO);
    }

    #[test]
    fn opaque_tokens_are_not_introspectable() {
        let p = policy();
        assert!(p.parse_at(&AccessToken::from_static("not-a-jwt"), UnixTime(NOW)).is_none());

        let no_exp = test_tokens::with_claims(json!({ "sub": "user_01" }));
        assert!(p.parse_at(&no_exp, UnixTime(NOW)).is_none());

        let string_exp = test_tokens::with_claims(json!({ "exp": "later" }));
        assert!(p.parse_at(&string_exp, UnixTime(NOW)).is_none());
    }

    #[test]
    fn refresh_delay_is_clamped() {
        let p = policy();
        let buffer = DurationSecs(60);

        assert_eq!(p.next_refresh_delay(None, buffer), Duration::from_secs(300));
        assert_eq!(p.next_refresh_delay(Some(60), buffer), Duration::ZERO);
        assert_eq!(p.next_refresh_delay(Some(-5), buffer), Duration::ZERO);
        assert_eq!(p.next_refresh_delay(Some(61), buffer), Duration::from_secs(15));
        assert_eq!(p.next_refresh_delay(Some(3600), buffer), Duration::from_secs(3540));
        assert_eq!(
            p.next_refresh_delay(Some(10 * 24 * 60 * 60), buffer),
            Duration::from_secs(24 * 60 * 60)
        );
    }

    #[test]
    fn refresh_delay_for_opaque_token_uses_retry_delay() {
        let p = policy().with_opaque_retry_delay(Duration::from_secs(42));
        let delay = p.refresh_delay_for(&AccessToken::from_static("opaque"), UnixTime(NOW));
        assert_eq!(delay, Duration::from_secs(42));
    }

    #[test]
    fn policy_deserializes_with_defaults() {
        let p: ExpiryPolicy =
            serde_json::from_value(json!({ "defaultBuffer": 90, "minRefreshDelay": 5000 }))
                .unwrap();
        assert_eq!(p.default_buffer(), DurationSecs(90));
        assert_eq!(p.clamp_delay(Duration::from_secs(1)), Duration::from_secs(5));
        assert_eq!(p.opaque_retry_delay(), Duration::from_secs(300));
    }
}
