use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Permission tier attached to every known scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeTier {
    General,
    /// Only grantable through the companion app.
    Privileged,
}

/// Enumerated permission scopes understood by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    History,
    HistoryLite,
    Places,
    Profile,
    Request,
    RequestReceipt,
    AllTrips,
    RideWidgets,
    PaymentMethods,
}

/// Ordered set of known scopes; iteration order is stable.
pub type ScopeSet = BTreeSet<Scope>;

struct ScopeEntry {
    name: &'static str,
    bit: i32,
    tier: ScopeTier,
}

const fn row(name: &'static str, bit: i32, tier: ScopeTier) -> ScopeEntry {
    ScopeEntry { name, bit, tier }
}

const ALL_SCOPES: [Scope; 9] = [
    Scope::History,
    Scope::HistoryLite,
    Scope::Places,
    Scope::Profile,
    Scope::Request,
    Scope::RequestReceipt,
    Scope::AllTrips,
    Scope::RideWidgets,
    Scope::PaymentMethods,
];

impl Scope {
    const fn entry(self) -> ScopeEntry {
        use ScopeTier::{General, Privileged};
        match self {
            Scope::History => row("history", 1, General),
            Scope::HistoryLite => row("history_lite", 1 << 1, General),
            Scope::Places => row("places", 1 << 2, General),
            Scope::Profile => row("profile", 1 << 3, General),
            Scope::Request => row("request", 1 << 4, Privileged),
            Scope::RequestReceipt => row("request_receipt", 1 << 5, Privileged),
            Scope::AllTrips => row("all_trips", 1 << 6, Privileged),
            Scope::RideWidgets => row("ride_widgets", 1 << 7, General),
            Scope::PaymentMethods => row("payment_methods", 1 << 8, General),
        }
    }

    pub fn name(self) -> &'static str {
        self.entry().name
    }

    pub fn bit_value(self) -> i32 {
        self.entry().bit
    }

    pub fn tier(self) -> ScopeTier {
        self.entry().tier
    }

    pub fn all() -> impl Iterator<Item = Scope> {
        ALL_SCOPES.into_iter()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scope {
    type Err = UnknownScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_ascii_lowercase();
        Scope::all()
            .find(|scope| scope.name() == lowered)
            .ok_or_else(|| UnknownScope(s.to_owned()))
    }
}

/// Error reported when a scope name is not part of the known table.
#[derive(Debug, thiserror::Error)]
#[error("unknown scope '{0}'")]
pub struct UnknownScope(pub String);

/// Legacy bitmask encoding. Custom scopes have no bit and are ignored.
pub fn encode<'a, I>(scopes: I) -> i32
where
    I: IntoIterator<Item = &'a Scope>,
{
    scopes
        .into_iter()
        .fold(0, |mask, scope| mask | scope.bit_value())
}

/// Decode a legacy bitmask. Zero and negative masks mean "no scopes".
pub fn decode(bitmask: i32) -> ScopeSet {
    if bitmask <= 0 {
        return ScopeSet::new();
    }
    Scope::all()
        .filter(|scope| bitmask & scope.bit_value() != 0)
        .collect()
}

/// Parse a space-delimited scope string, dropping anything unrecognised.
pub fn parse_space_delimited(value: &str) -> ScopeSet {
    value
        .split(' ')
        .filter(|token| !token.is_empty())
        .filter_map(|token| token.parse::<Scope>().ok())
        .collect()
}

pub fn is_privilege_required<'a, I>(scopes: I) -> bool
where
    I: IntoIterator<Item = &'a Scope>,
{
    scopes
        .into_iter()
        .any(|scope| scope.tier() == ScopeTier::Privileged)
}

pub fn to_space_delimited<'a, I>(scopes: I) -> String
where
    I: IntoIterator<Item = &'a Scope>,
{
    scopes
        .into_iter()
        .map(|scope| scope.name())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Join standard and free-form custom scopes into one request string.
pub fn merge_custom<S: AsRef<str>>(standard: &str, custom: &[S]) -> String {
    let custom = custom
        .iter()
        .map(|scope| scope.as_ref().trim().to_lowercase())
        .filter(|scope| !scope.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    format!("{} {}", standard.trim(), custom).trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_values_are_unique_powers_of_two() {
        let mut seen = 0;
        for scope in Scope::all() {
            let bit = scope.bit_value();
            assert!(bit > 0);
            assert_eq!(bit.count_ones(), 1);
            assert_eq!(seen & bit, 0, "duplicate bit for {scope}");
            seen |= bit;
        }
    }

    #[test]
    fn decode_zero_and_negative_is_empty() {
        assert!(decode(0).is_empty());
        assert!(decode(-32).is_empty());
    }

    #[test]
    fn decode_mixed_tiers() {
        let mask =
            Scope::History.bit_value() | Scope::Request.bit_value() | Scope::Profile.bit_value();
        let scopes = decode(mask);
        assert_eq!(
            scopes,
            ScopeSet::from([Scope::History, Scope::Request, Scope::Profile])
        );
        assert!(is_privilege_required(&scopes));
    }

    #[test]
    fn decode_ignores_unknown_bits_and_is_idempotent() {
        let mask = Scope::Places.bit_value() | (1 << 20);
        let decoded = decode(mask);
        assert_eq!(decoded, ScopeSet::from([Scope::Places]));
        assert_eq!(decode(encode(&decoded)), decoded);
    }

    #[test]
    fn decode_encode_decode_is_stable_for_every_mask() {
        for mask in 1..(1 << 9) {
            let decoded = decode(mask);
            assert_eq!(decode(encode(&decoded)), decoded, "mask {mask:#b}");
            assert_eq!(encode(&decoded), mask);
        }
        for mask in [1 << 9, (1 << 12) | 0b101, (1 << 30) | 0x1ff, i32::MAX] {
            let decoded = decode(mask);
            assert_eq!(decode(encode(&decoded)), decoded, "mask {mask:#b}");
            assert_eq!(encode(&decoded), mask & 0x1ff);
        }
    }

    #[test]
    fn every_scope_name_parses_back() {
        for scope in Scope::all() {
            assert_eq!(scope.name().parse::<Scope>().unwrap(), scope);
        }
        assert_eq!(Scope::all().count(), 9);
    }

    #[test]
    fn parse_drops_unknown_tokens() {
        assert_eq!(
            parse_space_delimited("profile custom"),
            ScopeSet::from([Scope::Profile])
        );
        assert_eq!(
            parse_space_delimited("HISTORY Ride_Widgets"),
            ScopeSet::from([Scope::History, Scope::RideWidgets])
        );
        assert!(parse_space_delimited("").is_empty());
    }

    #[test]
    fn space_delimited_rendering() {
        assert_eq!(to_space_delimited(&ScopeSet::from([Scope::History])), "history");
        assert_eq!(to_space_delimited(&ScopeSet::new()), "");
        assert_eq!(
            to_space_delimited(&ScopeSet::from([Scope::RequestReceipt, Scope::Profile])),
            "profile request_receipt"
        );
    }

    #[test]
    fn general_scopes_do_not_need_privilege() {
        assert!(!is_privilege_required(&ScopeSet::from([
            Scope::Profile,
            Scope::History
        ])));
        assert!(!is_privilege_required(&ScopeSet::new()));
    }

    #[test]
    fn merge_custom_scopes() {
        assert_eq!(
            merge_custom("profile history", &["Partner.Accounts", "eats.store"]),
            "profile history partner.accounts eats.store"
        );
        assert_eq!(merge_custom("profile", &[] as &[&str]), "profile");
        assert_eq!(merge_custom("", &["custom"]), "custom");
    }
}
