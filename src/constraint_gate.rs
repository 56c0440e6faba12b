//! Enforces review escalation for unverified constructs: `UNVERIFIED` +
//! `skip` always resolves to `full`, no override. Every other combination
//! honours the declared preference.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Unverified,
    Backtested,
    Proven,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preference {
    Skip,
    Full,
}

#[inline]
pub fn resolve_review_preference(tier: Tier, declared_preference: Preference) -> Preference {
    if tier == Tier::Unverified && declared_preference == Preference::Skip {
        return Preference::Full;
    }
    declared_preference
}
