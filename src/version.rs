use bytes::Bytes;

/// A CAS (check-and-set) token: an opaque, totally-ordered version stamped
/// on every stored value. `Version::NONE` (`0`) means "no CAS constraint" on
/// an outgoing request and "not applicable" on a response.
///
/// Comparing versions with a signed 64-bit subtraction silently truncates
/// and misorders large differences. `u64`'s native [`Ord`] is already an
/// unsigned, total, non-truncating comparison, so no custom `Ord` impl is
/// needed here; using it directly avoids that trap.
#[derive(Debug, Default, Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Hash)]
pub struct Version(pub u64);

impl Version {
    /// No CAS constraint / not applicable.
    pub const NONE: Version = Version(0);

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for Version {
    fn from(v: u64) -> Self {
        Version(v)
    }
}

impl From<Version> for u64 {
    fn from(v: Version) -> Self {
        v.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The result of a `get`/`getk` (and quiet variants): a stored value plus
/// its flags and CAS token. `key` is populated only for `getk`/`getkq`.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub flags: u32,
    pub data: Bytes,
    pub cas: Version,
    pub key: Option<Bytes>,
}

/// The result of an `increment`/`decrement`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub value: u64,
    pub cas: Version,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_unsigned_not_truncated() {
        let small = Version(1);
        let huge = Version(u64::MAX);
        assert!(small < huge);
        // A signed `(a - b) as i64` comparison, as the original did, would
        // wrap this around and misorder it.
        assert!(huge > small);
    }

    #[test]
    fn zero_is_none() {
        assert!(Version::NONE.is_none());
        assert!(Version(0).is_none());
        assert!(!Version(1).is_none());
    }
}
