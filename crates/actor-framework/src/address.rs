//! # Addresses
//!
//! Every actor and gateway is identified by an [`Address`]: an ordered, non-empty
//! sequence of string segments, written as the segments joined by `:`.
//!
//! ```text
//! runner:counter:c0      three segments
//! timer:runner:ping:250  a timer request (see the timer module)
//! a::b                   three segments, the middle one empty
//! ""                     one empty segment, the "empty" address
//! ```
//!
//! A literal `:` or `\` inside a segment is escaped with `\`. Parsing accepts `\`
//! followed by any character as that character, so `a\b` normalizes to `ab`.
//!
//! The first segment is the address *prefix*: it names the store or gateway that
//! owns everything underneath it, and it is what routing looks at.

use crate::error::AddressError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const DELIMITER: char = ':';
const ESCAPE: char = '\\';

/// Hierarchical actor/gateway address.
///
/// Addresses are immutable values: equality, hashing and ordering are structural over
/// the segments.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Address {
    segments: Vec<String>,
}

impl Address {
    /// Builds an address from one or more segments.
    pub fn new<I, S>(segments: I) -> Result<Self, AddressError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(AddressError::Empty);
        }
        Ok(Self { segments })
    }

    /// The address made of a single segment.
    pub fn of(segment: impl Into<String>) -> Self {
        Self {
            segments: vec![segment.into()],
        }
    }

    /// The empty address: a single empty segment. Used as the source of messages that
    /// come from outside any actor.
    pub fn empty() -> Self {
        Self::of("")
    }

    /// Parses the `:`-delimited string form.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = input.chars();
        while let Some(c) = chars.next() {
            match c {
                ESCAPE => match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => return Err(AddressError::DanglingEscape),
                },
                DELIMITER => segments.push(std::mem::take(&mut current)),
                other => current.push(other),
            }
        }
        segments.push(current);
        Ok(Self { segments })
    }

    pub fn is_empty(&self) -> bool {
        self.segments.len() == 1 && self.segments[0].is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The top-level segment, used to route to stores and gateways.
    pub fn first(&self) -> &str {
        &self.segments[0]
    }

    pub fn last(&self) -> &str {
        &self.segments[self.segments.len() - 1]
    }

    pub fn element(&self, index: usize) -> Result<&str, AddressError> {
        self.segments
            .get(index)
            .map(String::as_str)
            .ok_or(AddressError::IndexOutOfRange {
                index,
                len: self.segments.len(),
            })
    }

    /// `true` if every segment of `self` matches the start of `other`.
    /// An address is a prefix of itself.
    pub fn is_prefix_of(&self, other: &Address) -> bool {
        self.segments.len() <= other.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    /// Strips `self` from the front of `child`.
    ///
    /// Returns `Ok(None)` when the two are equal (nothing remains), and
    /// [`AddressError::NotPrefix`] when `self` is not a prefix of `child`.
    pub fn remove_prefix(&self, child: &Address) -> Result<Option<Address>, AddressError> {
        if !self.is_prefix_of(child) {
            return Err(AddressError::NotPrefix {
                parent: self.clone(),
                child: child.clone(),
            });
        }
        let rest = &child.segments[self.segments.len()..];
        if rest.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Self {
                segments: rest.to_vec(),
            }))
        }
    }

    /// The address one level below this one.
    pub fn child(&self, segment: impl Into<String>) -> Address {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    pub fn append(&self, suffix: &Address) -> Address {
        let mut segments = self.segments.clone();
        segments.extend(suffix.segments.iter().cloned());
        Self { segments }
    }

    /// The address without its last segment, or `None` for single-segment addresses.
    pub fn parent(&self) -> Option<Address> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Every prefix of this address, longest first (including the address itself).
    pub fn prefixes(&self) -> impl Iterator<Item = Address> + '_ {
        (1..=self.segments.len()).rev().map(move |n| Self {
            segments: self.segments[..n].to_vec(),
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", DELIMITER)?;
            }
            for c in segment.chars() {
                if c == DELIMITER || c == ESCAPE {
                    write!(f, "{}", ESCAPE)?;
                }
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:?})", self.to_string())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<Vec<String>> for Address {
    type Error = AddressError;

    fn try_from(segments: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(segments)
    }
}

impl From<Address> for Vec<String> {
    fn from(address: Address) -> Self {
        address.segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    #[test]
    fn test_parse_splits_on_unescaped_delimiter() {
        let a = addr(r"runner:a\:b:c");
        assert_eq!(a.segments(), &["runner", "a:b", "c"]);
        assert_eq!(a.to_string(), r"runner:a\:b:c");
    }

    #[test]
    fn test_empty_segments_are_kept() {
        assert_eq!(addr("a::b").segments(), &["a", "", "b"]);
        assert_eq!(addr("").segments(), &[""]);
        assert!(addr("").is_empty());
        assert_eq!(addr(":").len(), 2);
    }

    #[test]
    fn test_escape_normalization() {
        assert_eq!(addr(r"a\bc").to_string(), "abc");
        assert_eq!(addr(r"a\\b").segments(), &[r"a\b"]);
        assert_eq!(Address::parse(r"abc\"), Err(AddressError::DanglingEscape));
    }

    #[test]
    fn test_construction_requires_a_segment() {
        assert_eq!(Address::new(Vec::<String>::new()), Err(AddressError::Empty));
        assert_eq!(Address::new(["a", "b"]).unwrap(), addr("a:b"));
    }

    #[test]
    fn test_decoding_checks_for_a_segment() {
        let none = crate::codec::encode(&Vec::<String>::new()).unwrap();
        assert!(crate::codec::decode::<Address>(&none).is_err());

        let a = addr(r"runner:a\:b");
        let bytes = crate::codec::encode(&a).unwrap();
        assert_eq!(bytes, crate::codec::encode(&a.segments().to_vec()).unwrap());
        assert_eq!(crate::codec::decode::<Address>(&bytes).unwrap(), a);
    }

    #[test]
    fn test_element_bounds() {
        let a = addr("x:y");
        assert_eq!(a.element(1), Ok("y"));
        assert_eq!(
            a.element(2),
            Err(AddressError::IndexOutOfRange { index: 2, len: 2 })
        );
    }

    #[test]
    fn test_remove_prefix() {
        let parent = addr("runner:p");
        assert_eq!(parent.remove_prefix(&addr("runner:p:c0:x")), Ok(Some(addr("c0:x"))));
        assert_eq!(parent.remove_prefix(&parent), Ok(None));
        assert!(matches!(
            parent.remove_prefix(&addr("runner:q")),
            Err(AddressError::NotPrefix { .. })
        ));
        assert!(parent.remove_prefix(&addr("runner")).is_err());
    }

    #[test]
    fn test_prefixes_longest_first() {
        let all: Vec<String> = addr("a:b:c").prefixes().map(|a| a.to_string()).collect();
        assert_eq!(all, vec!["a:b:c", "a:b", "a"]);
    }

    fn segments_strategy() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec("[a-z:\\\\]{0,4}", 1..5)
    }

    proptest! {
        #[test]
        fn prop_round_trip(segments in segments_strategy()) {
            let a = Address::new(segments).unwrap();
            prop_assert_eq!(Address::parse(&a.to_string()).unwrap(), a);
        }

        #[test]
        fn prop_string_normalizes(s in "[a-z:\\\\]{0,12}") {
            if let Ok(a) = Address::parse(&s) {
                let normalized = a.to_string();
                prop_assert_eq!(Address::parse(&normalized).unwrap().to_string(), normalized);
            }
        }

        #[test]
        fn prop_prefix_laws(p in segments_strategy(), rest in prop::collection::vec("[a-z]{0,3}", 0..3)) {
            let parent = Address::new(p.clone()).unwrap();
            prop_assert!(parent.is_prefix_of(&parent));
            prop_assert_eq!(parent.remove_prefix(&parent).unwrap(), None);

            let child = Address::new(p.into_iter().chain(rest.clone())).unwrap();
            prop_assert!(parent.is_prefix_of(&child));
            let remainder = parent.remove_prefix(&child).unwrap();
            prop_assert_eq!(remainder.map(|r| r.len()).unwrap_or(0), rest.len());
        }
    }
}
