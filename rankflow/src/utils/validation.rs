//! Name validation for stages, inputs and outputs.

use regex::Regex;
use std::sync::OnceLock;

/// Pattern every stage, input and output name must match.
pub const NAME_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_.\-]*$";

fn name_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(NAME_PATTERN).ok()).as_ref()
}

/// Returns true if `name` is a valid identifier.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    name_regex().is_some_and(|re| re.is_match(name))
}

/// Returns the first invalid name among `names`, if any.
#[must_use]
pub fn first_invalid<'a, I>(names: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    names.into_iter().find(|n| !is_valid_name(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        for name in ["load", "_tmp", "sstream.v2", "ring-map", "A1"] {
            assert!(is_valid_name(name), "{name}");
        }
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", "1abc", "has space", "a/b", "-x"] {
            assert!(!is_valid_name(name), "{name}");
        }
    }

    #[test]
    fn test_first_invalid() {
        assert_eq!(first_invalid(["a", "b c", "d"]), Some("b c"));
        assert_eq!(first_invalid(["a", "b"]), None);
    }
}
