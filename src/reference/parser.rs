//! Parse a `name:tag` image reference.

use super::*;

type Result<T> = std::result::Result<T, ParseError>;

pub(super) fn parse(reference: &str) -> Result<Reference<'_>> {
    let mut parts = reference.split(':');

    let (name, tag) = match (parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(tag), None) => (name, tag),
        (_, Some(_), Some(_)) => return Err(ParseError::TooManySeparators),
        _ => return Err(ParseError::MissingSeparator),
    };

    if name.is_empty() {
        return Err(ParseError::EmptyName);
    }

    if tag.is_empty() {
        return Err(ParseError::EmptyTag);
    }

    Ok(Reference { name, tag })
}

#[test]
fn parse_valid_references() {
    macro_rules! check {
        ($reference:expr, [ $name:expr, $tag:expr ]) => {
            assert_eq!(
                Reference::try_from($reference).unwrap(),
                Reference {
                    name: $name,
                    tag: $tag,
                }
            )
        };
    }

    check!("busybox:latest", ["busybox", "latest"]);
    check!("library/busybox:latest", ["library/busybox", "latest"]);
    check!("foo/bar/baz:1.2.3", ["foo/bar/baz", "1.2.3"]);
    check!("debian:stable-slim", ["debian", "stable-slim"]);
}

#[test]
fn reject_invalid_references() {
    assert_eq!(
        Reference::try_from("busybox"),
        Err(ParseError::MissingSeparator)
    );

    assert_eq!(
        Reference::try_from("busybox:1:2"),
        Err(ParseError::TooManySeparators)
    );

    assert_eq!(
        Reference::try_from("localhost:5000/busybox:latest"),
        Err(ParseError::TooManySeparators)
    );

    assert_eq!(Reference::try_from(":latest"), Err(ParseError::EmptyName));
    assert_eq!(Reference::try_from("busybox:"), Err(ParseError::EmptyTag));
    assert_eq!(Reference::try_from(""), Err(ParseError::MissingSeparator));
}

#[test]
fn repository_in_default_namespace() {
    let reference = Reference::try_from("alpine:3").unwrap();
    assert_eq!(reference.repository(), "library/alpine");
    assert_eq!(reference.to_string(), "alpine:3");
}
