//! Package version ordering compatible with libalpm's `vercmp`.
//!
//! Versions have the shape `[epoch:]version[-release]`. The epoch is compared
//! first, then the version, then the release when both sides carry one.
//! Segments alternate between numeric and alphabetic runs; numeric runs compare
//! by value, alphabetic runs lexically, and a numeric run beats an alphabetic
//! one.

use std::cmp::Ordering;

/// What: Compare two full package versions.
///
/// Inputs:
/// - `a`: First version, e.g. `1:2.0.1-3`.
/// - `b`: Second version.
///
/// Output:
/// - `Ordering::Less` when `a` is older than `b`, `Greater` when newer, `Equal` otherwise.
///
/// Details:
/// - A missing or empty epoch counts as `0`.
/// - The release is ignored unless both versions have one, so `1.5` equals `1.5-1`.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    let (epoch_a, ver_a, rel_a) = parse_evr(a);
    let (epoch_b, ver_b, rel_b) = parse_evr(b);

    rpmvercmp(epoch_a.as_bytes(), epoch_b.as_bytes())
        .then_with(|| rpmvercmp(ver_a.as_bytes(), ver_b.as_bytes()))
        .then_with(|| match (rel_a, rel_b) {
            (Some(ra), Some(rb)) => rpmvercmp(ra.as_bytes(), rb.as_bytes()),
            _ => Ordering::Equal,
        })
}

/// What: `vercmp`-style integer result.
///
/// Output:
/// - `-1`, `0` or `1` for older, equal and newer.
#[must_use]
pub fn vercmp(a: &str, b: &str) -> i32 {
    match compare_versions(a, b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// True when `candidate` is strictly newer than `installed`.
#[must_use]
pub fn is_newer(installed: &str, candidate: &str) -> bool {
    compare_versions(installed, candidate) == Ordering::Less
}

/// Split `[epoch:]version[-release]`.
///
/// The release starts after the last `-` found past the leading digits.
fn parse_evr(evr: &str) -> (&str, &str, Option<&str>) {
    let digits_end = evr
        .bytes()
        .position(|c| !c.is_ascii_digit())
        .unwrap_or(evr.len());
    let release_dash = evr[digits_end..].rfind('-').map(|i| i + digits_end);

    let (epoch, version_start) = if evr[digits_end..].starts_with(':') {
        let epoch = if digits_end == 0 { "0" } else { &evr[..digits_end] };
        (epoch, digits_end + 1)
    } else {
        ("0", 0)
    };

    match release_dash {
        Some(dash) => (epoch, &evr[version_start..dash], Some(&evr[dash + 1..])),
        None => (epoch, &evr[version_start..], None),
    }
}

/// Segment-wise comparison of one version component.
fn rpmvercmp(a: &[u8], b: &[u8]) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let (mut one, mut two) = (0usize, 0usize);
    let (mut end1, mut end2) = (0usize, 0usize);

    while one < a.len() && two < b.len() {
        while one < a.len() && !a[one].is_ascii_alphanumeric() {
            one += 1;
        }
        while two < b.len() && !b[two].is_ascii_alphanumeric() {
            two += 1;
        }
        if one >= a.len() || two >= b.len() {
            break;
        }

        // differing separator runs decide on their own
        let (sep1, sep2) = (one - end1, two - end2);
        if sep1 != sep2 {
            return sep1.cmp(&sep2);
        }

        end1 = one;
        end2 = two;
        let numeric = a[end1].is_ascii_digit();
        let same_class = |c: &u8| {
            if numeric {
                c.is_ascii_digit()
            } else {
                c.is_ascii_alphabetic()
            }
        };
        while end1 < a.len() && same_class(&a[end1]) {
            end1 += 1;
        }
        while end2 < b.len() && same_class(&b[end2]) {
            end2 += 1;
        }

        let mut seg1 = &a[one..end1];
        let mut seg2 = &b[two..end2];

        if seg2.is_empty() {
            // numeric segments are newer than alphabetic ones
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        if numeric {
            seg1 = trim_leading_zeros(seg1);
            seg2 = trim_leading_zeros(seg2);
            match seg1.len().cmp(&seg2.len()) {
                Ordering::Equal => {}
                other => return other,
            }
        }

        match seg1.cmp(seg2) {
            Ordering::Equal => {}
            other => return other,
        }

        one = end1;
        two = end2;
    }

    let one_done = one >= a.len();
    let two_done = two >= b.len();
    if one_done && two_done {
        return Ordering::Equal;
    }

    // A leftover alphabetic run never beats an exhausted string.
    let one_alpha = a.get(one).is_some_and(u8::is_ascii_alphabetic);
    let two_alpha = b.get(two).is_some_and(u8::is_ascii_alphabetic);
    if (one_done && !two_alpha) || one_alpha {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

fn trim_leading_zeros(seg: &[u8]) -> &[u8] {
    let start = seg.iter().position(|&c| c != b'0').unwrap_or(seg.len());
    &seg[start..]
}
