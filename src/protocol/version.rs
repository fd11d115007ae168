//! Server version gate.
//!
//! Server versions look like `YYYY.M.P` (e.g. `2022.9.1`). Optional protocol
//! features are enabled only when the reported version meets a minimum.

/// Returns `true` if `version` is at least `major.minor` (or
/// `major.minor.patch` when `patch` is given).
///
/// Without a patch component the minor comparison is inclusive; with one the
/// patch decides ties on `major.minor`. Unparsable components count as zero.
#[must_use]
pub fn at_least_version(version: &str, major: u32, minor: u32, patch: Option<u32>) -> bool {
    let mut parts = version.splitn(3, '.').map(parse_component);
    let server_major = parts.next().unwrap_or(0);
    let server_minor = parts.next().unwrap_or(0);
    let server_patch = parts.next().unwrap_or(0);

    if server_major != major {
        return server_major > major;
    }

    match patch {
        None => server_minor >= minor,
        Some(patch) => {
            server_minor > minor || (server_minor == minor && server_patch >= patch)
        }
    }
}

/// Leading digits of a version component (`"0b1"` → 0, `"10dev"` → 10).
fn parse_component(part: &str) -> u32 {
    let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minor_gate() {
        assert!(at_least_version("2022.9.0", 2022, 9, None));
        assert!(at_least_version("2022.10.0", 2022, 9, None));
        assert!(at_least_version("2023.1.0", 2022, 9, None));
        assert!(!at_least_version("2022.8.7", 2022, 9, None));
        assert!(!at_least_version("2021.12.0", 2022, 9, None));
    }

    #[test]
    fn test_patch_gate() {
        assert!(at_least_version("2022.4.0", 2022, 4, Some(0)));
        assert!(at_least_version("2022.5.0", 2022, 4, Some(0)));
        assert!(!at_least_version("2022.3.9", 2022, 4, Some(0)));
        assert!(!at_least_version("2022.4.0", 2022, 4, Some(1)));
    }

    #[test]
    fn test_dev_versions() {
        assert!(at_least_version("2022.10.0b1", 2022, 9, None));
        assert!(at_least_version("2024.1.0.dev2023", 2022, 9, None));
        assert!(!at_least_version("", 2022, 9, None));
    }
}
