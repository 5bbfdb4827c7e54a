//! External-leg dial candidate planning
//!
//! A raw destination string can arrive as a full SIP URI, an `@`-qualified
//! address, or a bare alias. Depending on the shape (and on whether the
//! session supplied a per-call SIP domain hint) the engine tries an ordered
//! list of candidate spellings until the server creates a route.

/// Shape of a raw destination string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationKind {
    /// Carries a `sip:`/`sips:` scheme
    SipPrefixed,
    /// Contains an `@` but no scheme
    DomainQualified,
    /// Plain alias
    Bare,
}

/// Classify a raw destination string
pub fn classify_destination(destination: &str) -> DestinationKind {
    if destination.starts_with("sip:") || destination.starts_with("sips:") {
        DestinationKind::SipPrefixed
    } else if destination.contains('@') {
        DestinationKind::DomainQualified
    } else {
        DestinationKind::Bare
    }
}

/// Build the ordered candidate list for one destination
///
/// - `@`-qualified: the bare address, then its `sip:` form
/// - `sip:`-prefixed: the stripped address, then the original
/// - bare with a domain hint: the alias, the domain-qualified form, and the
///   domain-qualified `sip:` form
/// - bare without a hint: the alias, then its `sip:` form
pub fn build_candidates(destination: &str, domain_hint: Option<&str>) -> Vec<String> {
    let destination = destination.trim();
    match classify_destination(destination) {
        DestinationKind::SipPrefixed => {
            let bare = destination
                .strip_prefix("sip:")
                .or_else(|| destination.strip_prefix("sips:"))
                .unwrap_or(destination);
            vec![bare.to_string(), destination.to_string()]
        }
        DestinationKind::DomainQualified => {
            vec![destination.to_string(), format!("sip:{destination}")]
        }
        DestinationKind::Bare => match domain_hint.filter(|d| !d.is_empty()) {
            Some(domain) => vec![
                destination.to_string(),
                format!("{destination}@{domain}"),
                format!("sip:{destination}@{domain}"),
            ],
            None => vec![destination.to_string(), format!("sip:{destination}")],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn classification() {
        assert_eq!(classify_destination("sip:a@b"), DestinationKind::SipPrefixed);
        assert_eq!(classify_destination("sips:a@b"), DestinationKind::SipPrefixed);
        assert_eq!(classify_destination("a@b"), DestinationKind::DomainQualified);
        assert_eq!(classify_destination("alias"), DestinationKind::Bare);
    }

    #[test]
    fn qualified_destination_pairs_with_sip_form() {
        assert_eq!(
            build_candidates("ext@domain", None),
            vec!["ext@domain", "sip:ext@domain"]
        );
    }

    #[test]
    fn sip_prefixed_tries_stripped_form_first() {
        assert_eq!(
            build_candidates("sip:ext@domain", None),
            vec!["ext@domain", "sip:ext@domain"]
        );
    }

    #[test]
    fn bare_alias_with_domain_hint_expands() {
        assert_eq!(
            build_candidates("7001", Some("example.com")),
            vec!["7001", "7001@example.com", "sip:7001@example.com"]
        );
    }

    #[test]
    fn bare_alias_without_hint() {
        assert_eq!(build_candidates("7001", None), vec!["7001", "sip:7001"]);
        assert_eq!(build_candidates("7001", Some("")), vec!["7001", "sip:7001"]);
    }

    #[test]
    fn whitespace_is_trimmed() {
        assert_eq!(
            build_candidates("  ext@domain ", None),
            vec!["ext@domain", "sip:ext@domain"]
        );
    }
}
