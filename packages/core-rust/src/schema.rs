//! Feature schema resolution against the source schema.
//!
//! Every envelope must carry a fully-qualified schema URI (scheme, host and
//! fragment). Features may leave their schema empty, give a bare fragment, or
//! point at a completely different schema document:
//!
//! | feature schema                       | result                                 |
//! |--------------------------------------|----------------------------------------|
//! | empty                                | source schema, verbatim                |
//! | not fully qualified (e.g. `Click`)   | source schema with that fragment       |
//! | fully qualified, same scheme + host  | used as-is                             |
//! | fully qualified, other scheme / host | used as-is, must be registered first   |

use url::Url;

/// Errors produced while resolving a feature schema.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("feature schema {feature_schema:?} needs a source schema, but the source declares none")]
    MissingSourceSchema { feature_schema: String },
}

/// Outcome of resolving a feature's schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSchema {
    /// Empty feature schema; the source schema is used verbatim.
    Inherited(Url),
    /// Bare fragment appended to the source schema.
    Fragment(Url),
    /// Fully-qualified URI sharing scheme and host with the source schema.
    SameOrigin(Url),
    /// Fully-qualified URI from another origin. Needs its own registration.
    Foreign(Url),
}

impl ResolvedSchema {
    #[must_use]
    pub fn url(&self) -> &Url {
        match self {
            Self::Inherited(u) | Self::Fragment(u) | Self::SameOrigin(u) | Self::Foreign(u) => u,
        }
    }

    #[must_use]
    pub fn into_url(self) -> Url {
        match self {
            Self::Inherited(u) | Self::Fragment(u) | Self::SameOrigin(u) | Self::Foreign(u) => u,
        }
    }

    /// Whether the resolved URI must be registered with the runtime before use.
    #[must_use]
    pub fn needs_registration(&self) -> bool {
        matches!(self, Self::Foreign(_))
    }
}

/// Parses `value` and returns it only if scheme, host and fragment are all set.
#[must_use]
pub fn fully_qualified(value: &str) -> Option<Url> {
    let url = Url::parse(value).ok()?;
    let has_host = url.host_str().is_some_and(|h| !h.is_empty());
    let has_fragment = url.fragment().is_some_and(|f| !f.is_empty());
    (!url.scheme().is_empty() && has_host && has_fragment).then_some(url)
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme() && a.host_str() == b.host_str() && a.port() == b.port()
}

/// Resolves a feature's declared schema against the source schema.
///
/// # Errors
///
/// Returns [`SchemaError::MissingSourceSchema`] when the feature schema is
/// empty or a bare fragment and the source has no schema to build on.
pub fn resolve_feature_schema(
    source: Option<&Url>,
    feature_schema: &str,
) -> Result<ResolvedSchema, SchemaError> {
    let feature_schema = feature_schema.trim();
    let missing = || SchemaError::MissingSourceSchema {
        feature_schema: feature_schema.to_string(),
    };

    if feature_schema.is_empty() {
        return source
            .cloned()
            .map(ResolvedSchema::Inherited)
            .ok_or_else(missing);
    }

    if let Some(url) = fully_qualified(feature_schema) {
        return Ok(match source {
            Some(src) if same_origin(src, &url) => ResolvedSchema::SameOrigin(url),
            _ => ResolvedSchema::Foreign(url),
        });
    }

    let mut url = source.cloned().ok_or_else(missing)?;
    let fragment = feature_schema.strip_prefix('#').unwrap_or(feature_schema);
    url.set_fragment(Some(fragment));
    Ok(ResolvedSchema::Fragment(url))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn source() -> Url {
        Url::parse("https://schemas.example.com/clicks.proto#Click").unwrap()
    }

    #[test]
    fn empty_schema_inherits_source_verbatim() {
        let resolved = resolve_feature_schema(Some(&source()), "").unwrap();
        assert_eq!(resolved, ResolvedSchema::Inherited(source()));
        assert_eq!(resolved.url().as_str(), source().as_str());
        assert!(!resolved.needs_registration());
    }

    #[test]
    fn bare_fragment_is_appended_to_source() {
        let resolved = resolve_feature_schema(Some(&source()), "Purchase").unwrap();
        assert_eq!(
            resolved.url().as_str(),
            "https://schemas.example.com/clicks.proto#Purchase"
        );
        assert!(matches!(resolved, ResolvedSchema::Fragment(_)));
    }

    #[test]
    fn leading_hash_is_not_doubled() {
        let resolved = resolve_feature_schema(Some(&source()), "#Purchase").unwrap();
        assert_eq!(resolved.url().fragment(), Some("Purchase"));
    }

    #[test]
    fn url_without_fragment_is_treated_as_fragment() {
        let resolved =
            resolve_feature_schema(Some(&source()), "https://other.example.com/x.proto").unwrap();
        assert!(matches!(resolved, ResolvedSchema::Fragment(_)));
        assert_eq!(resolved.url().host_str(), Some("schemas.example.com"));
    }

    #[test]
    fn same_origin_is_used_without_registration() {
        let resolved = resolve_feature_schema(
            Some(&source()),
            "https://schemas.example.com/orders.proto#Order",
        )
        .unwrap();
        assert!(matches!(resolved, ResolvedSchema::SameOrigin(_)));
        assert!(!resolved.needs_registration());
    }

    #[test]
    fn foreign_origin_needs_registration() {
        let resolved =
            resolve_feature_schema(Some(&source()), "http://registry.internal/x.proto#X").unwrap();
        assert!(matches!(resolved, ResolvedSchema::Foreign(_)));
        assert!(resolved.needs_registration());
        assert_eq!(resolved.url().as_str(), "http://registry.internal/x.proto#X");
    }

    #[test]
    fn different_scheme_same_host_is_foreign() {
        let resolved = resolve_feature_schema(
            Some(&source()),
            "http://schemas.example.com/clicks.proto#Click",
        )
        .unwrap();
        assert!(resolved.needs_registration());
    }

    #[test]
    fn fully_qualified_without_source_is_foreign() {
        let resolved = resolve_feature_schema(None, "https://a.example.com/s#S").unwrap();
        assert!(matches!(resolved, ResolvedSchema::Foreign(_)));
    }

    #[test]
    fn fragment_without_source_fails() {
        let err = resolve_feature_schema(None, "Click").unwrap_err();
        assert_eq!(
            err,
            SchemaError::MissingSourceSchema {
                feature_schema: "Click".to_string()
            }
        );
        assert!(resolve_feature_schema(None, "").is_err());
    }

    proptest! {
        #[test]
        fn fragment_keeps_source_origin(fragment in "[A-Za-z][A-Za-z0-9_]{0,24}") {
            let src = source();
            let resolved = resolve_feature_schema(Some(&src), &fragment).unwrap();
            let url = resolved.url();
            prop_assert_eq!(url.scheme(), src.scheme());
            prop_assert_eq!(url.host_str(), src.host_str());
            let suffix = format!("#{fragment}");
            prop_assert!(url.as_str().ends_with(&suffix));
            prop_assert!(!resolved.needs_registration());
        }
    }
}
