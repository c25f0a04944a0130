use anyhow::anyhow;
use kuchiki::traits::*;
use kuchiki::NodeRef;
use url::{ParseError, Url};

use super::serialize::Serializer;

/// Decides which `href` values survive serialization.
#[derive(Clone, Debug, Default)]
pub struct LinkPolicy {
    base: Option<Url>,
}

impl LinkPolicy {
    pub fn new(base: Option<Url>) -> Self {
        Self { base }
    }

    pub fn from_base_str(base: Option<&str>) -> anyhow::Result<Self> {
        match base.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => {
                let url = Url::parse(s).map_err(|e| anyhow!("invalid base url {s}: {e}"))?;
                Ok(Self::new(Some(url)))
            }
            None => Ok(Self::default()),
        }
    }

    /// Returns the value to keep, or `None` when the attribute must be dropped.
    pub fn sanitize_href(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() {
            return None;
        }
        match Url::parse(href) {
            Ok(url) => is_allowed_scheme(url.scheme()).then(|| href.to_string()),
            Err(ParseError::RelativeUrlWithoutBase) => match self.base.as_ref() {
                None => Some(href.to_string()),
                Some(base) => {
                    let resolved = base.join(href).ok()?;
                    let same_origin = resolved.origin() == base.origin();
                    (is_allowed_scheme(resolved.scheme()) || same_origin)
                        .then(|| href.to_string())
                }
            },
            Err(_) => None,
        }
    }
}

fn is_allowed_scheme(scheme: &str) -> bool {
    matches!(scheme, "http" | "https" | "mailto")
}

/// Parse an HTML fragment in body context and return its top-level nodes,
/// detached and ready to be moved into another tree.
pub fn parse_fragment_nodes(html: &str) -> anyhow::Result<Vec<NodeRef>> {
    let doc = kuchiki::parse_html().one(format!(
        "<!DOCTYPE html><html><head></head><body>{html}</body></html>"
    ));
    let body = doc
        .select_first("body")
        .map_err(|_| anyhow!("fragment parse produced no body"))?;
    let nodes: Vec<NodeRef> = body.as_node().children().collect();
    for n in &nodes {
        n.detach();
    }
    Ok(nodes)
}

/// Re-serialize untrusted markup through the restricted vocabulary.
pub fn sanitize_html(html: &str, policy: &LinkPolicy) -> anyhow::Result<String> {
    let doc = kuchiki::parse_html().one(format!(
        "<!DOCTYPE html><html><head></head><body>{html}</body></html>"
    ));
    let body = doc
        .select_first("body")
        .map_err(|_| anyhow!("fragment parse produced no body"))?;
    Ok(Serializer::for_fragment(policy).children(body.as_node()))
}
