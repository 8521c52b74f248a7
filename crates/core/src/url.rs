//! Resource URL construction from hierarchical path parameters.

/// Ordered path parameters: parent collections with their ids, then the target.
///
/// ```
/// use resync_core::url::PathParams;
///
/// let params = PathParams::new().item("regions", 4).collection("cities");
/// assert_eq!(params.segments().len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    segments: Vec<(String, Option<String>)>,
}

impl PathParams {
    /// Empty parameter list, resolving to the API root.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a collection segment without an id.
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.segments.push((name.into(), None));
        self
    }

    /// Append a collection segment addressing one member by id.
    pub fn item(mut self, name: impl Into<String>, id: impl ToString) -> Self {
        self.segments.push((name.into(), Some(id.to_string())));
        self
    }

    /// Segments in order, each a collection name and optional id.
    pub fn segments(&self) -> &[(String, Option<String>)] {
        &self.segments
    }
}

/// Turns path parameters into the URL passed to a coordinator operation.
pub trait UrlResolver: Send + Sync {
    /// Build the URL for `params`.
    fn resolve(&self, params: &PathParams) -> String;
}

/// Nested REST layout: `{base}/regions/4/cities/` or `{base}/regions/4/cities/7/`.
///
/// Every URL ends with a slash. Ids are inserted verbatim.
#[derive(Debug, Clone)]
pub struct HierarchicalUrl {
    base: String,
}

impl HierarchicalUrl {
    /// Resolver rooted at `base` (trailing slashes are ignored).
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// Root URL without a trailing slash.
    pub fn base(&self) -> &str {
        &self.base
    }
}

impl UrlResolver for HierarchicalUrl {
    fn resolve(&self, params: &PathParams) -> String {
        let mut url = self.base.clone();
        for (collection, id) in params.segments() {
            url.push('/');
            url.push_str(collection.trim_matches('/'));
            if let Some(id) = id {
                url.push('/');
                url.push_str(id);
            }
        }
        url.push('/');
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_collection_and_item_urls() {
        let resolver = HierarchicalUrl::new("https://api.example.com/v1/");
        let regions = PathParams::new().item("regions", 4);

        assert_eq!(
            resolver.resolve(&regions.clone().collection("cities")),
            "https://api.example.com/v1/regions/4/cities/"
        );
        assert_eq!(
            resolver.resolve(&regions.item("cities", "7")),
            "https://api.example.com/v1/regions/4/cities/7/"
        );
        assert_eq!(resolver.resolve(&PathParams::new()), "https://api.example.com/v1/");
    }
}
