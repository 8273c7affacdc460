//! Selecting resources by name, pattern or position.

use regex::Regex;

use crate::error::{Error, Result};
use crate::schema::PackageDescriptor;

#[derive(Debug, Clone, Default)]
pub enum ResourceMatcher {
    #[default]
    All,
    Names(Vec<String>),
    /// Anchored regular expression over the resource name.
    Pattern(Regex),
    /// Position in the incoming package. Call [`ResourceMatcher::resolve`]
    /// before matching.
    Index(usize),
}

impl ResourceMatcher {
    pub fn all() -> Self {
        ResourceMatcher::All
    }

    pub fn name(name: impl Into<String>) -> Self {
        ResourceMatcher::Names(vec![name.into()])
    }

    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ResourceMatcher::Names(names.into_iter().map(Into::into).collect())
    }

    pub fn pattern(pattern: &str) -> Result<Self> {
        let anchored = format!("^(?:{pattern})$");
        let re = Regex::new(&anchored)
            .map_err(|e| Error::config(format!("invalid resource pattern '{pattern}': {e}")))?;
        Ok(ResourceMatcher::Pattern(re))
    }

    pub fn index(i: usize) -> Self {
        ResourceMatcher::Index(i)
    }

    /// Bind positional matchers to the names in `package`.
    pub fn resolve(&self, package: &PackageDescriptor) -> Result<Self> {
        match self {
            ResourceMatcher::Index(i) => package
                .resources
                .get(*i)
                .map(|r| ResourceMatcher::name(r.name.clone()))
                .ok_or_else(|| {
                    Error::config(format!(
                        "resource index {i} out of range ({} resources)",
                        package.resources.len()
                    ))
                }),
            other => Ok(other.clone()),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            ResourceMatcher::All => true,
            ResourceMatcher::Names(names) => names.iter().any(|n| n == name),
            ResourceMatcher::Pattern(re) => re.is_match(name),
            ResourceMatcher::Index(_) => false,
        }
    }
}

impl From<&str> for ResourceMatcher {
    fn from(name: &str) -> Self {
        ResourceMatcher::name(name)
    }
}

impl From<Vec<&str>> for ResourceMatcher {
    fn from(names: Vec<&str>) -> Self {
        ResourceMatcher::names(names)
    }
}
