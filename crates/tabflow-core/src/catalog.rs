//! Name lookup over a package's resource list.

use std::collections::HashMap;

use crate::schema::ResourceDescriptor;

/// Ordered resource list with a name index. Names are unique within a
/// package; if a list carries duplicates the first occurrence wins.
#[derive(Debug)]
pub struct ResourceCatalog<'a> {
    resources: &'a [ResourceDescriptor],
    index: HashMap<&'a str, usize>,
}

impl<'a> ResourceCatalog<'a> {
    pub fn new(resources: &'a [ResourceDescriptor]) -> Self {
        let mut index = HashMap::with_capacity(resources.len());
        for (i, r) in resources.iter().enumerate() {
            index.entry(r.name.as_str()).or_insert(i);
        }
        Self { resources, index }
    }

    pub fn get(&self, name: &str) -> Option<&'a ResourceDescriptor> {
        self.index.get(name).map(|&i| &self.resources[i])
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a ResourceDescriptor> {
        self.resources.iter()
    }

    /// Resolve `name` against `self`, falling back to `upstream`.
    ///
    /// A stream arriving from upstream is described by the current package if
    /// the processor kept (or rewrote) the resource, and by the upstream
    /// package if the processor dropped or renamed it.
    pub fn lookup_with_fallback(
        &self,
        name: &str,
        upstream: &ResourceCatalog<'a>,
    ) -> Option<&'a ResourceDescriptor> {
        self.get(name).or_else(|| upstream.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDescriptor, Schema};

    fn res(name: &str, field_type: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(name)
            .with_schema(Schema::new(vec![FieldDescriptor::new("a", field_type)]))
    }

    #[test]
    fn current_descriptor_wins_over_upstream() {
        let current = vec![res("a", "integer"), res("b", "string")];
        let upstream = vec![res("a", "string"), res("gone", "string")];
        let cur = ResourceCatalog::new(&current);
        let up = ResourceCatalog::new(&upstream);

        let a = cur.lookup_with_fallback("a", &up).unwrap();
        assert_eq!(a.schema.fields[0].field_type, "integer");

        let gone = cur.lookup_with_fallback("gone", &up).unwrap();
        assert_eq!(gone.name, "gone");

        assert!(cur.lookup_with_fallback("missing", &up).is_none());
    }

    #[test]
    fn positions_follow_list_order() {
        let list = vec![res("x", "string"), res("y", "string"), res("x", "integer")];
        let cat = ResourceCatalog::new(&list);
        assert_eq!(cat.position("y"), Some(1));
        assert_eq!(cat.get("x").unwrap().schema.fields[0].field_type, "string");
        assert_eq!(cat.len(), 3);
    }
}
