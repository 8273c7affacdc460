//! Concatenate several resources into one.
//!
//! Every target field maps to itself plus an explicit list of source field
//! names. The matched resources must be consecutive in the package; they
//! are replaced by the target at the position of the first one, or the
//! target is appended when nothing matches.

use std::collections::HashMap;

use tabflow_core::prelude::*;

use crate::traits::{Processor, ProcessorContext};

pub struct Concatenate {
    fields: Vec<(String, Vec<String>)>,
    target_name: String,
    target_path: Option<String>,
    target_properties: tabflow_core::schema::Properties,
    resources: ResourceMatcher,
    mapping: HashMap<String, String>,
    target_fields: Vec<String>,
}

impl Default for Concatenate {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            target_name: "concat".to_string(),
            target_path: None,
            target_properties: Default::default(),
            resources: ResourceMatcher::All,
            mapping: HashMap::new(),
            target_fields: Vec::new(),
        }
    }
}

impl Concatenate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target field `name`, filled from itself and from `sources`.
    pub fn field<I, S>(mut self, name: impl Into<String>, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields
            .push((name.into(), sources.into_iter().map(Into::into).collect()));
        self
    }

    pub fn target_name(mut self, name: impl Into<String>) -> Self {
        self.target_name = name.into();
        self
    }

    /// Defaults to `data/<target name>.csv`.
    pub fn target_path(mut self, path: impl Into<String>) -> Self {
        self.target_path = Some(path.into());
        self
    }

    pub fn target_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.target_properties.insert(key.into(), value);
        self
    }

    pub fn resources(mut self, matcher: impl Into<ResourceMatcher>) -> Self {
        self.resources = matcher.into();
        self
    }

    /// Source field → target field. A name may appear once.
    fn field_mapping(&self) -> Result<HashMap<String, String>> {
        let mut mapping = HashMap::new();
        for (target, sources) in &self.fields {
            for source in sources {
                if mapping.contains_key(source) {
                    return Err(Error::config(format!(
                        "duplicate appearance of field '{source}' in concatenation"
                    )));
                }
                mapping.insert(source.clone(), target.clone());
            }
            if mapping.contains_key(target) {
                return Err(Error::config(format!(
                    "duplicate appearance of field '{target}' in concatenation"
                )));
            }
            mapping.insert(target.clone(), target.clone());
        }
        Ok(mapping)
    }

    fn target_schema(&self, package: &PackageDescriptor) -> Schema {
        let mut needed: Vec<&str> = self.fields.iter().map(|(t, _)| t.as_str()).collect();
        let mut schema = Schema::default();
        for resource in &package.resources {
            if !self.resources.matches(&resource.name) {
                continue;
            }
            for field in &resource.schema.fields {
                let Some(name) = self.mapping.get(&field.name) else {
                    continue;
                };
                let Some(pos) = needed.iter().position(|n| *n == name.as_str()) else {
                    continue;
                };
                needed.remove(pos);
                if resource.schema.primary_key.contains(&field.name) {
                    schema.primary_key.push(name.clone());
                }
                let mut field = field.clone();
                field.name = name.clone();
                schema.fields.push(field);
            }
        }
        schema
            .fields
            .extend(needed.into_iter().map(|n| FieldDescriptor::new(n, "string")));
        schema
    }
}

fn remap(
    resource: &str,
    row: Row,
    mapping: &HashMap<String, String>,
    target_fields: &[String],
) -> Result<Row> {
    let mut out: Row = target_fields
        .iter()
        .map(|f| (f.clone(), Value::Null))
        .collect();
    let mut mapped = 0;
    for (name, value) in row.iter() {
        if value.is_null() {
            continue;
        }
        if let Some(target) = mapping.get(name) {
            out.insert(target.clone(), value.clone());
            mapped += 1;
        }
    }
    if mapped == 0 {
        return Err(Error::config(format!(
            "got an empty row after concatenation (resource={resource}, source={})",
            serde_json::to_string(&row)?
        )));
    }
    Ok(out)
}

impl Processor for Concatenate {
    fn name(&self) -> &str {
        "concatenate"
    }

    fn process_package(
        &mut self,
        mut package: PackageDescriptor,
        _ctx: &ProcessorContext,
    ) -> Result<PackageDescriptor> {
        self.resources = self.resources.resolve(&package)?;
        self.mapping = self.field_mapping()?;

        let schema = self.target_schema(&package);
        self.target_fields = schema.field_names().map(String::from).collect();

        let mut target = ResourceDescriptor::new(&self.target_name)
            .with_path(
                self.target_path
                    .clone()
                    .unwrap_or_else(|| format!("data/{}.csv", self.target_name)),
            )
            .with_schema(schema);
        target.properties = self.target_properties.clone();
        target
            .properties
            .insert("mediatype".into(), "text/csv".into());
        target
            .properties
            .insert("profile".into(), "tabular-data-resource".into());

        let mut before = Vec::new();
        let mut after = Vec::new();
        let mut matched = 0;
        for resource in std::mem::take(&mut package.resources) {
            let is_match = self.resources.matches(&resource.name);
            if is_match && !after.is_empty() {
                return Err(Error::config(format!(
                    "resources to concatenate must be consecutive, '{}' comes after '{}'",
                    resource.name,
                    after
                        .last()
                        .map(|r: &ResourceDescriptor| r.name.as_str())
                        .unwrap_or_default()
                )));
            }
            if is_match {
                matched += 1;
            } else if matched == 0 {
                before.push(resource);
            } else {
                after.push(resource);
            }
        }
        tracing::debug!(
            resource = %self.target_name,
            matched,
            fields = self.target_fields.len(),
            "concatenating resources"
        );

        package.resources = before;
        package.resources.push(target);
        package.resources.extend(after);
        Ok(package)
    }

    fn process_resources(
        self: Box<Self>,
        resources: Vec<ResourceStream>,
        _ctx: &ProcessorContext,
    ) -> Result<Vec<RowStream>> {
        let Concatenate {
            resources: matcher,
            mapping,
            target_fields,
            ..
        } = *self;

        let mut out: Vec<RowStream> = Vec::with_capacity(resources.len() + 1);
        let mut sources: Vec<(String, RowStream)> = Vec::new();
        let mut slot = None;
        for r in resources {
            if matcher.matches(r.name()) {
                slot.get_or_insert(out.len());
                sources.push((r.descriptor.name, r.rows));
            } else {
                out.push(r.rows);
            }
        }

        let concatenated: RowStream = Box::new(sources.into_iter().flat_map(move |(name, rows)| {
            let mapping = mapping.clone();
            let target_fields = target_fields.clone();
            rows.map(move |row| row.and_then(|row| remap(&name, row, &mapping, &target_fields)))
        }));
        match slot {
            Some(at) => out.insert(at, concatenated),
            None => out.push(concatenated),
        }
        Ok(out)
    }
}
