//! Append an in-process row source to the package.

use tabflow_core::prelude::*;

use crate::traits::{Processor, ProcessorContext};

/// Rows sampled to infer a schema.
pub const SAMPLE_SIZE: usize = 100;

type Rows = Box<dyn Iterator<Item = Result<Row>> + Send>;

/// Add a resource fed by an iterator. Without an explicit schema the field
/// list comes from the first row and each type from the first
/// [`SAMPLE_SIZE`] rows.
pub struct Load {
    name: Option<String>,
    schema: Option<Schema>,
    rows: Option<Rows>,
    sample: Vec<Row>,
}

impl Load {
    pub fn rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = Row>,
        I::IntoIter: Send + 'static,
    {
        Self::stream(Box::new(rows.into_iter().map(Ok)))
    }

    pub fn stream(rows: RowStream) -> Self {
        Self {
            name: None,
            schema: None,
            rows: Some(rows),
            sample: Vec::new(),
        }
    }

    /// Defaults to `res_<n>`, `n` being the resource's 1-based position.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    fn infer_schema(&mut self) -> Result<Schema> {
        let Some(rows) = self.rows.as_mut() else {
            return Ok(Schema::default());
        };
        for row in rows.by_ref().take(SAMPLE_SIZE) {
            self.sample.push(row?);
        }
        let Some(first) = self.sample.first() else {
            return Ok(Schema::default());
        };
        let fields = first
            .keys()
            .map(|name| FieldDescriptor::new(name, field_type(&self.sample, name)))
            .collect();
        Ok(Schema::new(fields))
    }
}

/// The single type of the non-null sampled values, or `any`.
fn field_type(sample: &[Row], name: &str) -> &'static str {
    let mut found: Option<&'static str> = None;
    for value in sample.iter().filter_map(|row| row.get(name)) {
        if value.is_null() {
            continue;
        }
        match found {
            None => found = Some(value.type_name()),
            Some(t) if t == value.type_name() => {}
            Some(_) => return "any",
        }
    }
    found.unwrap_or("any")
}

impl Processor for Load {
    fn name(&self) -> &str {
        "load"
    }

    fn process_package(
        &mut self,
        mut package: PackageDescriptor,
        _ctx: &ProcessorContext,
    ) -> Result<PackageDescriptor> {
        let name = self
            .name
            .clone()
            .unwrap_or_else(|| format!("res_{}", package.resources.len() + 1));
        if package.resource(&name).is_some() {
            return Err(Error::config(format!(
                "resource '{name}' already exists in package"
            )));
        }
        let schema = match self.schema.take() {
            Some(schema) => schema,
            None => self.infer_schema()?,
        };
        tracing::debug!(resource = %name, fields = schema.fields.len(), "loading rows");
        package.resources.push(
            ResourceDescriptor::new(&name)
                .with_path(format!("{name}.csv"))
                .with_schema(schema),
        );
        self.name = Some(name);
        Ok(package)
    }

    fn process_resources(
        self: Box<Self>,
        resources: Vec<ResourceStream>,
        _ctx: &ProcessorContext,
    ) -> Result<Vec<RowStream>> {
        let Load { rows, sample, .. } = *self;
        let mut out: Vec<RowStream> = resources.into_iter().map(|r| r.rows).collect();
        let rest = rows.unwrap_or_else(tabflow_core::stream::empty_rows);
        out.push(Box::new(sample.into_iter().map(Ok).chain(rest)));
        Ok(out)
    }
}
