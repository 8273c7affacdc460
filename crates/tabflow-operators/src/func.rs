//! Processors built from closures.

use std::sync::Arc;

use parking_lot::Mutex;
use tabflow_core::prelude::*;

use crate::traits::{map_matched, Processor, ProcessorContext};

/// Mutate every row of the matched resources in place.
pub fn row_processor<F>(f: F) -> RowProcessor<F>
where
    F: FnMut(&mut Row) -> Result<()> + Send + 'static,
{
    RowProcessor {
        name: "row_processor".to_string(),
        func: Arc::new(Mutex::new(f)),
        resources: ResourceMatcher::All,
    }
}

/// Replace each matched resource's rows.
pub fn rows_processor<F>(f: F) -> RowsProcessor<F>
where
    F: FnMut(ResourceStream) -> RowStream + Send + 'static,
{
    RowsProcessor {
        name: "rows_processor".to_string(),
        func: f,
        resources: ResourceMatcher::All,
    }
}

/// Rewrite the package descriptor. Rows pass through.
pub fn package_processor<F>(f: F) -> PackageProcessor<F>
where
    F: FnMut(PackageDescriptor) -> Result<PackageDescriptor> + Send + 'static,
{
    PackageProcessor {
        name: "package_processor".to_string(),
        func: f,
    }
}

pub struct RowProcessor<F> {
    name: String,
    func: Arc<Mutex<F>>,
    resources: ResourceMatcher,
}

impl<F> RowProcessor<F> {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn resources(mut self, matcher: impl Into<ResourceMatcher>) -> Self {
        self.resources = matcher.into();
        self
    }
}

impl<F> Processor for RowProcessor<F>
where
    F: FnMut(&mut Row) -> Result<()> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process_package(
        &mut self,
        package: PackageDescriptor,
        _ctx: &ProcessorContext,
    ) -> Result<PackageDescriptor> {
        self.resources = self.resources.resolve(&package)?;
        Ok(package)
    }

    fn process_resources(
        self: Box<Self>,
        resources: Vec<ResourceStream>,
        _ctx: &ProcessorContext,
    ) -> Result<Vec<RowStream>> {
        let func = self.func.clone();
        map_matched(resources, &self.resources, |r| {
            let func = func.clone();
            let rows: RowStream = Box::new(r.rows.map(move |row| {
                let mut row = row?;
                (&mut *func.lock())(&mut row)?;
                Ok(row)
            }));
            Ok(rows)
        })
    }
}

pub struct RowsProcessor<F> {
    name: String,
    func: F,
    resources: ResourceMatcher,
}

impl<F> RowsProcessor<F> {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn resources(mut self, matcher: impl Into<ResourceMatcher>) -> Self {
        self.resources = matcher.into();
        self
    }
}

impl<F> Processor for RowsProcessor<F>
where
    F: FnMut(ResourceStream) -> RowStream + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process_package(
        &mut self,
        package: PackageDescriptor,
        _ctx: &ProcessorContext,
    ) -> Result<PackageDescriptor> {
        self.resources = self.resources.resolve(&package)?;
        Ok(package)
    }

    fn process_resources(
        self: Box<Self>,
        resources: Vec<ResourceStream>,
        _ctx: &ProcessorContext,
    ) -> Result<Vec<RowStream>> {
        let RowsProcessor {
            mut func,
            resources: matcher,
            ..
        } = *self;
        map_matched(resources, &matcher, |r| Ok(func(r)))
    }
}

pub struct PackageProcessor<F> {
    name: String,
    func: F,
}

impl<F> PackageProcessor<F> {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<F> Processor for PackageProcessor<F>
where
    F: FnMut(PackageDescriptor) -> Result<PackageDescriptor> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process_package(
        &mut self,
        package: PackageDescriptor,
        _ctx: &ProcessorContext,
    ) -> Result<PackageDescriptor> {
        (self.func)(package)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabflow_core::stream::rows_from_vec;

    #[test]
    fn row_processor_touches_matched_resources_only() {
        let p = Box::new(
            row_processor(|row: &mut Row| {
                row.insert("seen", true);
                Ok(())
            })
            .resources("a"),
        );
        let resources = vec![
            ResourceStream::new(ResourceDescriptor::new("a"), rows_from_vec(vec![row! { "x" => 1 }])),
            ResourceStream::new(ResourceDescriptor::new("b"), rows_from_vec(vec![row! { "x" => 2 }])),
        ];
        let out = p
            .process_resources(resources, &ProcessorContext::default())
            .unwrap();
        let rows: Vec<Vec<Row>> = out
            .into_iter()
            .map(|s| s.collect::<Result<_>>().unwrap())
            .collect();
        assert_eq!(rows[0], vec![row! { "x" => 1, "seen" => true }]);
        assert_eq!(rows[1], vec![row! { "x" => 2 }]);
    }
}
