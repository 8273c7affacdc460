//! Streaming join and group-by.
//!
//! The source resource is indexed into an [`OrderedStore`] keyed by the
//! rendered source key, folding the requested fields with their
//! [`Aggregator`]s. Without a target key the join is a group-by: one row per
//! distinct key, in key order, emitted as a new target resource. With a
//! target key every target row is looked up and extended with the finalized
//! aggregates; a second store tracks which source keys were used so
//! `full-outer` can emit rows for the ones that never matched.
//!
//! The source must precede the target in the package. Its stream is shared:
//! whatever the source pass-through has not pulled yet is drained by the
//! target stream on its first pull.

pub mod aggregate;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tabflow_core::prelude::*;
use tabflow_core::stream;
use tabflow_store::{IntoItems, OrderedStore};
use tracing::{debug, warn};

use crate::key::{KeyCalc, KeySpec, KeyTemplate, ROW_NUMBER};
use crate::traits::{Processor, ProcessorContext};

pub use aggregate::{AggState, Aggregator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JoinMode {
    /// Drop target rows without a matching source key.
    Inner,
    /// Keep unmatched target rows, with the joined fields null.
    #[default]
    HalfOuter,
    /// As `HalfOuter`, then emit a row for every source key no target row
    /// used.
    FullOuter,
}

/// Output field definition. `name` is the source field, defaulting to the
/// output field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub aggregate: Aggregator,
}

impl FieldSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn aggregate(mut self, aggregate: Aggregator) -> Self {
        self.aggregate = aggregate;
        self
    }
}

impl From<Aggregator> for FieldSpec {
    fn from(aggregate: Aggregator) -> Self {
        Self::new().aggregate(aggregate)
    }
}

/// Per-key index record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct KeyRecord {
    fields: BTreeMap<String, Option<AggState>>,
    /// Source key field values, kept for full-outer rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<Vec<Value>>,
}

#[derive(Debug, Clone)]
struct JoinField {
    name: String,
    source: String,
    aggregate: Aggregator,
}

/// Everything the streaming phase needs, fixed by `process_package`.
#[derive(Debug)]
struct JoinPlan {
    source_key: KeyTemplate,
    target_key: Option<KeyTemplate>,
    fields: Vec<JoinField>,
    mode: JoinMode,
    target_fields: Vec<String>,
}

impl JoinPlan {
    /// Finalized aggregates, in field order.
    fn extra(&self, record: &mut KeyRecord) -> Result<Row> {
        let mut row = Row::with_capacity(self.fields.len());
        for f in &self.fields {
            let state = record.fields.remove(&f.name).flatten();
            row.insert(f.name.clone(), f.aggregate.finalize(state)?);
        }
        Ok(row)
    }

    /// Row for a source key no target row matched.
    fn unmatched_row(&self, mut record: KeyRecord) -> Result<Row> {
        let mut row: Row = self
            .target_fields
            .iter()
            .map(|name| (name.clone(), Value::Null))
            .collect();
        row.update(self.extra(&mut record)?);
        if let (Some(values), Some(target_key)) = (record.key, &self.target_key) {
            let names = target_key.fields().iter().filter(|f| *f != ROW_NUMBER);
            for (name, value) in names.zip(values) {
                row.insert(name.clone(), value);
            }
        }
        Ok(row)
    }
}

struct JoinState {
    plan: Arc<JoinPlan>,
    source: Option<RowStream>,
    source_rows: usize,
    db: Option<OrderedStore<KeyRecord>>,
    usage: Option<OrderedStore<bool>>,
}

impl JoinState {
    fn new(plan: Arc<JoinPlan>, options: StoreOptions) -> Self {
        Self {
            plan,
            source: None,
            source_rows: 0,
            db: Some(OrderedStore::new(options.clone())),
            usage: Some(OrderedStore::new(options)),
        }
    }

    fn db(&mut self) -> Result<&mut OrderedStore<KeyRecord>> {
        self.db
            .as_mut()
            .ok_or_else(|| Error::Invariant("join index already released".into()))
    }

    fn usage(&mut self) -> Result<&mut OrderedStore<bool>> {
        self.usage
            .as_mut()
            .ok_or_else(|| Error::Invariant("join key usage already released".into()))
    }

    fn index(&mut self, row: &Row) -> Result<()> {
        self.source_rows += 1;
        let plan = self.plan.clone();
        let key = plan.source_key.render(row, self.source_rows);
        let mut record = self.db()?.get(&key)?.unwrap_or_default();

        for f in &plan.fields {
            let new = match f.aggregate {
                Aggregator::Count => Some(Value::from("")),
                _ => row.get(&f.source).filter(|v| !v.is_null()).cloned(),
            };
            match new {
                Some(value) => {
                    let current = record.fields.remove(&f.name).flatten();
                    let next = f.aggregate.combine(current, value)?;
                    record.fields.insert(f.name.clone(), Some(next));
                }
                None => {
                    record.fields.entry(f.name.clone()).or_insert(None);
                }
            }
        }
        if plan.mode == JoinMode::FullOuter {
            let values = plan
                .source_key
                .fields()
                .iter()
                .filter(|f| *f != ROW_NUMBER)
                .map(|f| row.get_or_null(f).clone())
                .collect();
            record.key = Some(values);
        }

        self.db()?.set(key.clone(), record)?;
        self.usage()?.set(key, false)?;
        Ok(())
    }

    /// Pull whatever is left of the source stream into the index.
    fn drain_source(&mut self) -> Result<()> {
        if let Some(rows) = self.source.take() {
            for row in rows {
                self.index(&row?)?;
            }
            debug!(rows = self.source_rows, "join source indexed");
        }
        Ok(())
    }

    /// Finalized extras for `key`, marking it used. `None` on a miss.
    fn lookup(&mut self, key: &str) -> Result<Option<Row>> {
        let Some(mut record) = self.db()?.get(key)? else {
            return Ok(None);
        };
        self.usage()?.set(key, true)?;
        self.plan.extra(&mut record).map(Some)
    }

    fn release(&mut self) {
        self.db = None;
        self.usage = None;
    }
}

/// Source rows passed through while being indexed.
struct SourceRows {
    state: Arc<Mutex<JoinState>>,
}

impl Iterator for SourceRows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Result<Row>> {
        let mut state = self.state.lock();
        let row = match state.source.as_mut()?.next()? {
            Ok(row) => row,
            Err(e) => return Some(Err(e)),
        };
        Some(state.index(&row).map(|()| row))
    }
}

fn grouped_rows(state: Arc<Mutex<JoinState>>) -> Result<RowStream> {
    let (plan, db) = {
        let mut state = state.lock();
        state.drain_source()?;
        let db = state
            .db
            .take()
            .ok_or_else(|| Error::Invariant("join index already released".into()))?;
        state.release();
        (state.plan.clone(), db)
    };
    let items = db.into_items(false)?;
    Ok(Box::new(items.map(move |item| {
        let (_, mut record) = item?;
        plan.extra(&mut record)
    })))
}

/// Target rows extended with the joined fields, followed by unmatched
/// source keys in full-outer mode.
struct TargetRows {
    state: Arc<Mutex<JoinState>>,
    rows: RowStream,
    row_number: usize,
    started: bool,
    unused: Option<IntoItems<bool>>,
    done: bool,
}

impl TargetRows {
    fn new(state: Arc<Mutex<JoinState>>, rows: RowStream) -> Self {
        Self {
            state,
            rows,
            row_number: 0,
            started: false,
            unused: None,
            done: false,
        }
    }

    fn step(&mut self) -> Result<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        if !self.started {
            self.started = true;
            self.state.lock().drain_source()?;
        }

        if self.unused.is_none() {
            while let Some(row) = self.rows.next() {
                let mut row = row?;
                self.row_number += 1;
                let mut state = self.state.lock();
                let plan = state.plan.clone();
                let key = match &plan.target_key {
                    Some(t) => t.render(&row, self.row_number),
                    None => return Err(Error::Invariant("join target has no key".into())),
                };
                match state.lookup(&key)? {
                    Some(extra) => row.update(extra),
                    None if plan.mode == JoinMode::Inner => continue,
                    None => {
                        for f in &plan.fields {
                            if !row.contains_key(&f.name) {
                                row.insert(f.name.clone(), Value::Null);
                            }
                        }
                    }
                }
                return Ok(Some(row));
            }

            let mut state = self.state.lock();
            if state.plan.mode != JoinMode::FullOuter {
                state.release();
                self.done = true;
                return Ok(None);
            }
            let usage = state
                .usage
                .take()
                .ok_or_else(|| Error::Invariant("join key usage already released".into()))?;
            self.unused = Some(usage.into_items(false)?);
        }

        if let Some(unused) = self.unused.as_mut() {
            for item in unused.by_ref() {
                let (key, used) = item?;
                if used {
                    continue;
                }
                let mut state = self.state.lock();
                let record = state.db()?.get(&key)?.ok_or_else(|| {
                    Error::Invariant(format!("join key '{key}' missing from index"))
                })?;
                return state.plan.unmatched_row(record).map(Some);
            }
        }
        self.state.lock().release();
        self.done = true;
        Ok(None)
    }
}

impl Iterator for TargetRows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Result<Row>> {
        match self.step() {
            Ok(row) => row.map(Ok),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Join `source` into `target`, or group `source` by key into a new
/// `target` resource when no target key is given.
pub struct Join {
    source: String,
    source_key: KeySpec,
    target: String,
    target_key: Option<KeySpec>,
    fields: Vec<(String, FieldSpec)>,
    mode: JoinMode,
    full: Option<bool>,
    source_delete: bool,
    plan: Option<Arc<JoinPlan>>,
}

impl Join {
    pub fn new(
        source: impl Into<String>,
        source_key: impl Into<KeySpec>,
        target: impl Into<String>,
        target_key: impl Into<KeySpec>,
    ) -> Self {
        Self::build(source.into(), source_key.into(), target.into(), Some(target_key.into()))
    }

    /// Group `source` by `key` into a new resource named `target`.
    pub fn group_by(
        source: impl Into<String>,
        key: impl Into<KeySpec>,
        target: impl Into<String>,
    ) -> Self {
        Self::build(source.into(), key.into(), target.into(), None)
    }

    /// Replace `resource` with one row per distinct `key`.
    pub fn with_self<I, S>(resource: impl Into<String>, key: impl Into<KeySpec>, fields: I) -> Self
    where
        I: IntoIterator<Item = (S, FieldSpec)>,
        S: Into<String>,
    {
        let resource = resource.into();
        Self::group_by(resource.clone(), key, resource).fields(fields)
    }

    fn build(
        source: String,
        source_key: KeySpec,
        target: String,
        target_key: Option<KeySpec>,
    ) -> Self {
        Self {
            source,
            source_key,
            target,
            target_key,
            fields: Vec::new(),
            mode: JoinMode::default(),
            full: None,
            source_delete: true,
            plan: None,
        }
    }

    /// Add an output field. `*` adds every source field not otherwise
    /// referenced, with this spec's aggregator.
    pub fn field(mut self, name: impl Into<String>, spec: impl Into<FieldSpec>) -> Self {
        let name = name.into();
        let spec = spec.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = spec,
            None => self.fields.push((name, spec)),
        }
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (S, FieldSpec)>,
        S: Into<String>,
    {
        for (name, spec) in fields {
            self = self.field(name, spec);
        }
        self
    }

    pub fn mode(mut self, mode: JoinMode) -> Self {
        self.mode = mode;
        self
    }

    /// Deprecated: `true` selects half-outer, `false` inner. Overrides
    /// [`Join::mode`].
    pub fn full(mut self, full: bool) -> Self {
        self.full = Some(full);
        self
    }

    pub fn source_delete(mut self, source_delete: bool) -> Self {
        self.source_delete = source_delete;
        self
    }

    fn is_group_by(&self) -> bool {
        self.target_key.is_none()
    }

    fn effective_mode(&self) -> JoinMode {
        match self.full {
            Some(full) => {
                warn!(
                    source_resource = %self.source,
                    target_resource = %self.target,
                    "join `full` flag is deprecated, use `mode` instead"
                );
                if full {
                    JoinMode::HalfOuter
                } else {
                    JoinMode::Inner
                }
            }
            None => self.mode,
        }
    }
}

/// Expand `*` and order: source schema order first, the rest by name.
fn resolve_fields(specs: &[(String, FieldSpec)], schema: &Schema) -> Vec<JoinField> {
    let mut fields: Vec<JoinField> = specs
        .iter()
        .filter(|(name, _)| name != "*")
        .map(|(name, spec)| JoinField {
            name: name.clone(),
            source: spec.name.clone().unwrap_or_else(|| name.clone()),
            aggregate: spec.aggregate,
        })
        .collect();

    if let Some((_, wildcard)) = specs.iter().find(|(name, _)| name == "*") {
        let referenced: HashSet<String> = fields
            .iter()
            .flat_map(|f| [f.source.clone(), f.name.clone()])
            .collect();
        for sf in &schema.fields {
            if !referenced.contains(&sf.name) {
                fields.push(JoinField {
                    name: sf.name.clone(),
                    source: sf.name.clone(),
                    aggregate: wildcard.aggregate,
                });
            }
        }
    }

    let mut ordered = Vec::with_capacity(fields.len());
    for sf in &schema.fields {
        if let Some(pos) = fields.iter().position(|f| f.name == sf.name) {
            ordered.push(fields.swap_remove(pos));
        }
    }
    fields.sort_by(|a, b| a.name.cmp(&b.name));
    ordered.extend(fields);
    ordered
}

/// Add the joined fields to the target schema.
fn describe_target(
    source: &ResourceDescriptor,
    mut target: ResourceDescriptor,
    fields: &[JoinField],
) -> Result<ResourceDescriptor> {
    for f in fields {
        let (data_type, copied) = match f.aggregate.data_type() {
            Some(t) => (t.to_string(), None),
            None => {
                let sf = source.schema.field(&f.source).ok_or_else(|| {
                    Error::config(format!(
                        "failed to find field '{}' in resource '{}'",
                        f.source, source.name
                    ))
                })?;
                let copied = f.aggregate.copies_properties().then(|| sf.clone());
                (sf.field_type.clone(), copied)
            }
        };
        match target.schema.field(&f.name) {
            Some(existing) if existing.field_type != data_type => {
                return Err(Error::config(format!(
                    "reusing field '{}' of resource '{}' with different data types: {} != {}",
                    f.name, target.name, existing.field_type, data_type
                )));
            }
            Some(_) => {}
            None => {
                let mut descriptor =
                    copied.unwrap_or_else(|| FieldDescriptor::new(&f.name, &data_type));
                descriptor.name = f.name.clone();
                descriptor.field_type = data_type;
                target.schema.fields.push(descriptor);
            }
        }
    }
    Ok(target)
}

impl Processor for Join {
    fn name(&self) -> &str {
        "join"
    }

    fn process_package(
        &mut self,
        mut package: PackageDescriptor,
        _ctx: &ProcessorContext,
    ) -> Result<PackageDescriptor> {
        let names = package.resource_names();
        let source_idx = package.resource_index(&self.source).ok_or_else(|| {
            Error::config(format!(
                "source resource '{}' not found in package (target={}, found: {names:?})",
                self.source, self.target
            ))
        })?;

        let group_by = self.is_group_by();
        let target_idx = if group_by {
            None
        } else {
            let idx = package.resource_index(&self.target).ok_or_else(|| {
                Error::config(format!(
                    "target resource '{}' not found in package (source={}, found: {names:?})",
                    self.target, self.source
                ))
            })?;
            if idx <= source_idx {
                return Err(Error::config(format!(
                    "source resource '{}' must appear before target resource '{}', found: {names:?}",
                    self.source, self.target
                )));
            }
            Some(idx)
        };

        let source = package.resources[source_idx].clone();
        let fields = resolve_fields(&self.fields, &source.schema);
        let mut target_fields = Vec::new();
        let mut resources = Vec::with_capacity(package.resources.len() + 1);

        for (idx, resource) in std::mem::take(&mut package.resources).into_iter().enumerate() {
            if idx == source_idx {
                if !self.source_delete {
                    resources.push(resource);
                }
                if group_by {
                    let target = ResourceDescriptor::new(&self.target)
                        .with_path(format!("data/{}.csv", self.target));
                    let target = describe_target(&source, target, &fields)?;
                    target_fields = target.schema.field_names().map(String::from).collect();
                    resources.push(target);
                }
            } else if Some(idx) == target_idx {
                let target = describe_target(&source, resource, &fields)?;
                target_fields = target.schema.field_names().map(String::from).collect();
                resources.push(target);
            } else {
                resources.push(resource);
            }
        }
        package.resources = resources;

        let target_key = match &self.target_key {
            Some(spec) => Some(KeyCalc::for_join(spec)?),
            None => None,
        };
        self.plan = Some(Arc::new(JoinPlan {
            source_key: KeyCalc::for_join(&self.source_key)?,
            target_key,
            fields,
            mode: self.effective_mode(),
            target_fields,
        }));
        Ok(package)
    }

    fn process_resources(
        self: Box<Self>,
        resources: Vec<ResourceStream>,
        ctx: &ProcessorContext,
    ) -> Result<Vec<RowStream>> {
        let group_by = self.is_group_by();
        let Join {
            source,
            target,
            source_delete,
            plan,
            ..
        } = *self;
        let plan = plan
            .ok_or_else(|| Error::Invariant("join resources processed before package".into()))?;
        let state = Arc::new(Mutex::new(JoinState::new(plan, ctx.store_options())));

        let mut out: Vec<RowStream> = Vec::with_capacity(resources.len() + 1);
        for r in resources {
            if r.name() == source {
                state.lock().source = Some(r.rows);
                if !source_delete {
                    out.push(Box::new(SourceRows {
                        state: state.clone(),
                    }));
                }
                if group_by {
                    let state = state.clone();
                    out.push(stream::lazy(move || grouped_rows(state)));
                }
            } else if !group_by && r.name() == target {
                out.push(Box::new(TargetRows::new(state.clone(), r.rows)));
            } else {
                out.push(r.rows);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_follow_source_schema_then_name() {
        let schema = Schema::new(vec![
            FieldDescriptor::new("b", "string"),
            FieldDescriptor::new("a", "integer"),
        ]);
        let specs = vec![
            ("z".to_string(), FieldSpec::source("a")),
            ("a".to_string(), FieldSpec::new()),
            ("*".to_string(), FieldSpec::from(Aggregator::First)),
        ];
        let fields = resolve_fields(&specs, &schema);
        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "z"]);
        assert_eq!(fields[0].aggregate, Aggregator::First);
    }

    #[test]
    fn target_schema_uses_aggregator_types() {
        let source = ResourceDescriptor::new("s").with_schema(Schema::new(vec![
            FieldDescriptor::new("v", "integer").with_property("title", "V".into()),
        ]));
        let fields = vec![
            JoinField {
                name: "n".into(),
                source: "v".into(),
                aggregate: Aggregator::Count,
            },
            JoinField {
                name: "last_v".into(),
                source: "v".into(),
                aggregate: Aggregator::Last,
            },
        ];
        let target = describe_target(&source, ResourceDescriptor::new("t"), &fields).unwrap();
        assert_eq!(target.schema.field("n").unwrap().field_type, "integer");
        let last = target.schema.field("last_v").unwrap();
        assert_eq!(last.field_type, "integer");
        assert_eq!(last.properties.get("title"), Some(&serde_json::json!("V")));
    }

    #[test]
    fn conflicting_reused_field_is_config_error() {
        let source = ResourceDescriptor::new("s")
            .with_schema(Schema::new(vec![FieldDescriptor::new("v", "integer")]));
        let target = ResourceDescriptor::new("t")
            .with_schema(Schema::new(vec![FieldDescriptor::new("v", "string")]));
        let fields = vec![JoinField {
            name: "v".into(),
            source: "v".into(),
            aggregate: Aggregator::Sum,
        }];
        assert!(describe_target(&source, target, &fields)
            .unwrap_err()
            .is_config());
    }
}
