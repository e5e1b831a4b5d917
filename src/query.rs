//! The translating query façade.
//!
//! [`MappedQuery`] wraps a [`SelectBuilder`] for one entity type. Every column
//! argument passes through the entity's name map before it reaches the
//! builder, so callers write `where_eq("item_number", ..)` and the rendered
//! SQL says `ICITEM`. Results come back as [`Entity`] values with raw
//! attributes and optional eager-loaded relations.

use crate::backend::{DatabaseBackend, QueryRow};
use crate::builder::{
    AggregateFunc, ComparisonOp, Condition, DeleteBuilder, Expr, InsertBuilder, Projection,
    SelectBuilder, SortDirection, UpdateBuilder,
};
use crate::entity::{Entity, EntityType};
use crate::error::{QueryError, Result};
use crate::mapping::NameMapper;
use crate::relation;
use crate::schema::Schema;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Caller-supplied adjustment of a related query (eager loads, `where_has`)
pub type Constraint = Arc<dyn Fn(MappedQuery) -> MappedQuery + Send + Sync>;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Default filters added to every query when it runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalScope {
    /// Project only mapped columns when nothing else was selected
    AutoSelectMapped,
    /// `delete_code` equals the active code
    Active,
    /// `company_number` equals the default company
    Company,
}

/// Caller aliases keyed by their upper-cased form.
///
/// Engines that fold unquoted identifiers to upper case return `ITEMCODE` for
/// `ICITEM AS itemCode`; normalization restores the caller's spelling.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    aliases: HashMap<String, String>,
}

impl AliasTable {
    pub fn record(&mut self, alias: &str) {
        self.aliases
            .insert(alias.to_ascii_uppercase(), alias.to_string());
    }

    pub fn resolve(&self, key: &str) -> Option<&str> {
        self.aliases
            .get(&key.to_ascii_uppercase())
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    pub fn normalize(&self, row: QueryRow) -> QueryRow {
        if self.aliases.is_empty() {
            return row;
        }
        row.into_map()
            .into_iter()
            .map(|(key, value)| match self.resolve(&key) {
                Some(alias) => (alias.to_string(), value),
                None => (key, value),
            })
            .collect::<serde_json::Map<_, _>>()
            .into()
    }
}

pub(crate) struct EagerLoad {
    pub(crate) path: String,
    pub(crate) constraint: Option<Constraint>,
}

/// Query over one entity type, addressed by human field names
pub struct MappedQuery {
    schema: Arc<Schema>,
    entity: Arc<EntityType>,
    builder: SelectBuilder,
    aliases: AliasTable,
    removed_scopes: HashSet<GlobalScope>,
    select_all: bool,
    eager: Vec<EagerLoad>,
    synthetic: Vec<Projection>,
    required: Vec<String>,
    pending: Option<QueryError>,
}

impl fmt::Debug for MappedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedQuery")
            .field("entity", &self.entity.name())
            .field("builder", &self.builder)
            .field("removed_scopes", &self.removed_scopes)
            .field("select_all", &self.select_all)
            .field(
                "eager",
                &self.eager.iter().map(|e| e.path.as_str()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl MappedQuery {
    pub(crate) fn new(schema: Arc<Schema>, entity: Arc<EntityType>) -> Self {
        let builder = SelectBuilder::new(entity.table());
        Self {
            schema,
            entity,
            builder,
            aliases: AliasTable::default(),
            removed_scopes: HashSet::new(),
            select_all: false,
            eager: Vec::new(),
            synthetic: Vec::new(),
            required: Vec::new(),
            pending: None,
        }
    }

    /// Empty query over the same entity, used for nested groups
    fn fresh(&self) -> Self {
        Self::new(Arc::clone(&self.schema), Arc::clone(&self.entity))
    }

    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The builder as composed so far, before global scopes
    pub fn builder(&self) -> &SelectBuilder {
        &self.builder
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    fn column(&self, name: &str) -> String {
        self.entity.translate_qualified(name)
    }

    fn expr(&self, expr: Expr) -> Expr {
        match expr {
            Expr::Column(name) => Expr::Column(self.column(&name)),
            opaque => opaque,
        }
    }

    fn projection(&mut self, projection: Projection) -> Projection {
        if let Some(alias) = &projection.alias {
            self.aliases.record(alias);
        }
        Projection {
            expr: self.expr(projection.expr),
            alias: projection.alias,
        }
    }

    fn fail(&mut self, err: QueryError) {
        if self.pending.is_none() {
            self.pending = Some(err);
        }
    }

    fn and_where(mut self, condition: Condition) -> Self {
        self.builder = self.builder.and_where(condition);
        self
    }

    fn simple(&self, column: &str, op: ComparisonOp, value: Option<Value>) -> Condition {
        Condition::Simple {
            column: Expr::Column(self.column(column)),
            op,
            value,
        }
    }

    // Predicates

    pub fn where_eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.where_op(column, ComparisonOp::Eq, value)
    }

    pub fn where_op(self, column: &str, op: ComparisonOp, value: impl Into<Value>) -> Self {
        let condition = self.simple(column, op, Some(value.into()));
        self.and_where(condition)
    }

    /// `column <> value`
    pub fn where_not(self, column: &str, value: impl Into<Value>) -> Self {
        self.where_op(column, ComparisonOp::Ne, value)
    }

    pub fn or_where(self, column: &str, value: impl Into<Value>) -> Self {
        self.or_where_op(column, ComparisonOp::Eq, value)
    }

    pub fn or_where_op(mut self, column: &str, op: ComparisonOp, value: impl Into<Value>) -> Self {
        let condition = self.simple(column, op, Some(value.into()));
        self.builder = self.builder.or_where(condition);
        self
    }

    /// Predicate over an arbitrary expression; only [`Expr::Column`] is
    /// translated.
    pub fn where_expr(self, expr: Expr, op: ComparisonOp, value: impl Into<Value>) -> Self {
        let condition = Condition::Simple {
            column: self.expr(expr),
            op,
            value: Some(value.into()),
        };
        self.and_where(condition)
    }

    pub fn where_in<V: Into<Value>>(self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        let condition = self.simple(column, ComparisonOp::In, Some(Value::Array(values)));
        self.and_where(condition)
    }

    pub fn where_not_in<V: Into<Value>>(
        self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        let condition = self.simple(column, ComparisonOp::NotIn, Some(Value::Array(values)));
        self.and_where(condition)
    }

    pub fn where_null(self, column: &str) -> Self {
        self.where_null_all(&[column])
    }

    pub fn where_not_null(self, column: &str) -> Self {
        self.where_not_null_all(&[column])
    }

    /// `IS NULL` on every listed column
    pub fn where_null_all<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        for column in columns {
            let condition = self.simple(column.as_ref(), ComparisonOp::IsNull, None);
            self = self.and_where(condition);
        }
        self
    }

    /// `IS NOT NULL` on every listed column
    pub fn where_not_null_all<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        for column in columns {
            let condition = self.simple(column.as_ref(), ComparisonOp::IsNotNull, None);
            self = self.and_where(condition);
        }
        self
    }

    pub fn where_between(self, column: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.between(column, low.into(), high.into(), false)
    }

    pub fn where_not_between(
        self,
        column: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.between(column, low.into(), high.into(), true)
    }

    fn between(self, column: &str, low: Value, high: Value, negated: bool) -> Self {
        let condition = Condition::Between {
            column: Expr::Column(self.column(column)),
            low,
            high,
            negated,
        };
        self.and_where(condition)
    }

    /// Column-to-column comparison, both sides translated
    pub fn where_column(self, left: &str, op: ComparisonOp, right: &str) -> Self {
        let condition = Condition::Columns {
            left: self.column(left),
            op,
            right: self.column(right),
        };
        self.and_where(condition)
    }

    /// Raw predicate, passed through untouched
    pub fn where_raw(self, sql: impl Into<String>) -> Self {
        self.and_where(Condition::Raw(sql.into()))
    }

    /// Parenthesized group of predicates, ANDed onto the query
    pub fn where_nested(mut self, group: impl FnOnce(MappedQuery) -> MappedQuery) -> Self {
        let inner = group(self.fresh());
        if let Some(err) = inner.pending {
            self.fail(err);
        }
        if let Some(condition) = inner.builder.where_condition().cloned() {
            self.builder = self.builder.and_where(condition);
        }
        self
    }

    /// Parenthesized group of predicates, ORed onto the query
    pub fn or_where_nested(mut self, group: impl FnOnce(MappedQuery) -> MappedQuery) -> Self {
        let inner = group(self.fresh());
        if let Some(err) = inner.pending {
            self.fail(err);
        }
        if let Some(condition) = inner.builder.where_condition().cloned() {
            self.builder = self.builder.or_where(condition);
        }
        self
    }

    // Ordering, grouping, paging

    pub fn order_by(mut self, column: &str, direction: SortDirection) -> Self {
        let column = self.column(column);
        self.builder = self.builder.order_by(column, direction);
        self
    }

    pub fn order_asc(self, column: &str) -> Self {
        self.order_by(column, SortDirection::Asc)
    }

    pub fn order_desc(self, column: &str) -> Self {
        self.order_by(column, SortDirection::Desc)
    }

    pub fn group_by<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        let columns = self.entity.translate_all(columns);
        self.builder = self.builder.group_by(columns);
        self
    }

    pub fn having(mut self, column: &str, op: ComparisonOp, value: impl Into<Value>) -> Self {
        let condition = self.simple(column, op, Some(value.into()));
        self.builder = self.builder.having(condition);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.builder = self.builder.limit(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.builder = self.builder.offset(offset);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.builder = self.builder.distinct();
        self
    }

    /// Join another table on raw column names
    pub fn join(mut self, table: &str, left: &str, right: &str) -> Self {
        self.builder = self
            .builder
            .inner_join(table, Condition::columns_eq(left, right));
        self
    }

    pub fn left_join(mut self, table: &str, left: &str, right: &str) -> Self {
        self.builder = self
            .builder
            .left_join(table, Condition::columns_eq(left, right));
        self
    }

    // Projection

    /// Replace the projection. Entries may carry an alias (`"item_number as
    /// itemCode"`); aliases are kept verbatim in results.
    pub fn select<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        let projections = columns
            .iter()
            .map(|c| {
                let projection = Projection::from(c.as_ref());
                self.projection(projection)
            })
            .collect::<Vec<_>>();
        self.builder = self.builder.select(projections);
        self
    }

    pub fn select_as(mut self, column: &str, alias: &str) -> Self {
        let projection = self.projection(Projection::aliased(column, alias));
        self.builder = self.builder.add_select(projection);
        self
    }

    pub fn add_select(mut self, column: &str) -> Self {
        let projection = self.projection(Projection::from(column));
        self.builder = self.builder.add_select(projection);
        self
    }

    /// Add a raw or sub-query projection
    pub fn add_select_expr(mut self, expr: Expr, alias: Option<&str>) -> Self {
        let projection = match alias {
            Some(alias) => Projection::aliased(expr, alias),
            None => Projection::new(expr),
        };
        let projection = self.projection(projection);
        self.builder = self.builder.add_select(projection);
        self
    }

    // Scopes

    pub fn without_global_scope(mut self, scope: GlobalScope) -> Self {
        self.removed_scopes.insert(scope);
        self
    }

    /// Every column of every table, also for eager-loaded relations
    pub fn select_all(mut self) -> Self {
        self.select_all = true;
        self.removed_scopes.insert(GlobalScope::AutoSelectMapped);
        self
    }

    /// Mapped base columns plus mapped columns of joined extensions; applied
    /// to eager loads of mapped entity types as well.
    pub fn select_mapped(mut self) -> Self {
        let columns = self.mapped_projection(&self.builder);
        if !columns.is_empty() {
            self.builder = self.builder.select(columns);
        }
        self.wrap_eager_loads(|query| {
            if query.entity_type().has_maps() {
                query.select_mapped()
            } else {
                query
            }
        })
    }

    pub fn with_inactive(self) -> Self {
        self.without_global_scope(GlobalScope::Active)
    }

    pub fn with_all_companies(self) -> Self {
        self.without_global_scope(GlobalScope::Company)
    }

    /// Replace the default company filter with `company`
    pub fn for_company(self, company: impl Into<Value>) -> Self {
        let query = self.without_global_scope(GlobalScope::Company);
        let mapped = query.entity.mapped_column("company_number");
        match mapped {
            Some(raw) => {
                let column = query.entity.qualify(&raw);
                query.and_where(Condition::eq(column, company))
            }
            None => query,
        }
    }

    /// Drop the active and company filters
    pub fn unfiltered(self) -> Self {
        self.with_inactive().with_all_companies()
    }

    // Relations

    /// Eager-load a relation; dotted paths load nested relations.
    pub fn with(mut self, path: &str) -> Self {
        self.eager.push(EagerLoad {
            path: path.to_string(),
            constraint: None,
        });
        self
    }

    pub fn with_constraint(
        mut self,
        path: &str,
        constraint: impl Fn(MappedQuery) -> MappedQuery + Send + Sync + 'static,
    ) -> Self {
        self.eager.push(EagerLoad {
            path: path.to_string(),
            constraint: Some(Arc::new(constraint)),
        });
        self
    }

    /// Only rows with at least one related row
    pub fn where_has(self, relation: &str) -> Self {
        self.existence(relation, false, |q| q)
    }

    pub fn where_has_constraint(
        self,
        relation: &str,
        constraint: impl FnOnce(MappedQuery) -> MappedQuery,
    ) -> Self {
        self.existence(relation, false, constraint)
    }

    /// Only rows without related rows
    pub fn where_doesnt_have(self, relation: &str) -> Self {
        self.existence(relation, true, |q| q)
    }

    fn existence(
        mut self,
        name: &str,
        negated: bool,
        constraint: impl FnOnce(MappedQuery) -> MappedQuery,
    ) -> Self {
        let found = self.schema.relation(self.entity.name(), name);
        let relation = match found {
            Ok(relation) => relation,
            Err(err) => {
                self.fail(err);
                return self;
            }
        };
        let related = self.schema.query_type(relation.related()).select_all();
        let related = constraint(relation.existence_query(related, self.entity.table()));
        match related.build_select() {
            Ok(query) => {
                self.builder = self.builder.and_where(Condition::Exists {
                    query: Box::new(query),
                    negated,
                });
            }
            Err(err) => self.fail(err),
        }
        self
    }

    // Hooks for relations and extensions

    pub(crate) fn map_builder(mut self, f: impl FnOnce(SelectBuilder) -> SelectBuilder) -> Self {
        self.builder = f(self.builder);
        self
    }

    /// Projections appended after the caller's, which are table-qualified
    pub(crate) fn with_synthetic(mut self, projections: Vec<Projection>) -> Self {
        self.synthetic.extend(projections);
        self
    }

    /// Columns added to an explicit projection when missing
    pub(crate) fn require_columns(mut self, columns: Vec<String>) -> Self {
        self.required.extend(columns);
        self
    }

    pub(crate) fn is_select_all(&self) -> bool {
        self.select_all
    }

    /// Whether the auto-select scope would project mapped columns
    pub(crate) fn auto_selects(&self) -> bool {
        !self.select_all
            && !self.removed_scopes.contains(&GlobalScope::AutoSelectMapped)
            && self.entity.get_options().auto_select_mapped
            && self.entity.has_maps()
    }

    /// Compose `f` after the constraint of every eager load
    pub(crate) fn wrap_eager_loads(
        mut self,
        f: impl Fn(MappedQuery) -> MappedQuery + Send + Sync + Clone + 'static,
    ) -> Self {
        for load in &mut self.eager {
            let previous = load.constraint.take();
            let f = f.clone();
            load.constraint = Some(Arc::new(move |query| match &previous {
                Some(previous) => f(previous(query)),
                None => f(query),
            }));
        }
        self
    }

    fn mapped_projection(&self, builder: &SelectBuilder) -> Vec<Projection> {
        let table = self.entity.table();
        let mut columns: Vec<Projection> = self
            .entity
            .mapper()
            .base()
            .raw_columns()
            .map(|raw| Projection::new(format!("{}.{}", table, raw)))
            .collect();
        for join in builder.joins() {
            if let Some(maps) = self.entity.mapper().extension(&join.table) {
                columns.extend(
                    maps.raw_columns()
                        .map(|raw| Projection::new(format!("{}.{}", join.table, raw))),
                );
            }
        }
        columns
    }

    /// The builder with global scopes and relation projections applied
    pub fn build_select(&self) -> Result<SelectBuilder> {
        if let Some(err) = &self.pending {
            return Err(replay(err));
        }

        let entity = &self.entity;
        let options = entity.get_options();
        let mut builder = self.builder.clone();

        if options.filter_active_only && !self.removed_scopes.contains(&GlobalScope::Active) {
            if let Some(raw) = entity.mapped_column("delete_code") {
                builder = builder.and_where(Condition::eq(
                    entity.qualify(&raw),
                    options.active_delete_code.clone(),
                ));
            }
        }

        if options.filter_by_company && !self.removed_scopes.contains(&GlobalScope::Company) {
            if let Some(raw) = entity.mapped_column("company_number") {
                builder = builder.and_where(Condition::eq(
                    entity.qualify(&raw),
                    options.default_company.clone(),
                ));
            }
        }

        if self.auto_selects() && !builder.has_columns() {
            let columns = self.mapped_projection(&builder);
            if !columns.is_empty() {
                builder = builder.select(columns);
            }
        }

        if !self.required.is_empty()
            && builder.has_columns()
            && !builder.columns().iter().any(Projection::is_wildcard)
        {
            for column in &self.required {
                let bare = column.rsplit('.').next().unwrap_or(column);
                let present = builder.columns().iter().any(|p| {
                    p.alias.is_none() && matches!(p.expr.as_column(), Some(c) if c == column.as_str() || c == bare)
                });
                if !present {
                    builder = builder.add_select(column.as_str());
                }
            }
        }

        if !self.synthetic.is_empty() {
            let table = entity.table();
            let columns = if builder.has_columns() {
                builder
                    .columns()
                    .iter()
                    .map(|p| qualify_projection(p, table))
                    .collect()
            } else {
                vec![Projection::new(format!("{}.*", table))]
            };
            builder = builder.select(columns);
            for projection in &self.synthetic {
                builder = builder.add_select(projection.clone());
            }
        }

        Ok(builder)
    }

    pub fn to_sql(&self) -> Result<String> {
        self.build_select()?.build()
    }

    // Execution

    /// Run the query and hydrate entities, then resolve eager loads
    pub async fn get(self, backend: &mut dyn DatabaseBackend) -> Result<Vec<Entity>> {
        let sql = self.to_sql()?;
        log::debug!("[{}] {}", self.entity.name(), sql);

        let rows = backend.query(&sql).await?;
        let mut entities: Vec<Entity> = rows
            .into_iter()
            .map(|row| {
                let mut entity = self.entity.hydrate(self.aliases.normalize(row));
                entity.mark_aliased(&self.aliases);
                entity
            })
            .collect();

        if !entities.is_empty() && !self.eager.is_empty() {
            load_relations(
                self.schema,
                self.entity,
                self.eager,
                self.select_all,
                &mut entities,
                backend,
            )
            .await?;
        }
        Ok(entities)
    }

    pub async fn first(self, backend: &mut dyn DatabaseBackend) -> Result<Option<Entity>> {
        Ok(self.limit(1).get(backend).await?.into_iter().next())
    }

    pub async fn count(self, backend: &mut dyn DatabaseBackend) -> Result<i64> {
        let sql = self
            .build_select()?
            .without_ordering()
            .select(Vec::<Projection>::new())
            .aggregate(AggregateFunc::Count, "*", Some("aggregate"))
            .build()?;
        log::debug!("[{}] {}", self.entity.name(), sql);

        let rows = backend.query(&sql).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get_i64("aggregate"))
            .unwrap_or(0))
    }

    pub async fn exists(self, backend: &mut dyn DatabaseBackend) -> Result<bool> {
        Ok(self.count(backend).await? > 0)
    }

    /// Values of one column across all matching rows
    pub async fn pluck(self, column: &str, backend: &mut dyn DatabaseBackend) -> Result<Vec<Value>> {
        let raw = self.column(column);
        let sql = self
            .build_select()?
            .select(vec![raw.as_str()])
            .build()?;
        log::debug!("[{}] {}", self.entity.name(), sql);

        let key = raw.rsplit('.').next().unwrap_or(&raw).to_string();
        let rows = backend.query(&sql).await?;
        Ok(rows
            .iter()
            .map(|row| row.value(&key).cloned().unwrap_or(Value::Null))
            .collect())
    }

    /// Values of one column keyed by another, both given by human or raw
    /// name. Later rows overwrite earlier ones with the same key.
    pub async fn pluck_keyed(
        self,
        column: &str,
        key: &str,
        backend: &mut dyn DatabaseBackend,
    ) -> Result<serde_json::Map<String, Value>> {
        let raw = self.column(column);
        let raw_key = self.column(key);
        let mut projection = vec![raw.as_str()];
        if raw_key != raw {
            projection.push(raw_key.as_str());
        }
        let sql = self.build_select()?.select(projection).build()?;
        log::debug!("[{}] {}", self.entity.name(), sql);

        let value_name = raw.rsplit('.').next().unwrap_or(&raw).to_string();
        let key_name = raw_key.rsplit('.').next().unwrap_or(&raw_key).to_string();
        let rows = backend.query(&sql).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let key = match row.value(&key_name) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                };
                (key, row.value(&value_name).cloned().unwrap_or(Value::Null))
            })
            .collect())
    }

    /// One column of the first matching row
    pub async fn value(self, column: &str, backend: &mut dyn DatabaseBackend) -> Result<Option<Value>> {
        Ok(self.limit(1).pluck(column, backend).await?.into_iter().next())
    }

    /// Bulk update of every matching row
    pub async fn update<K: AsRef<str>, V: Into<Value>>(
        self,
        values: impl IntoIterator<Item = (K, V)>,
        backend: &mut dyn DatabaseBackend,
    ) -> Result<u64> {
        let values: Vec<(String, Value)> = values
            .into_iter()
            .map(|(k, v)| (self.entity.translate(k.as_ref()), v.into()))
            .collect();
        let select = self.build_select()?;
        let sql = UpdateBuilder::new(self.entity.table())
            .set_many(values)
            .where_clause(select.where_condition().cloned())
            .build()?;
        log::debug!("[{}] {}", self.entity.name(), sql);
        backend.execute(&sql).await
    }

    /// Bulk delete of every matching row
    pub async fn delete(self, backend: &mut dyn DatabaseBackend) -> Result<u64> {
        let select = self.build_select()?;
        let sql = DeleteBuilder::new(self.entity.table())
            .where_clause(select.where_condition().cloned())
            .build()?;
        log::debug!("[{}] {}", self.entity.name(), sql);
        backend.execute(&sql).await
    }

    pub async fn insert<K: AsRef<str>, V: Into<Value>>(
        self,
        values: impl IntoIterator<Item = (K, V)>,
        backend: &mut dyn DatabaseBackend,
    ) -> Result<u64> {
        self.insert_batch(vec![values], backend).await
    }

    pub async fn insert_batch<K, V, R>(
        self,
        rows: impl IntoIterator<Item = R>,
        backend: &mut dyn DatabaseBackend,
    ) -> Result<u64>
    where
        K: AsRef<str>,
        V: Into<Value>,
        R: IntoIterator<Item = (K, V)>,
    {
        let mut insert = InsertBuilder::new(self.entity.table());
        for row in rows {
            let row: Vec<(String, Value)> = row
                .into_iter()
                .map(|(k, v)| (self.entity.translate(k.as_ref()), v.into()))
                .collect();
            insert = insert.row(row);
        }
        let sql = insert.build()?;
        log::debug!("[{}] {}", self.entity.name(), sql);
        backend.execute(&sql).await
    }
}

fn qualify_projection(projection: &Projection, table: &str) -> Projection {
    match &projection.expr {
        Expr::Column(column) if !column.contains('.') => Projection {
            expr: Expr::Column(format!("{}.{}", table, column)),
            alias: projection.alias.clone(),
        },
        _ => projection.clone(),
    }
}

/// Deferred errors are surfaced each time the query is rendered.
fn replay(err: &QueryError) -> QueryError {
    match err {
        QueryError::UnknownRelation { entity, relation } => QueryError::UnknownRelation {
            entity: entity.clone(),
            relation: relation.clone(),
        },
        QueryError::EntityNotRegistered(name) => QueryError::EntityNotRegistered(name.clone()),
        other => QueryError::Query(other.to_string()),
    }
}

struct EagerGroup {
    name: String,
    constraint: Option<Constraint>,
    nested: Vec<EagerLoad>,
}

/// Group eager loads by their first path segment, keeping request order.
fn group_eager_loads(loads: Vec<EagerLoad>) -> Vec<EagerGroup> {
    let mut groups: Vec<EagerGroup> = Vec::new();
    for load in loads {
        let (head, rest) = match load.path.split_once('.') {
            Some((head, rest)) => (head.to_string(), Some(rest.to_string())),
            None => (load.path.clone(), None),
        };
        let index = match groups.iter().position(|g| g.name == head) {
            Some(index) => index,
            None => {
                groups.push(EagerGroup {
                    name: head,
                    constraint: None,
                    nested: Vec::new(),
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[index];
        match rest {
            Some(path) => group.nested.push(EagerLoad {
                path,
                constraint: load.constraint,
            }),
            None => {
                if load.constraint.is_some() {
                    group.constraint = load.constraint;
                }
            }
        }
    }
    groups
}

fn load_relations<'a>(
    schema: Arc<Schema>,
    entity: Arc<EntityType>,
    eager: Vec<EagerLoad>,
    select_all: bool,
    parents: &'a mut [Entity],
    backend: &'a mut dyn DatabaseBackend,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        for group in group_eager_loads(eager) {
            let resolver = schema.relation(entity.name(), &group.name)?;

            let mut query = schema.query_type(resolver.related());
            if select_all {
                query = query.select_all();
            }
            query = resolver.prepare(query);
            if let Some(constraint) = &group.constraint {
                query = constraint(query);
            }
            query.eager.extend(group.nested);

            relation::eager_load(resolver.as_ref(), parents, query, backend).await?;
        }
        Ok(())
    })
}
