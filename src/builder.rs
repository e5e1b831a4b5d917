use crate::error::{QueryError, Result};
use serde_json::Value;
use std::fmt;

/// Comparison operators for WHERE clauses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl ComparisonOp {
    /// Parse the textual operators callers pass to `where_op`/`having`.
    pub fn parse(op: &str) -> Result<Self> {
        match op.trim().to_ascii_uppercase().as_str() {
            "=" | "==" => Ok(ComparisonOp::Eq),
            "!=" | "<>" => Ok(ComparisonOp::Ne),
            "<" => Ok(ComparisonOp::Lt),
            "<=" => Ok(ComparisonOp::Le),
            ">" => Ok(ComparisonOp::Gt),
            ">=" => Ok(ComparisonOp::Ge),
            "LIKE" => Ok(ComparisonOp::Like),
            "NOT LIKE" => Ok(ComparisonOp::NotLike),
            "IN" => Ok(ComparisonOp::In),
            "NOT IN" => Ok(ComparisonOp::NotIn),
            other => Err(QueryError::Query(format!("Unsupported operator: {}", other))),
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonOp::Eq => write!(f, "="),
            ComparisonOp::Ne => write!(f, "<>"),
            ComparisonOp::Lt => write!(f, "<"),
            ComparisonOp::Le => write!(f, "<="),
            ComparisonOp::Gt => write!(f, ">"),
            ComparisonOp::Ge => write!(f, ">="),
            ComparisonOp::Like => write!(f, "LIKE"),
            ComparisonOp::NotLike => write!(f, "NOT LIKE"),
            ComparisonOp::In => write!(f, "IN"),
            ComparisonOp::NotIn => write!(f, "NOT IN"),
            ComparisonOp::IsNull => write!(f, "IS NULL"),
            ComparisonOp::IsNotNull => write!(f, "IS NOT NULL"),
        }
    }
}

/// Logical operators for combining conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

impl fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalOp::And => write!(f, "AND"),
            LogicalOp::Or => write!(f, "OR"),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "ASC"),
            SortDirection::Desc => write!(f, "DESC"),
        }
    }
}

/// Join type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER JOIN"),
            JoinType::Left => write!(f, "LEFT JOIN"),
            JoinType::Right => write!(f, "RIGHT JOIN"),
            JoinType::Full => write!(f, "FULL JOIN"),
        }
    }
}

/// Aggregate function
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateFunc {
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunc {
    pub fn to_sql(&self, column: &str) -> String {
        match self {
            AggregateFunc::Count => "COUNT(*)".to_string(),
            AggregateFunc::CountDistinct => format!("COUNT(DISTINCT {})", column),
            AggregateFunc::Sum => format!("SUM({})", column),
            AggregateFunc::Avg => format!("AVG({})", column),
            AggregateFunc::Min => format!("MIN({})", column),
            AggregateFunc::Max => format!("MAX({})", column),
        }
    }
}

/// Left-hand side of a predicate or a projection.
///
/// Only [`Expr::Column`] is ever subject to name translation; raw fragments
/// and sub-queries are opaque and pass through untouched.
#[derive(Debug, Clone)]
pub enum Expr {
    Column(String),
    Raw(String),
    SubQuery(Box<SelectBuilder>),
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column(name.into())
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw(sql.into())
    }

    pub fn sub_query(query: SelectBuilder) -> Self {
        Expr::SubQuery(Box::new(query))
    }

    pub fn as_column(&self) -> Option<&str> {
        match self {
            Expr::Column(name) => Some(name),
            _ => None,
        }
    }

    pub fn to_sql(&self) -> String {
        match self {
            Expr::Column(name) | Expr::Raw(name) => name.clone(),
            Expr::SubQuery(query) => format!("({})", query.render()),
        }
    }
}

impl From<&str> for Expr {
    fn from(name: &str) -> Self {
        Expr::Column(name.to_string())
    }
}

impl From<String> for Expr {
    fn from(name: String) -> Self {
        Expr::Column(name)
    }
}

impl From<&String> for Expr {
    fn from(name: &String) -> Self {
        Expr::Column(name.clone())
    }
}

impl From<SelectBuilder> for Expr {
    fn from(query: SelectBuilder) -> Self {
        Expr::sub_query(query)
    }
}

/// One SELECT list entry: positional when `alias` is `None`, named otherwise.
#[derive(Debug, Clone)]
pub struct Projection {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl Projection {
    pub fn new(expr: impl Into<Expr>) -> Self {
        Self {
            expr: expr.into(),
            alias: None,
        }
    }

    pub fn aliased(expr: impl Into<Expr>, alias: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            alias: Some(alias.into()),
        }
    }

    /// `*` or `table.*`
    pub fn is_wildcard(&self) -> bool {
        matches!(&self.expr, Expr::Column(c) if c == "*" || c.ends_with(".*"))
    }

    pub fn to_sql(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{} AS {}", self.expr.to_sql(), alias),
            None => self.expr.to_sql(),
        }
    }
}

/// `"column"` is positional; `"column as alias"` is named.
impl From<&str> for Projection {
    fn from(entry: &str) -> Self {
        let lower = entry.to_ascii_lowercase();
        match lower.rfind(" as ") {
            Some(pos) => {
                let column = entry[..pos].trim();
                let alias = entry[pos + 4..].trim();
                Projection::aliased(column, alias)
            }
            None => Projection::new(entry.trim()),
        }
    }
}

impl From<String> for Projection {
    fn from(entry: String) -> Self {
        Projection::from(entry.as_str())
    }
}

impl From<&String> for Projection {
    fn from(entry: &String) -> Self {
        Projection::from(entry.as_str())
    }
}

impl From<Expr> for Projection {
    fn from(expr: Expr) -> Self {
        Projection::new(expr)
    }
}

/// WHERE condition
#[derive(Debug, Clone)]
pub enum Condition {
    Simple {
        column: Expr,
        op: ComparisonOp,
        value: Option<Value>,
    },
    Between {
        column: Expr,
        low: Value,
        high: Value,
        negated: bool,
    },
    /// Column-to-column comparison (`a.x = b.y`), used for join and
    /// existence constraints.
    Columns {
        left: String,
        op: ComparisonOp,
        right: String,
    },
    Exists {
        query: Box<SelectBuilder>,
        negated: bool,
    },
    Compound {
        conditions: Vec<Condition>,
        op: LogicalOp,
    },
    Raw(String),
}

impl Condition {
    pub fn eq(column: impl Into<Expr>, value: impl Into<Value>) -> Self {
        Condition::Simple {
            column: column.into(),
            op: ComparisonOp::Eq,
            value: Some(value.into()),
        }
    }

    pub fn columns_eq(left: impl Into<String>, right: impl Into<String>) -> Self {
        Condition::Columns {
            left: left.into(),
            op: ComparisonOp::Eq,
            right: right.into(),
        }
    }

    pub fn is_null(column: impl Into<Expr>) -> Self {
        Condition::Simple {
            column: column.into(),
            op: ComparisonOp::IsNull,
            value: None,
        }
    }

    /// AND-chain of `conditions`
    pub fn all(conditions: Vec<Condition>) -> Self {
        Condition::Compound {
            conditions,
            op: LogicalOp::And,
        }
    }

    /// OR-chain of `conditions`
    pub fn any(conditions: Vec<Condition>) -> Self {
        Condition::Compound {
            conditions,
            op: LogicalOp::Or,
        }
    }

    pub fn to_sql(&self) -> String {
        match self {
            Condition::Simple { column, op, value } => {
                let column = column.to_sql();
                if matches!(op, ComparisonOp::IsNull | ComparisonOp::IsNotNull) {
                    format!("{} {}", column, op)
                } else if matches!(op, ComparisonOp::In | ComparisonOp::NotIn) {
                    match value {
                        Some(Value::Array(arr)) if !arr.is_empty() => {
                            let values = arr
                                .iter()
                                .map(format_value)
                                .collect::<Vec<_>>()
                                .join(", ");
                            format!("{} {} ({})", column, op, values)
                        }
                        // An empty IN list matches nothing; NOT IN matches everything.
                        _ if *op == ComparisonOp::In => "1 = 0".to_string(),
                        _ => "1 = 1".to_string(),
                    }
                } else {
                    let val = value
                        .as_ref()
                        .map(format_value)
                        .unwrap_or_else(|| "NULL".to_string());
                    format!("{} {} {}", column, op, val)
                }
            }
            Condition::Between {
                column,
                low,
                high,
                negated,
            } => format!(
                "{} {}BETWEEN {} AND {}",
                column.to_sql(),
                if *negated { "NOT " } else { "" },
                format_value(low),
                format_value(high)
            ),
            Condition::Columns { left, op, right } => format!("{} {} {}", left, op, right),
            Condition::Exists { query, negated } => format!(
                "{}EXISTS ({})",
                if *negated { "NOT " } else { "" },
                query.render()
            ),
            Condition::Compound { conditions, op } => {
                if conditions.is_empty() {
                    match op {
                        LogicalOp::And => "1 = 1".to_string(),
                        LogicalOp::Or => "1 = 0".to_string(),
                    }
                } else {
                    let parts = conditions
                        .iter()
                        .map(|c| c.to_sql())
                        .collect::<Vec<_>>()
                        .join(&format!(" {} ", op));
                    format!("({})", parts)
                }
            }
            Condition::Raw(sql) => sql.clone(),
        }
    }
}

/// Join clause
#[derive(Debug, Clone)]
pub struct Join {
    pub join_type: JoinType,
    pub table: String,
    pub on_condition: Condition,
}

impl Join {
    pub fn to_sql(&self) -> String {
        format!("{} {} ON {}", self.join_type, self.table, self.on_condition.to_sql())
    }
}

/// ORDER BY clause
#[derive(Debug, Clone)]
pub struct OrderBy {
    pub column: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn to_sql(&self) -> String {
        format!("{} {}", self.column, self.direction)
    }
}

/// SELECT query builder
#[derive(Debug, Clone)]
pub struct SelectBuilder {
    table: String,
    columns: Vec<Projection>,
    joins: Vec<Join>,
    where_clause: Option<Condition>,
    group_by: Vec<String>,
    having: Option<Condition>,
    order_by: Vec<OrderBy>,
    limit: Option<usize>,
    offset: Option<usize>,
    distinct: bool,
}

impl SelectBuilder {
    /// Create a new SELECT query builder. No projection means `*`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            joins: Vec::new(),
            where_clause: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[Projection] {
        &self.columns
    }

    /// Whether a projection has been set explicitly
    pub fn has_columns(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn where_condition(&self) -> Option<&Condition> {
        self.where_clause.as_ref()
    }

    /// Replace the FROM table
    pub fn from(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Select specific columns, replacing any previous projection
    pub fn select<P: Into<Projection>>(mut self, columns: Vec<P>) -> Self {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Select all columns
    pub fn select_all(mut self) -> Self {
        self.columns = vec![Projection::new("*")];
        self
    }

    /// Append a projection entry
    pub fn add_select(mut self, column: impl Into<Projection>) -> Self {
        let column = column.into();
        if self.columns.len() == 1 && matches!(&self.columns[0].expr, Expr::Column(c) if c == "*")
        {
            self.columns.clear();
        }
        self.columns.push(column);
        self
    }

    /// Add an aggregate function
    pub fn aggregate(
        self,
        func: AggregateFunc,
        column: impl Into<String>,
        alias: Option<impl Into<String>>,
    ) -> Self {
        let col_str = func.to_sql(&column.into());
        match alias {
            Some(alias) => self.add_select(Projection::aliased(Expr::Raw(col_str), alias)),
            None => self.add_select(Projection::new(Expr::Raw(col_str))),
        }
    }

    /// Use DISTINCT
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Set the WHERE condition, replacing any previous one
    pub fn where_clause(mut self, condition: Condition) -> Self {
        self.where_clause = Some(condition);
        self
    }

    /// Add an AND condition to existing WHERE
    pub fn and_where(mut self, condition: Condition) -> Self {
        self.where_clause = Some(chain(self.where_clause, condition, LogicalOp::And));
        self
    }

    /// Add an OR condition to existing WHERE
    pub fn or_where(mut self, condition: Condition) -> Self {
        self.where_clause = Some(chain(self.where_clause, condition, LogicalOp::Or));
        self
    }

    /// Add a simple WHERE condition (column = value)
    pub fn where_eq(self, column: impl Into<String>, value: Value) -> Self {
        self.and_where(Condition::eq(column.into(), value))
    }

    /// Add a WHERE column > value condition
    pub fn where_gt(self, column: impl Into<String>, value: Value) -> Self {
        self.and_where(Condition::Simple {
            column: Expr::Column(column.into()),
            op: ComparisonOp::Gt,
            value: Some(value),
        })
    }

    /// Add a WHERE column IN (...) condition
    pub fn where_in(self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.and_where(Condition::Simple {
            column: Expr::Column(column.into()),
            op: ComparisonOp::In,
            value: Some(Value::Array(values)),
        })
    }

    /// Add a WHERE column IS NULL condition
    pub fn where_null(self, column: impl Into<String>) -> Self {
        self.and_where(Condition::Simple {
            column: Expr::Column(column.into()),
            op: ComparisonOp::IsNull,
            value: None,
        })
    }

    /// Add a JOIN clause
    pub fn join(mut self, join_type: JoinType, table: impl Into<String>, on: Condition) -> Self {
        self.joins.push(Join {
            join_type,
            table: table.into(),
            on_condition: on,
        });
        self
    }

    /// Add an INNER JOIN
    pub fn inner_join(self, table: impl Into<String>, on: Condition) -> Self {
        self.join(JoinType::Inner, table, on)
    }

    /// Add a LEFT JOIN
    pub fn left_join(self, table: impl Into<String>, on: Condition) -> Self {
        self.join(JoinType::Left, table, on)
    }

    /// Add GROUP BY columns
    pub fn group_by(mut self, columns: Vec<impl Into<String>>) -> Self {
        self.group_by
            .extend(columns.into_iter().map(|c| c.into()));
        self
    }

    /// Add a HAVING condition, ANDed with any existing one
    pub fn having(mut self, condition: Condition) -> Self {
        self.having = Some(match self.having {
            Some(existing) => Condition::all(vec![existing, condition]),
            None => condition,
        });
        self
    }

    /// Add ORDER BY
    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            direction,
        });
        self
    }

    /// Add ascending ORDER BY
    pub fn order_asc(self, column: impl Into<String>) -> Self {
        self.order_by(column, SortDirection::Asc)
    }

    /// Add descending ORDER BY
    pub fn order_desc(self, column: impl Into<String>) -> Self {
        self.order_by(column, SortDirection::Desc)
    }

    /// Set LIMIT
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set OFFSET
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Drop ordering and paging, for aggregate wrappers such as COUNT.
    pub(crate) fn without_ordering(mut self) -> Self {
        self.order_by.clear();
        self.limit = None;
        self.offset = None;
        self
    }

    pub(crate) fn render(&self) -> String {
        let mut sql = String::from("SELECT ");

        if self.distinct {
            sql.push_str("DISTINCT ");
        }

        if self.columns.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(
                &self
                    .columns
                    .iter()
                    .map(|c| c.to_sql())
                    .collect::<Vec<_>>()
                    .join(", "),
            );
        }
        sql.push_str(&format!(" FROM {}", self.table));

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.to_sql());
        }

        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.to_sql());
        }

        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }

        if let Some(having) = &self.having {
            sql.push_str(" HAVING ");
            sql.push_str(&having.to_sql());
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(
                &self
                    .order_by
                    .iter()
                    .map(|o| o.to_sql())
                    .collect::<Vec<_>>()
                    .join(", "),
            );
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        sql
    }

    /// Build the SQL query string
    pub fn build(&self) -> Result<String> {
        if self.table.is_empty() {
            return Err(QueryError::Query("SELECT requires a table".to_string()));
        }
        Ok(self.render())
    }

    /// Build and return the SQL query string (convenience method)
    pub fn to_sql(&self) -> Result<String> {
        self.build()
    }
}

/// UPDATE query builder
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    table: String,
    set_values: Vec<(String, Value)>,
    where_clause: Option<Condition>,
    fetch_first: Option<usize>,
}

impl UpdateBuilder {
    /// Create a new UPDATE query builder
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            set_values: Vec::new(),
            where_clause: None,
            fetch_first: None,
        }
    }

    /// Set a column value
    pub fn set(mut self, column: impl Into<String>, value: Value) -> Self {
        self.set_values.push((column.into(), value));
        self
    }

    /// Set multiple column values
    pub fn set_many(mut self, values: Vec<(impl Into<String>, Value)>) -> Self {
        for (col, val) in values {
            self.set_values.push((col.into(), val));
        }
        self
    }

    /// Set WHERE condition, replacing any previous one
    pub fn where_clause(mut self, condition: Option<Condition>) -> Self {
        self.where_clause = condition;
        self
    }

    /// Add an AND condition to existing WHERE
    pub fn and_where(mut self, condition: Condition) -> Self {
        self.where_clause = Some(match self.where_clause {
            Some(existing) => Condition::all(vec![existing, condition]),
            None => condition,
        });
        self
    }

    /// Add simple WHERE condition (column = value)
    pub fn where_eq(self, column: impl Into<String>, value: Value) -> Self {
        self.and_where(Condition::eq(column.into(), value))
    }

    /// Limit the statement to the first `n` matching rows (DB2 syntax).
    pub fn fetch_first(mut self, n: usize) -> Self {
        self.fetch_first = Some(n);
        self
    }

    /// Build the SQL query string
    pub fn build(&self) -> Result<String> {
        if self.set_values.is_empty() {
            return Err(QueryError::Query("UPDATE must have at least one SET value".to_string()));
        }

        let mut sql = format!("UPDATE {} SET ", self.table);

        let set_clauses: Vec<String> = self
            .set_values
            .iter()
            .map(|(col, val)| format!("{} = {}", col, format_value(val)))
            .collect();

        sql.push_str(&set_clauses.join(", "));

        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.to_sql());
        }

        match self.fetch_first {
            Some(1) => sql.push_str(" FETCH FIRST 1 ROW ONLY"),
            Some(n) => sql.push_str(&format!(" FETCH FIRST {} ROWS ONLY", n)),
            None => {}
        }

        Ok(sql)
    }

    /// Build and return the SQL query string (convenience method)
    pub fn to_sql(&self) -> Result<String> {
        self.build()
    }
}

/// INSERT query builder, single row or batch
#[derive(Debug, Clone)]
pub struct InsertBuilder {
    table: String,
    rows: Vec<Vec<(String, Value)>>,
}

impl InsertBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            rows: Vec::new(),
        }
    }

    /// Add one row of column/value pairs
    pub fn row(mut self, values: Vec<(impl Into<String>, Value)>) -> Self {
        self.rows
            .push(values.into_iter().map(|(c, v)| (c.into(), v)).collect());
        self
    }

    /// Build the SQL query string.
    ///
    /// The column list comes from the first row; later rows are aligned to it
    /// and missing columns become NULL.
    pub fn build(&self) -> Result<String> {
        let first = self
            .rows
            .first()
            .ok_or_else(|| QueryError::Query("INSERT must have at least one row".to_string()))?;

        if first.is_empty() {
            return Err(QueryError::Query("INSERT must have at least one column".to_string()));
        }

        let columns: Vec<&str> = first.iter().map(|(c, _)| c.as_str()).collect();

        let values = self
            .rows
            .iter()
            .map(|row| {
                let cells = columns
                    .iter()
                    .map(|col| {
                        row.iter()
                            .find(|(c, _)| c == col)
                            .map(|(_, v)| format_value(v))
                            .unwrap_or_else(|| "NULL".to_string())
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({})", cells)
            })
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table,
            columns.join(", "),
            values
        ))
    }

    pub fn to_sql(&self) -> Result<String> {
        self.build()
    }
}

/// DELETE query builder
#[derive(Debug, Clone)]
pub struct DeleteBuilder {
    table: String,
    where_clause: Option<Condition>,
}

impl DeleteBuilder {
    /// Create a new DELETE query builder
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            where_clause: None,
        }
    }

    /// Set WHERE condition, replacing any previous one
    pub fn where_clause(mut self, condition: Option<Condition>) -> Self {
        self.where_clause = condition;
        self
    }

    /// Build the SQL query string
    pub fn build(&self) -> Result<String> {
        let mut sql = format!("DELETE FROM {}", self.table);

        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.to_sql());
        }

        Ok(sql)
    }

    /// Build and return the SQL query string (convenience method)
    pub fn to_sql(&self) -> Result<String> {
        self.build()
    }
}

/// Append `condition` to `existing`, extending a chain of the same operator
/// rather than nesting a new group.
fn chain(existing: Option<Condition>, condition: Condition, op: LogicalOp) -> Condition {
    match existing {
        Some(Condition::Compound {
            mut conditions,
            op: existing_op,
        }) if existing_op == op && !conditions.is_empty() => {
            conditions.push(condition);
            Condition::Compound { conditions, op }
        }
        Some(existing) => Condition::Compound {
            conditions: vec![existing, condition],
            op,
        },
        None => condition,
    }
}

/// Format a JSON value for SQL
pub(crate) fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Array(_) | Value::Object(_) => {
            format!("'{}'", serde_json::to_string(value).unwrap_or_default().replace('\'', "''"))
        }
    }
}
