use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Generic row query: equality filters, an optional OR of AND-groups,
/// one ordering column and a limit.
#[derive(Debug, Clone, PartialEq)]
pub struct RowQuery {
    pub table: String,
    pub columns: String,
    pub filters: Vec<(String, String)>,
    pub any_of: Vec<Vec<(String, String)>>,
    pub order: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl RowQuery {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: "*".to_string(),
            filters: Vec::new(),
            any_of: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.columns = columns.into();
        self
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    /// Adds one AND-group to the OR clause.
    pub fn or_all(mut self, group: Vec<(&str, &str)>) -> Self {
        self.any_of.push(
            group
                .into_iter()
                .map(|(c, v)| (c.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    pub fn order(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order = Some((column.into(), direction));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Query-string pairs in PostgREST syntax.
    pub fn to_postgrest_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.columns.clone())];
        for (column, value) in &self.filters {
            params.push((column.clone(), format!("eq.{value}")));
        }
        if !self.any_of.is_empty() {
            let groups: Vec<String> = self
                .any_of
                .iter()
                .map(|group| {
                    let conds: Vec<String> = group
                        .iter()
                        .map(|(c, v)| format!("{c}.eq.{}", quote_value(v)))
                        .collect();
                    format!("and({})", conds.join(","))
                })
                .collect();
            params.push(("or".to_string(), format!("({})", groups.join(","))));
        }
        if let Some((column, direction)) = &self.order {
            let dir = match direction {
                Direction::Ascending => "asc",
                Direction::Descending => "desc",
            };
            params.push(("order".to_string(), format!("{column}.{dir}")));
        }
        if let Some(n) = self.limit {
            params.push(("limit".to_string(), n.to_string()));
        }
        params
    }

    /// Whether a JSON row satisfies the filters (ordering and limit aside).
    pub fn matches(&self, row: &Value) -> bool {
        let all = self
            .filters
            .iter()
            .all(|(c, v)| column_equals(row, c, v));
        let any = self.any_of.is_empty()
            || self
                .any_of
                .iter()
                .any(|group| group.iter().all(|(c, v)| column_equals(row, c, v)));
        all && any
    }

    /// Filter, order and truncate a set of rows in memory.
    pub fn apply(&self, rows: &[Value]) -> Vec<Value> {
        let mut out: Vec<Value> = rows.iter().filter(|r| self.matches(r)).cloned().collect();
        if let Some((column, direction)) = &self.order {
            out.sort_by(|a, b| {
                let ord = compare_values(a.get(column), b.get(column));
                match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }
        if let Some(n) = self.limit {
            out.truncate(n);
        }
        out
    }
}

fn quote_value(v: &str) -> String {
    if v.contains([',', '(', ')', '.', ':', '"', '\\']) {
        // backslash first so the quote escapes survive
        format!("\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        v.to_string()
    }
}

fn column_equals(row: &Value, column: &str, expected: &str) -> bool {
    match row.get(column) {
        Some(Value::String(s)) => s == expected,
        Some(Value::Null) | None => false,
        Some(other) => other.to_string() == expected,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}
