use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Parameters of one call to the portal search endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub keyword: String,
    /// Zero based.
    pub page: u32,
    pub size: u32,
    pub filters: SearchFilters,
}

/// Optional filters. Unset values are sent as empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchFilters {
    pub conclusion_year: Option<String>,
    pub depend_unit: Option<String>,
    pub keywords: Option<String>,
    pub project_type: Option<String>,
    pub project_type_name: Option<String>,
    pub code: Option<String>,
    pub ratify_year: Option<String>,
    pub order: Option<String>,
    pub ordering: Option<String>,
}

impl SearchQuery {
    pub fn new(keyword: impl Into<String>, page: u32, size: u32) -> Self {
        Self { keyword: keyword.into(), page, size, filters: SearchFilters::default() }
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn at_page(&self, page: u32) -> Self {
        Self { page, ..self.clone() }
    }

    /// The request body the portal's web client sends.
    pub fn to_payload(&self) -> Value {
        let f = &self.filters;
        let or_empty = |v: &Option<String>| v.clone().unwrap_or_default();
        json!({
            "complete": true,
            "fuzzyKeyword": self.keyword,
            "isFuzzySearch": true,
            "conclusionYear": or_empty(&f.conclusion_year),
            "dependUnit": or_empty(&f.depend_unit),
            "keywords": or_empty(&f.keywords),
            "pageNum": self.page,
            "pageSize": self.size,
            "projectType": or_empty(&f.project_type),
            "projectTypeName": or_empty(&f.project_type_name),
            "code": or_empty(&f.code),
            "ratifyYear": or_empty(&f.ratify_year),
            "order": f.order.clone().unwrap_or_else(|| "enddate".to_string()),
            "ordering": f.ordering.clone().unwrap_or_else(|| "desc".to_string()),
            "codeScreening": "",
            "dependUnitScreening": "",
            "keywordsScreening": "",
            "projectTypeNameScreening": "",
        })
    }
}

/// Rows of one search page plus the total the server reports.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchPage {
    pub rows: Vec<Value>,
    pub total: Option<u64>,
}

impl SearchPage {
    /// Reads `data.resultsData` and `data.itotalRecords`; anything missing means an empty page.
    pub fn from_response(res: &Value) -> Self {
        let data = &res["data"];
        let rows = data["resultsData"].as_array().cloned().unwrap_or_default();
        let total = match &data["itotalRecords"] {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        Self { rows, total }
    }
}

/// One line of the search results file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRow {
    pub project_id: Option<String>,
    pub raw: Value,
}

impl ProjectRow {
    pub fn from_raw(raw: Value) -> Self {
        Self { project_id: project_id(&raw), raw }
    }
}

/// The project id is the first element of a result row.
pub fn project_id(row: &Value) -> Option<String> {
    match row.as_array()?.first()? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
