//! Fixed row schema and alias normalization.
//!
//! Source rows spell the same logical column many ways (`Company_Name`,
//! `companyName`, `Company`). Every [`Row`] handed to a consumer has been
//! rewritten to canonical column names, so filtering, sorting and export only
//! ever deal with [`Column`] names.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Persisted field holding the derived row key.
pub const KEY_FIELD: &str = "_key";

/// The known logical columns, in header order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Column {
    #[serde(rename = "Id")]
    Id,
    #[serde(rename = "Company_Name")]
    CompanyName,
    #[serde(rename = "First_Name")]
    FirstName,
    #[serde(rename = "Last_Name")]
    LastName,
    #[serde(rename = "Title")]
    Title,
    #[serde(rename = "Email")]
    Email,
    #[serde(rename = "Phone")]
    Phone,
    #[serde(rename = "City")]
    City,
    #[serde(rename = "State")]
    State,
    #[serde(rename = "Country")]
    Country,
    #[serde(rename = "Industry")]
    Industry,
    #[serde(rename = "Employees")]
    Employees,
}

impl Column {
    pub const ALL: [Column; 12] = [
        Column::Id,
        Column::CompanyName,
        Column::FirstName,
        Column::LastName,
        Column::Title,
        Column::Email,
        Column::Phone,
        Column::City,
        Column::State,
        Column::Country,
        Column::Industry,
        Column::Employees,
    ];

    /// Sort column used whenever the requested one is not on the allow-list.
    pub const DEFAULT_SORT: Column = Column::CompanyName;

    pub fn name(self) -> &'static str {
        match self {
            Column::Id => "Id",
            Column::CompanyName => "Company_Name",
            Column::FirstName => "First_Name",
            Column::LastName => "Last_Name",
            Column::Title => "Title",
            Column::Email => "Email",
            Column::Phone => "Phone",
            Column::City => "City",
            Column::State => "State",
            Column::Country => "Country",
            Column::Industry => "Industry",
            Column::Employees => "Employees",
        }
    }

    /// Accepted spellings, compared case-insensitively. The canonical name
    /// always comes first.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Column::Id => &["Id", "_id", "Record_Id", "RecordId"],
            Column::CompanyName => &[
                "Company_Name",
                "CompanyName",
                "Company Name",
                "Company",
                "Organization",
            ],
            Column::FirstName => &["First_Name", "FirstName", "First Name", "Given_Name", "FName"],
            Column::LastName => &[
                "Last_Name",
                "LastName",
                "Last Name",
                "Surname",
                "Family_Name",
                "LName",
            ],
            Column::Title => &["Title", "Job_Title", "JobTitle", "Position"],
            Column::Email => &["Email", "E-mail", "Email_Address", "EmailAddress", "Mail"],
            Column::Phone => &["Phone", "Phone_Number", "PhoneNumber", "Telephone", "Tel"],
            Column::City => &["City", "Town"],
            Column::State => &["State", "Province", "Region"],
            Column::Country => &["Country", "Country_Name", "Nation"],
            Column::Industry => &["Industry", "Sector"],
            Column::Employees => &[
                "Employees",
                "Employee_Count",
                "EmployeeCount",
                "Headcount",
                "Num_Employees",
            ],
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Column::Id | Column::Employees)
    }

    /// Look up a column by its canonical name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Column> {
        let name = name.trim();
        Column::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(name))
    }

    /// Resolve any accepted alias to its column.
    pub fn resolve(key: &str) -> Option<Column> {
        let key = key.trim();
        Column::ALL
            .into_iter()
            .find(|c| c.aliases().iter().any(|a| a.eq_ignore_ascii_case(key)))
    }
}

impl std::fmt::Display for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One normalized dataset record.
///
/// Deserializing a `Row` always runs alias normalization, so rows decoded from
/// the wire or from disk can be used directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Row(Map<String, Value>);

impl Row {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Normalize a raw source mapping: aliases collapse onto canonical names,
    /// nulls are dropped, non-scalar values are stringified and unknown keys
    /// are kept as extra columns.
    pub fn normalize(raw: Map<String, Value>) -> Self {
        let mut consumed: Vec<&str> = Vec::new();
        let mut out = Map::new();

        for column in Column::ALL {
            for alias in column.aliases() {
                let hit = raw
                    .iter()
                    .find(|(k, v)| k.trim().eq_ignore_ascii_case(alias) && !v.is_null());
                if let Some((key, value)) = hit {
                    out.insert(column.name().to_string(), scalar(value));
                    break;
                }
            }
            for key in raw.keys() {
                if Column::resolve(key) == Some(column) {
                    consumed.push(key.as_str());
                }
            }
        }

        for (key, value) in &raw {
            if consumed.contains(&key.as_str()) || key == KEY_FIELD || value.is_null() {
                continue;
            }
            out.insert(key.clone(), scalar(value));
        }

        Row(out)
    }

    /// Builder-style setter for a known column.
    pub fn with(mut self, column: Column, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: Column, value: impl Into<Value>) {
        let value = value.into();
        if value.is_null() {
            self.0.remove(column.name());
        } else {
            self.0.insert(column.name().to_string(), scalar(&value));
        }
    }

    /// Set a column outside the known schema.
    pub fn set_extra(&mut self, key: &str, value: impl Into<Value>) {
        match Column::resolve(key) {
            Some(column) => self.set(column, value),
            None => {
                self.0.insert(key.to_string(), scalar(&value.into()));
            }
        }
    }

    pub fn get(&self, column: Column) -> Option<&Value> {
        self.0.get(column.name())
    }

    pub fn get_field(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Display text of a column, if present.
    pub fn text(&self, column: Column) -> Option<String> {
        self.get(column).map(display_value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Keys outside the known schema.
    pub fn extra_keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys().filter(|k| Column::from_name(k).is_none())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Derive the identity used by the local store.
    ///
    /// Prefers `Id`, then `Email`, then a composite of company, names and the
    /// row's ordinal in the replication stream.
    pub fn row_key(&self, ordinal: u64) -> String {
        if let Some(id) = self.non_blank(Column::Id) {
            return format!("id:{}", id);
        }
        if let Some(email) = self.non_blank(Column::Email) {
            return format!("email:{}", email.to_lowercase());
        }
        format!(
            "row:{}|{}|{}|{}",
            self.non_blank(Column::CompanyName).unwrap_or_default(),
            self.non_blank(Column::FirstName).unwrap_or_default(),
            self.non_blank(Column::LastName).unwrap_or_default(),
            ordinal
        )
    }

    fn non_blank(&self, column: Column) -> Option<String> {
        self.text(column)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

impl From<Map<String, Value>> for Row {
    fn from(raw: Map<String, Value>) -> Self {
        Row::normalize(raw)
    }
}

impl From<Row> for Map<String, Value> {
    fn from(row: Row) -> Self {
        row.0
    }
}

/// Render a scalar the way it is displayed, filtered and exported.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn scalar(value: &Value) -> Value {
    match value {
        Value::String(_) | Value::Number(_) => value.clone(),
        Value::Bool(b) => Value::String(b.to_string()),
        other => Value::String(other.to_string()),
    }
}
