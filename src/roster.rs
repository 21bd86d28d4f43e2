use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

const FOREMAN_TITLE_PREFIX: &str = "foreman";

#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("failed to read roster {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse roster {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid roster {path}: {message}")]
    Invalid { path: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Employee {
    pub name: String,
    pub region: String,
    #[serde(default)]
    pub title: String,
}

impl Employee {
    pub fn is_foreman(&self) -> bool {
        self.title
            .trim()
            .get(..FOREMAN_TITLE_PREFIX.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(FOREMAN_TITLE_PREFIX))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct RosterFile {
    #[serde(default)]
    employees: Vec<Employee>,
}

#[derive(Debug, Clone, Default)]
pub struct Roster {
    employees: Vec<Employee>,
}

impl Roster {
    pub fn load(path: &Path) -> Result<Self, RosterError> {
        let raw = fs::read_to_string(path).map_err(|source| RosterError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let file: RosterFile =
            serde_yaml::from_str(&raw).map_err(|source| RosterError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_employees(file.employees).map_err(|message| RosterError::Invalid {
            path: path.display().to_string(),
            message,
        })
    }

    pub fn from_employees(employees: Vec<Employee>) -> Result<Self, String> {
        let mut seen = BTreeSet::new();
        for employee in &employees {
            if employee.name.trim().is_empty() {
                return Err("employee name must be non-empty".to_string());
            }
            if employee.region.trim().is_empty() {
                return Err(format!(
                    "employee `{}` has an empty region",
                    employee.name.trim()
                ));
            }
            let key = (
                employee.region.trim().to_string(),
                employee.name.trim().to_string(),
            );
            if !seen.insert(key) {
                return Err(format!(
                    "employee `{}` is listed twice for region `{}`",
                    employee.name.trim(),
                    employee.region.trim()
                ));
            }
        }
        Ok(Self { employees })
    }

    // Candidate lists keep the roster's listing order; selection buttons
    // refer to positions in these lists.
    pub fn foremen_in(&self, region: &str) -> Vec<Employee> {
        self.in_region(region)
            .filter(|employee| employee.is_foreman())
            .cloned()
            .collect()
    }

    pub fn crew_in(&self, region: &str) -> Vec<Employee> {
        self.in_region(region)
            .filter(|employee| !employee.is_foreman())
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.employees.is_empty()
    }

    fn in_region<'a>(&'a self, region: &'a str) -> impl Iterator<Item = &'a Employee> {
        let wanted = region.trim();
        self.employees
            .iter()
            .filter(move |employee| employee.region.trim() == wanted)
    }
}
