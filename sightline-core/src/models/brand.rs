use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SightlineError;

/// The matching vocabulary shared by brands and competitors.
pub trait Entity {
    fn name(&self) -> &str;
    fn aliases(&self) -> &[String];
    fn domains(&self) -> &[String];

    /// Canonical name followed by aliases, trimmed, empties removed.
    fn names(&self) -> Vec<&str> {
        std::iter::once(self.name())
            .chain(self.aliases().iter().map(String::as_str))
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .collect()
    }

    fn owns_domain(&self, domain: &str) -> bool {
        self.domains().iter().any(|d| d.trim().eq_ignore_ascii_case(domain))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Brand {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub aliases: Vec<String>,
    pub domains: Vec<String>,
}

impl Entity for Brand {
    fn name(&self) -> &str {
        &self.name
    }

    fn aliases(&self) -> &[String] {
        &self.aliases
    }

    fn domains(&self) -> &[String] {
        &self.domains
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Competitor {
    pub id: Uuid,
    pub brand_id: Uuid,
    pub name: String,
    pub aliases: Vec<String>,
    pub domains: Vec<String>,
}

impl Entity for Competitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn aliases(&self) -> &[String] {
        &self.aliases
    }

    fn domains(&self) -> &[String] {
        &self.domains
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBrand {
    pub org_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub domains: Vec<String>,
}

impl NewBrand {
    pub fn into_brand(self) -> Result<Brand, SightlineError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(SightlineError::Invalid("brand name must not be empty".into()));
        }
        Ok(Brand {
            id: Uuid::new_v4(),
            org_id: self.org_id,
            name,
            aliases: clean(self.aliases),
            domains: clean_domains(self.domains),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCompetitor {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub domains: Vec<String>,
}

impl NewCompetitor {
    pub fn into_competitor(self, brand_id: Uuid) -> Result<Competitor, SightlineError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(SightlineError::Invalid("competitor name must not be empty".into()));
        }
        Ok(Competitor {
            id: Uuid::new_v4(),
            brand_id,
            name,
            aliases: clean(self.aliases),
            domains: clean_domains(self.domains),
        })
    }
}

fn clean(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

fn clean_domains(values: Vec<String>) -> Vec<String> {
    clean(values)
        .into_iter()
        .map(|d| {
            let d = d.to_ascii_lowercase();
            d.strip_prefix("www.").map(str::to_string).unwrap_or(d)
        })
        .collect()
}

/// Ad-hoc entity for matching text without a persisted brand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntitySpec {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub domains: Vec<String>,
}

impl EntitySpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_domains(mut self, domains: &[&str]) -> Self {
        self.domains = domains.iter().map(|d| d.to_string()).collect();
        self
    }
}

impl Entity for EntitySpec {
    fn name(&self) -> &str {
        &self.name
    }

    fn aliases(&self) -> &[String] {
        &self.aliases
    }

    fn domains(&self) -> &[String] {
        &self.domains
    }
}
