//! Catalog keys used to price a sale: the creator's tier and the
//! template's category.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum_macros::{Display, EnumIter, EnumString};

/// Creator tier, which selects the base commission rate
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, EnumIter,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum CreatorTier {
    Basic,
    Verified,
    Elite,
    Pro,
}

/// Template category, which selects the rate multiplier.
///
/// Unknown categories are preserved as `Other` and priced with the
/// neutral multiplier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    Healthcare,
    Financial,
    General,
    Premium,
    Other(String),
}

impl Category {
    pub fn as_str(&self) -> &str {
        match self {
            Category::Healthcare => "healthcare",
            Category::Financial => "financial",
            Category::General => "general",
            Category::Premium => "premium",
            Category::Other(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        Ok(match s.as_str() {
            "healthcare" => Category::Healthcare,
            "financial" => Category::Financial,
            "general" => Category::General,
            "premium" => Category::Premium,
            _ => Category::Other(s),
        })
    }
}

impl From<String> for Category {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(category) => category,
            Err(never) => match never {},
        }
    }
}

impl From<Category> for String {
    fn from(c: Category) -> Self {
        c.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_tier_parse_and_display() {
        assert_eq!("pro".parse::<CreatorTier>().unwrap(), CreatorTier::Pro);
        assert_eq!("Elite".parse::<CreatorTier>().unwrap(), CreatorTier::Elite);
        assert_eq!(CreatorTier::Verified.to_string(), "verified");
        assert!("platinum".parse::<CreatorTier>().is_err());
        assert_eq!(CreatorTier::iter().count(), 4);
    }

    #[test]
    fn test_unknown_category_is_preserved() {
        let c: Category = "Education".parse().unwrap();
        assert_eq!(c, Category::Other("education".to_string()));
        assert_eq!(c.to_string(), "education");
    }

    #[test]
    fn test_category_serde() {
        let json = serde_json::to_string(&Category::Premium).unwrap();
        assert_eq!(json, "\"premium\"");
        let parsed: Category = serde_json::from_str("\"HEALTHCARE\"").unwrap();
        assert_eq!(parsed, Category::Healthcare);
    }
}
