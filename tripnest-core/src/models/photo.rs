use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Adventure,
    Romance,
    Relaxation,
    Cultural,
    Family,
    Luxury,
    General,
}

impl Category {
    pub const PROMPT_CHOICES: [Category; 6] = [
        Category::Adventure,
        Category::Romance,
        Category::Relaxation,
        Category::Cultural,
        Category::Family,
        Category::Luxury,
    ];

    /// Lenient parse of a model-generated label; anything unrecognised is `General`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "adventure" => Category::Adventure,
            "romance" => Category::Romance,
            "relaxation" => Category::Relaxation,
            "cultural" => Category::Cultural,
            "family" => Category::Family,
            "luxury" => Category::Luxury,
            _ => Category::General,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Adventure => "Adventure",
            Category::Romance => "Romance",
            Category::Relaxation => "Relaxation",
            Category::Cultural => "Cultural",
            Category::Family => "Family",
            Category::Luxury => "Luxury",
            Category::General => "General",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A photo shown on the discover page. Lives only in session memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryPhoto {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub alt_description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<Category>,
}

impl DiscoveryPhoto {
    /// Place name used in prompts and wishlist titles.
    pub fn subject(&self) -> &str {
        self.location
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(self.alt_description.as_deref())
            .unwrap_or("")
    }

    pub fn enrichment_prompt(&self) -> String {
        let choices: Vec<&str> = Category::PROMPT_CHOICES.iter().map(|c| c.as_str()).collect();
        format!(
            "For the travel location \"{}\", generate a short, engaging description (around 15 words) \
             and a single category from this list: {}. Ensure the description mentions the location \
             if it's not in the title.",
            self.subject(),
            choices.join(", ")
        )
    }

    pub fn enriched(mut self, description: String, category: Category) -> Self {
        self.description = Some(description);
        self.category = Some(category);
        self
    }

    /// Deterministic stand-in used when enrichment fails.
    pub fn with_fallback(mut self, category: Category) -> Self {
        self.description = self.alt_description.clone();
        self.category = Some(category);
        self
    }
}
