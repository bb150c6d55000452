use serde::{Deserialize, Serialize};

/// One row of the taxonomy table: a canonical group and the raw labels that
/// count as synonyms for it, comma separated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub group: String,
    pub synonyms: String,
}

impl CategoryRule {
    pub fn new(group: impl Into<String>, synonyms: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            synonyms: synonyms.into(),
        }
    }
}

pub const DEFAULT_FALLBACK_GROUP: &str = "Прочее";

/// Built-in taxonomy for the Russian news feeds the harvester was set up for.
pub fn default_rules() -> Vec<CategoryRule> {
    vec![
        CategoryRule::new("Спорт", "Спорт"),
        CategoryRule::new(
            "Россия и СНГ",
            "Россия, Бывший СССР, Моя страна, Новости партнеров, Москва",
        ),
        CategoryRule::new(
            "Экономика и бизнес",
            "Экономика и бизнес, Бизнес, Экономика, Финансы, Недвижимость, Авто",
        ),
        CategoryRule::new("Происшествия", "Происшествия"),
        CategoryRule::new("Медиа", "Медиа, Культура, Интернет и СМИ"),
        CategoryRule::new("Наука и техника", "Наука и техника, Космос, Технологии"),
        CategoryRule::new(
            "Общество",
            "Общество, Забота о себе, Среда обитания, Из жизни, Ценности",
        ),
        CategoryRule::new("Мир", "Мир, Международная панорама, Путешествия"),
        CategoryRule::new("Политика", "Политика, Силовые структуры"),
        CategoryRule::new(DEFAULT_FALLBACK_GROUP, DEFAULT_FALLBACK_GROUP),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub group: String,
    /// False when no rule matched and the fallback group was assigned.
    pub matched: bool,
}

/// Maps raw feed labels onto the canonical groups.
///
/// Rules are tested in table order with substring containment against each
/// synonym list; the first hit wins, so the table is a priority list.
#[derive(Debug, Clone)]
pub struct CategoryClassifier {
    rules: Vec<CategoryRule>,
    fallback: String,
}

impl CategoryClassifier {
    pub fn new(rules: Vec<CategoryRule>, fallback: impl Into<String>) -> Self {
        Self {
            rules,
            fallback: fallback.into(),
        }
    }

    pub fn fallback_group(&self) -> &str {
        &self.fallback
    }

    /// Every group name this classifier can emit, table order, fallback last
    /// unless the table already lists it.
    pub fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::with_capacity(self.rules.len() + 1);
        for rule in &self.rules {
            if !names.contains(&rule.group) {
                names.push(rule.group.clone());
            }
        }
        if !names.contains(&self.fallback) {
            names.push(self.fallback.clone());
        }
        names
    }

    pub fn classify(&self, label: &str) -> Classification {
        let label = label.trim();
        if !label.is_empty() {
            if let Some(rule) = self.rules.iter().find(|r| r.synonyms.contains(label)) {
                return Classification {
                    group: rule.group.clone(),
                    matched: true,
                };
            }
        }
        Classification {
            group: self.fallback.clone(),
            matched: false,
        }
    }
}

impl Default for CategoryClassifier {
    fn default() -> Self {
        Self::new(default_rules(), DEFAULT_FALLBACK_GROUP)
    }
}
