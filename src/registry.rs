use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Student as seen by face matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub username: String,
    #[serde(default)]
    pub fullname: String,
    #[serde(default)]
    pub course: String,
    #[serde(default)]
    pub class_name: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Reference card image the selfies are verified against.
    #[serde(default)]
    pub card: Option<PathBuf>,
}

fn default_active() -> bool {
    true
}

impl Student {
    pub fn new(username: &str, card: Option<PathBuf>) -> Self {
        Self {
            username: username.to_string(),
            fullname: String::new(),
            course: String::new(),
            class_name: String::new(),
            is_active: true,
            card,
        }
    }

    pub fn has_card(&self) -> bool {
        self.card.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Class {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub students: Vec<String>,
}

pub trait StudentDirectory: Send + Sync {
    fn student(&self, username: &str) -> Result<Option<Student>>;

    fn exists(&self, username: &str) -> Result<bool> {
        Ok(self.student(username)?.is_some())
    }

    fn has_reference_card(&self, username: &str) -> Result<bool> {
        Ok(self.student(username)?.is_some_and(|s| s.has_card()))
    }
}

pub trait ClassRoster: Send + Sync {
    fn class_exists(&self, class_id: &str) -> Result<bool>;

    fn students_in_class(&self, class_id: &str) -> Result<HashSet<String>>;
}

/// Students and class rosters read from a TOML file.
///
/// ```toml
/// [[student]]
/// username = "20520001"
/// fullname = "Nguyen Van A"
/// card = "cards/20520001.jpg"
///
/// [[class]]
/// id = "IT001"
/// students = ["20520001"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default, rename = "student")]
    students: Vec<Student>,
    #[serde(default, rename = "class")]
    classes: Vec<Class>,
}

impl Registry {
    pub fn new(students: Vec<Student>, classes: Vec<Class>) -> Self {
        Self { students, classes }
    }

    /// Load the registry; relative card paths resolve against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::warn!("registry {} does not exist, no students known", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading registry {}", path.display()))?;
        let mut registry: Registry =
            toml::from_str(&raw).with_context(|| format!("parsing registry {}", path.display()))?;

        let base = path.parent().unwrap_or(Path::new("."));
        for student in &mut registry.students {
            if let Some(card) = student.card.as_mut() {
                if card.is_relative() {
                    *card = base.join(&*card);
                }
            }
        }
        Ok(registry)
    }

    pub fn students(&self) -> &[Student] {
        &self.students
    }

    pub fn classes(&self) -> &[Class] {
        &self.classes
    }

    fn class(&self, class_id: &str) -> Option<&Class> {
        self.classes.iter().find(|c| c.id == class_id)
    }
}

impl StudentDirectory for Registry {
    fn student(&self, username: &str) -> Result<Option<Student>> {
        Ok(self.students.iter().find(|s| s.username == username).cloned())
    }
}

impl ClassRoster for Registry {
    fn class_exists(&self, class_id: &str) -> Result<bool> {
        Ok(self.class(class_id).is_some())
    }

    fn students_in_class(&self, class_id: &str) -> Result<HashSet<String>> {
        Ok(self
            .class(class_id)
            .map(|c| c.students.iter().cloned().collect())
            .unwrap_or_default())
    }
}
