use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt, str::FromStr};

pub const UNKNOWN_CLASS_NAME: &str = "desconhecida";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Species {
    #[serde(rename = "canino")]
    Canine,
    #[serde(rename = "felino")]
    Feline,
}

impl Species {
    pub const ALL: [Species; 2] = [Species::Canine, Species::Feline];

    pub fn as_str(&self) -> &'static str {
        match self {
            Species::Canine => "canino",
            Species::Feline => "felino",
        }
    }

    /// Maps a classifier output index to a species. Index 0 is canine, 1 is feline.
    pub fn from_class_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Species::Canine),
            1 => Some(Species::Feline),
            _ => None,
        }
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Species {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "canino" => Ok(Species::Canine),
            "felino" => Ok(Species::Feline),
            other => Err(format!(
                "{} is not a supported species. Use either `canino` or `felino`.",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeciesLabel {
    Known(Species),
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationResult {
    pub label: SpeciesLabel,
    pub confidence: f32,
}

impl ClassificationResult {
    pub fn species(&self) -> Option<Species> {
        match self.label {
            SpeciesLabel::Known(species) => Some(species),
            SpeciesLabel::Unknown => None,
        }
    }
}

/// One value per supported species. Holding detectors and profiles this way
/// makes a missing entry for a species unrepresentable.
#[derive(Debug, Clone, Deserialize)]
pub struct PerSpecies<T> {
    pub canino: T,
    pub felino: T,
}

impl<T> PerSpecies<T> {
    pub fn get(&self, species: Species) -> &T {
        match species {
            Species::Canine => &self.canino,
            Species::Feline => &self.felino,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Species, &T)> {
        Species::ALL.into_iter().map(move |s| (s, self.get(s)))
    }

    pub fn try_map<U, E>(
        &self,
        mut f: impl FnMut(Species, &T) -> Result<U, E>,
    ) -> Result<PerSpecies<U>, E> {
        Ok(PerSpecies {
            canino: f(Species::Canine, &self.canino)?,
            felino: f(Species::Feline, &self.felino)?,
        })
    }
}

/// Class-name table and liver allow-list for one species' detector.
#[derive(Debug, Clone)]
pub struct SpeciesProfile {
    class_names: Vec<String>,
    liver_classes: HashSet<String>,
}

impl SpeciesProfile {
    pub fn new(class_names: Vec<String>, liver_classes: impl IntoIterator<Item = String>) -> Self {
        Self {
            class_names,
            liver_classes: liver_classes.into_iter().collect(),
        }
    }

    pub fn class_name(&self, class_id: i64) -> &str {
        usize::try_from(class_id)
            .ok()
            .and_then(|id| self.class_names.get(id))
            .map(String::as_str)
            .unwrap_or(UNKNOWN_CLASS_NAME)
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn is_liver_class(&self, class_name: &str) -> bool {
        self.liver_classes.contains(class_name)
    }
}
