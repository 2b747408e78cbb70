//! Read-only reference data: the city directory and the contact directory.
//!
//! Both are loaded once at startup from JSON files and shared immutably.

use crate::chat::ChatContact;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A city or area that could not be resolved while grouping.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("city {0:?} not found in directory")]
    UnknownCity(String),

    #[error("area {area} of city {city:?} has no display name")]
    UnknownArea { city: String, area: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityEntry {
    pub area: u32,
    pub countdown: u32,
}

#[derive(Debug, Default, Deserialize)]
struct ResidenceFile {
    #[serde(default)]
    areas: HashMap<u32, String>,
    #[serde(default)]
    cities: HashMap<String, CityEntry>,
    #[serde(default)]
    countdown: HashMap<u32, String>,
    #[serde(default, rename = "alarmFor")]
    alarm_for: Option<Vec<String>>,
}

/// Area and shelter-time lookup for city names.
#[derive(Debug, Clone, Default)]
pub struct CityDirectory {
    areas: HashMap<u32, String>,
    cities: HashMap<String, CityEntry>,
    countdown: HashMap<u32, String>,
    allowed_areas: Option<HashSet<String>>,
}

/// A city resolved to its area display name and countdown index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCity<'a> {
    pub area: &'a str,
    pub countdown: u32,
}

impl CityDirectory {
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        let raw: ResidenceFile = serde_json::from_str(content)?;
        Ok(Self {
            areas: raw.areas,
            cities: raw.cities,
            countdown: raw.countdown,
            allowed_areas: raw.alarm_for.map(|v| v.into_iter().collect()),
        })
    }

    pub fn load(path: &Path) -> Result<Self, ReferenceError> {
        let content = std::fs::read_to_string(path).map_err(|source| ReferenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let directory = Self::from_json(&content).map_err(|source| ReferenceError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            "Reference: loaded {} cities in {} areas, {} countdown labels from {:?}",
            directory.cities.len(),
            directory.areas.len(),
            directory.countdown.len(),
            path
        );
        Ok(directory)
    }

    pub fn resolve(&self, city: &str) -> Result<ResolvedCity<'_>, LookupError> {
        let entry = self
            .cities
            .get(city)
            .ok_or_else(|| LookupError::UnknownCity(city.to_string()))?;
        let area = self.areas.get(&entry.area).ok_or_else(|| LookupError::UnknownArea {
            city: city.to_string(),
            area: entry.area,
        })?;
        Ok(ResolvedCity {
            area,
            countdown: entry.countdown,
        })
    }

    /// Countdown index of a city, without requiring its area to resolve.
    pub fn countdown_of(&self, city: &str) -> Option<u32> {
        self.cities.get(city).map(|c| c.countdown)
    }

    /// Label for a countdown index; empty when the index has no label.
    pub fn countdown_label(&self, index: u32) -> &str {
        self.countdown.get(&index).map(String::as_str).unwrap_or("")
    }

    /// True when no allow-list is configured or the area is on it.
    pub fn is_area_allowed(&self, area: &str) -> bool {
        self.allowed_areas
            .as_ref()
            .map_or(true, |allowed| allowed.contains(area))
    }
}

/// Sticker appearance for a contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualTheme {
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_theme_emoji")]
    pub emoji: String,
}

fn default_theme_emoji() -> String {
    "home".to_string()
}

/// One entry of contacts.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactSubscription {
    #[serde(rename = "phoneNumber")]
    pub phone_number: String,
    #[serde(default)]
    pub cities: Vec<String>,
    #[serde(default, rename = "emojiConf", skip_serializing_if = "Option::is_none")]
    pub visual_theme: Option<VisualTheme>,
    #[serde(default)]
    pub default: bool,
}

impl ContactSubscription {
    pub fn subscribes_to(&self, city: &str) -> bool {
        self.cities.iter().any(|c| c == city)
    }
}

/// Named subscriptions, iterated in name order.
pub type ContactDirectory = BTreeMap<String, ContactSubscription>;

pub fn contacts_from_json(content: &str) -> Result<ContactDirectory, serde_json::Error> {
    serde_json::from_str(content)
}

pub fn load_contacts(path: &Path) -> Result<ContactDirectory, ReferenceError> {
    let content = std::fs::read_to_string(path).map_err(|source| ReferenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let contacts = contacts_from_json(&content).map_err(|source| ReferenceError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    info!("Reference: loaded {} contacts from {:?}", contacts.len(), path);
    Ok(contacts)
}

/// A subscription paired with the chat-platform contact it maps to, if any.
#[derive(Debug, Clone)]
pub struct ContactEntry {
    pub name: String,
    pub subscription: ContactSubscription,
    pub chat: Option<ChatContact>,
}

/// Contact directory resolved against the chat platform's contact list.
#[derive(Debug, Clone, Default)]
pub struct ContactBook {
    entries: Vec<ContactEntry>,
}

impl ContactBook {
    /// Match every subscription to a platform contact by number or display name.
    pub fn resolve(directory: &ContactDirectory, platform: &[ChatContact]) -> Self {
        let entries = directory
            .iter()
            .map(|(name, subscription)| {
                let chat = platform
                    .iter()
                    .find(|c| {
                        c.number == subscription.phone_number
                            || c.display_name == subscription.phone_number
                    })
                    .cloned();
                if chat.is_none() {
                    warn!(
                        "Reference: contact {} ({}) not found on chat platform, will not be mentioned",
                        name, subscription.phone_number
                    );
                }
                ContactEntry {
                    name: name.clone(),
                    subscription: subscription.clone(),
                    chat,
                }
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[ContactEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
