//! Renders area groups into notification text.

use crate::alerts::AreaGroup;
use crate::chat::ChatContact;
use crate::reference::CityDirectory;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ComposeError {
    #[error("no resolvable areas among {0} unsent alerts")]
    NoAreas(usize),
}

/// Text plus the contacts it mentions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub text: String,
    pub mentions: Vec<ChatContact>,
}

pub struct NotificationComposer {
    directory: Arc<CityDirectory>,
}

impl NotificationComposer {
    pub fn new(directory: Arc<CityDirectory>) -> Self {
        Self { directory }
    }

    /// One block per area, in discovery order, separated by a blank line.
    pub fn compose(&self, groups: &[AreaGroup], alert_count: usize) -> Result<Notification, ComposeError> {
        if groups.is_empty() {
            return Err(ComposeError::NoAreas(alert_count));
        }

        let mut text = String::new();
        let mut mentions: Vec<ChatContact> = Vec::new();

        for group in groups {
            let label = self.directory.countdown_label(group.min_countdown);
            if label.is_empty() {
                text.push_str(&format!("Alerts in {}\n", group.area));
            } else {
                text.push_str(&format!("Alerts in {} *(Run time: {})*\n", group.area, label));
            }
            text.push_str(&format!("Cities: {}\n", group.cities.join(", ")));
            for contact in &group.mentions {
                if label.is_empty() {
                    text.push_str(&format!("{} - get to a protected space now!!!\n", contact.mention));
                } else {
                    text.push_str(&format!(
                        "{} - you have {} to reach a protected space!!!\n",
                        contact.mention, label
                    ));
                }
                if !mentions.contains(contact) {
                    mentions.push(contact.clone());
                }
            }
            text.push('\n');
        }

        Ok(Notification {
            text: text.trim().to_string(),
            mentions,
        })
    }
}
