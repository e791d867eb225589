use crate::domain::model::{InputSource, PowerStatus, ProjectorInfo};
use crate::domain::ports::Storage;
use crate::utils::error::{PjlinkError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PRESETS_FILE: &str = "presets.json";
pub const GROUP_PRESETS_FILE: &str = "group_presets.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectorPreset {
    #[serde(rename = "PresetName")]
    pub preset_name: String,
    #[serde(rename = "ProjectorInfo")]
    pub projector_info: ProjectorInfo,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PresetFile {
    #[serde(rename = "Presets", default)]
    presets: Vec<ProjectorPreset>,
}

/// Saved layout of a group: its projectors plus the power and input to restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupPreset {
    #[serde(rename = "PresetName")]
    pub preset_name: String,
    #[serde(rename = "Description", default)]
    pub description: String,
    #[serde(rename = "GroupName")]
    pub group_name: String,
    #[serde(rename = "CreationTime")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "LastModifiedTime")]
    pub modified_at: DateTime<Utc>,
    #[serde(rename = "PowerStatus", default)]
    pub power_status: PowerStatus,
    #[serde(rename = "InputSource", default)]
    pub input_source: InputSource,
    #[serde(rename = "ProjectorSettings", default)]
    pub projector_settings: BTreeMap<String, ProjectorInfo>,
}

impl GroupPreset {
    pub fn new(preset_name: impl Into<String>, group_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            preset_name: preset_name.into(),
            description: String::new(),
            group_name: group_name.into(),
            created_at: now,
            modified_at: now,
            power_status: PowerStatus::Unknown,
            input_source: InputSource::Unknown,
            projector_settings: BTreeMap::new(),
        }
    }

    pub fn add_projector_setting(&mut self, info: ProjectorInfo) {
        self.projector_settings.insert(info.projector_id(), info);
    }

    pub fn projector_count(&self) -> usize {
        self.projector_settings.len()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GroupPresetFile {
    #[serde(rename = "GroupPresets", default)]
    group_presets: Vec<GroupPreset>,
}

pub struct PresetManager<S: Storage> {
    storage: S,
    presets: BTreeMap<String, ProjectorInfo>,
    group_presets: BTreeMap<String, GroupPreset>,
}

impl<S: Storage> PresetManager<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            presets: BTreeMap::new(),
            group_presets: BTreeMap::new(),
        }
    }

    /// Reads both preset files; missing files leave the collections empty.
    pub async fn load(&mut self) -> Result<usize> {
        if self.storage.exists(PRESETS_FILE).await {
            let data = self.storage.read_file(PRESETS_FILE).await?;
            let file: PresetFile = serde_json::from_slice(&data)?;
            self.presets = file
                .presets
                .into_iter()
                .map(|p| (p.preset_name, p.projector_info))
                .collect();
        }

        if self.storage.exists(GROUP_PRESETS_FILE).await {
            let data = self.storage.read_file(GROUP_PRESETS_FILE).await?;
            let file: GroupPresetFile = serde_json::from_slice(&data)?;
            self.group_presets = file
                .group_presets
                .into_iter()
                .map(|p| (p.preset_name.clone(), p))
                .collect();
        }

        tracing::info!(
            "Loaded {} presets and {} group presets",
            self.presets.len(),
            self.group_presets.len()
        );
        Ok(self.presets.len())
    }

    pub async fn save(&self) -> Result<()> {
        let file = PresetFile {
            presets: self.all_presets(),
        };
        let data = serde_json::to_vec_pretty(&file)?;
        self.storage.write_file(PRESETS_FILE, &data).await?;

        let group_file = GroupPresetFile {
            group_presets: self.all_group_presets(),
        };
        let data = serde_json::to_vec_pretty(&group_file)?;
        self.storage.write_file(GROUP_PRESETS_FILE, &data).await?;

        tracing::debug!("Saved {} presets", self.presets.len());
        Ok(())
    }

    pub fn save_preset(&mut self, preset_name: &str, info: ProjectorInfo) -> Result<()> {
        if preset_name.trim().is_empty() {
            return Err(PjlinkError::PresetError {
                message: "preset name cannot be empty".to_string(),
            });
        }
        tracing::info!("Saved preset '{}' for {}", preset_name, info.projector_id());
        self.presets.insert(preset_name.to_string(), info);
        Ok(())
    }

    pub fn load_preset(&self, preset_name: &str) -> Option<ProjectorInfo> {
        self.presets.get(preset_name).cloned()
    }

    pub fn delete_preset(&mut self, preset_name: &str) -> bool {
        self.presets.remove(preset_name).is_some()
    }

    pub fn all_presets(&self) -> Vec<ProjectorPreset> {
        self.presets
            .iter()
            .map(|(name, info)| ProjectorPreset {
                preset_name: name.clone(),
                projector_info: info.clone(),
            })
            .collect()
    }

    pub fn preset_names(&self) -> Vec<String> {
        self.presets.keys().cloned().collect()
    }

    pub fn has_preset(&self, preset_name: &str) -> bool {
        self.presets.contains_key(preset_name)
    }

    /// Stores a group preset. An existing preset keeps its creation time.
    pub fn save_group_preset(&mut self, mut preset: GroupPreset) -> Result<()> {
        if preset.preset_name.trim().is_empty() {
            return Err(PjlinkError::PresetError {
                message: "group preset name cannot be empty".to_string(),
            });
        }

        preset.modified_at = Utc::now();
        if let Some(existing) = self.group_presets.get(&preset.preset_name) {
            preset.created_at = existing.created_at;
        }

        tracing::info!(
            "Saved group preset '{}' (group: {}, projectors: {})",
            preset.preset_name,
            preset.group_name,
            preset.projector_count()
        );
        self.group_presets.insert(preset.preset_name.clone(), preset);
        Ok(())
    }

    pub fn group_preset(&self, preset_name: &str) -> Option<&GroupPreset> {
        self.group_presets.get(preset_name)
    }

    pub fn delete_group_preset(&mut self, preset_name: &str) -> bool {
        self.group_presets.remove(preset_name).is_some()
    }

    pub fn rename_group_preset(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        if new_name.trim().is_empty() {
            return Err(PjlinkError::PresetError {
                message: "new preset name cannot be empty".to_string(),
            });
        }
        if self.group_presets.contains_key(new_name) {
            return Err(PjlinkError::PresetError {
                message: format!("preset '{}' already exists", new_name),
            });
        }
        let mut preset = self
            .group_presets
            .remove(old_name)
            .ok_or_else(|| PjlinkError::PresetError {
                message: format!("preset '{}' not found", old_name),
            })?;

        preset.preset_name = new_name.to_string();
        preset.modified_at = Utc::now();
        self.group_presets.insert(new_name.to_string(), preset);
        Ok(())
    }

    pub fn set_group_preset_description(&mut self, preset_name: &str, description: &str) -> bool {
        match self.group_presets.get_mut(preset_name) {
            Some(preset) => {
                preset.description = description.to_string();
                preset.modified_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn all_group_presets(&self) -> Vec<GroupPreset> {
        self.group_presets.values().cloned().collect()
    }

    pub fn group_presets_for(&self, group_name: &str) -> Vec<GroupPreset> {
        self.group_presets
            .values()
            .filter(|p| p.group_name == group_name)
            .cloned()
            .collect()
    }

    pub fn group_preset_names(&self) -> Vec<String> {
        self.group_presets.keys().cloned().collect()
    }

    pub fn has_group_preset(&self, preset_name: &str) -> bool {
        self.group_presets.contains_key(preset_name)
    }
}
