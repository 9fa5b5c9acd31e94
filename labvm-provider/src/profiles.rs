//! Install profiles: the image and boot-time setup for each sandbox type.
//!
//! A profile names the base image, the machine size, and the install script
//! shipped to the machine as boot-time configuration data. Built-in profiles
//! cover the standard classroom images; operators can extend or override
//! them from a JSON file.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Reference to a marketplace image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageReference {
    pub publisher: String,
    pub offer: String,
    pub sku: String,
    pub version: String,
}

/// One named install profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmProfile {
    pub machine_size: String,
    pub image: ImageReference,
    pub install_script: String,
}

/// Registry of install profiles, keyed by profile name.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: HashMap<String, VmProfile>,
}

impl ProfileRegistry {
    /// The built-in classroom profiles.
    pub fn builtin() -> Self {
        let windows_image = ImageReference {
            publisher: "MicrosoftWindowsServer".to_string(),
            offer: "WindowsServer".to_string(),
            sku: "2022-Datacenter".to_string(),
            version: "latest".to_string(),
        };

        let mut profiles = HashMap::new();
        profiles.insert(
            "windows-basic".to_string(),
            VmProfile {
                // Minimal cost, enough for lab exercises
                machine_size: "Standard_B1s".to_string(),
                image: windows_image.clone(),
                install_script: include_str!("profiles/windows-basic.ps1").to_string(),
            },
        );
        profiles.insert(
            "windows-dev".to_string(),
            VmProfile {
                machine_size: "Standard_B2s".to_string(),
                image: windows_image,
                install_script: include_str!("profiles/windows-dev.ps1").to_string(),
            },
        );

        Self { profiles }
    }

    /// Load additional profiles from a JSON file, overriding built-ins with
    /// the same name.
    pub fn load_overrides(&mut self, path: &Path) -> Result<()> {
        let raw = std::fs::read_to_string(path)?;
        let overrides: HashMap<String, VmProfile> = serde_json::from_str(&raw)?;
        self.profiles.extend(overrides);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&VmProfile> {
        self.profiles.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
