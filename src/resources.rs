use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Catalog of client-side mods advertised to the backend.
pub trait ResourceCatalog: Send + Sync {
    fn mods_loaded(&self) -> usize;
    fn total_size(&self) -> u64;
    /// Semicolon-joined mod file names, trailing separator included.
    fn trimmed_list(&self) -> String;
}

/// Catalog built by scanning the `Client` subdirectory of the configured
/// resources directory once at startup.
pub struct DirectoryCatalog {
    mods: Vec<(String, u64)>,
}

impl DirectoryCatalog {
    pub fn scan(resources_dir: &Path) -> Self {
        let client_dir: PathBuf = resources_dir.join("Client");
        let mut mods = Vec::new();

        match std::fs::read_dir(&client_dir) {
            Ok(entries) => {
                for entry in entries.filter_map(|e| e.ok()) {
                    let path = entry.path();
                    if !path.is_file() {
                        continue;
                    }
                    if path.extension().and_then(|s| s.to_str()) != Some("zip") {
                        continue;
                    }
                    let name = match path.file_name().and_then(|s| s.to_str()) {
                        Some(name) => name.to_string(),
                        None => continue,
                    };
                    let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                    mods.push((name, size));
                }
                mods.sort();
                info!("loaded {} client mod(s) from {:?}", mods.len(), client_dir);
            }
            Err(_) => {
                warn!("resources directory {:?} not found, serving no mods", client_dir);
            }
        }

        Self { mods }
    }
}

impl ResourceCatalog for DirectoryCatalog {
    fn mods_loaded(&self) -> usize {
        self.mods.len()
    }

    fn total_size(&self) -> u64 {
        self.mods.iter().map(|(_, size)| size).sum()
    }

    fn trimmed_list(&self) -> String {
        let mut list = String::new();
        for (name, _) in &self.mods {
            list.push('/');
            list.push_str(name);
            list.push(';');
        }
        list
    }
}
