use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Package manifest (pkg.toml)
#[derive(Debug, Serialize, Deserialize)]
pub struct PackageManifest {
    pub package: PackageInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    #[serde(default = "default_entry")]
    pub entry: String,
}

fn default_entry() -> String {
    "src/main.lumo".to_string()
}

impl PackageManifest {
    /// Create a new package manifest with default values
    pub fn new(name: &str) -> Self {
        Self {
            package: PackageInfo {
                name: name.to_string(),
                version: "0.1.0".to_string(),
                entry: "src/main.lumo".to_string(),
            },
        }
    }

    /// Load manifest from a directory
    pub fn load(dir: &Path) -> Result<Self, String> {
        let manifest_path = dir.join("pkg.toml");
        let content = fs::read_to_string(&manifest_path)
            .map_err(|e| format!("failed to read pkg.toml: {}", e))?;
        toml::from_str(&content).map_err(|e| format!("failed to parse pkg.toml: {}", e))
    }

    /// Save manifest to a directory
    pub fn save(&self, dir: &Path) -> Result<(), String> {
        let manifest_path = dir.join("pkg.toml");
        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("failed to serialize pkg.toml: {}", e))?;
        fs::write(&manifest_path, content).map_err(|e| format!("failed to write pkg.toml: {}", e))
    }
}

/// Initialize a new lumo project
pub fn init_project(dir: &Path, name: Option<&str>) -> Result<(), String> {
    // Determine project name
    let project_name = name
        .map(|s| s.to_string())
        .or_else(|| dir.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| "myproject".to_string());

    // Check if pkg.toml already exists
    let manifest_path = dir.join("pkg.toml");
    if manifest_path.exists() {
        return Err(format!("pkg.toml already exists in {}", dir.display()));
    }

    // Create directory structure
    let src_dir = dir.join("src");
    fs::create_dir_all(&src_dir).map_err(|e| format!("failed to create src directory: {}", e))?;

    // Create pkg.toml
    let manifest = PackageManifest::new(&project_name);
    manifest.save(dir)?;

    // Create src/main.lumo with hello world
    let main_lumo = src_dir.join("main.lumo");
    if !main_lumo.exists() {
        let content = r#"// Welcome to lumo!
info "Hello, world!";
"#;
        fs::write(&main_lumo, content).map_err(|e| format!("failed to write main.lumo: {}", e))?;
    }

    println!(
        "Created new lumo project '{}' in {}",
        project_name,
        dir.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_manifest() {
        let manifest = PackageManifest::new("testproject");
        assert_eq!(manifest.package.name, "testproject");
        assert_eq!(manifest.package.version, "0.1.0");
        assert_eq!(manifest.package.entry, "src/main.lumo");
    }

    #[test]
    fn test_manifest_serialization() {
        let manifest = PackageManifest::new("testproject");
        let toml_str = toml::to_string_pretty(&manifest).unwrap();
        assert!(toml_str.contains("name = \"testproject\""));
        assert!(toml_str.contains("version = \"0.1.0\""));
    }

    #[test]
    fn test_entry_defaults_when_missing() {
        let manifest: PackageManifest = toml::from_str(
            "[package]\nname = \"p\"\nversion = \"0.1.0\"\n",
        )
        .unwrap();
        assert_eq!(manifest.package.entry, "src/main.lumo");
    }

    #[test]
    fn test_init_project() {
        let temp = tempfile::tempdir().unwrap();

        init_project(temp.path(), Some("mytest")).unwrap();

        assert!(temp.path().join("pkg.toml").exists());
        assert!(temp.path().join("src/main.lumo").exists());

        let manifest = PackageManifest::load(temp.path()).unwrap();
        assert_eq!(manifest.package.name, "mytest");
    }

    #[test]
    fn test_init_refuses_existing_manifest() {
        let temp = tempfile::tempdir().unwrap();
        init_project(temp.path(), Some("a")).unwrap();
        let err = init_project(temp.path(), Some("b")).unwrap_err();
        assert!(err.contains("pkg.toml already exists"), "{}", err);
    }
}
