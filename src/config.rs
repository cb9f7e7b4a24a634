use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, TranspileError};
use crate::report::ReportFormat;

/// Filename looked up in the working directory when no `--config` is given
pub const CONFIG_FILENAME: &str = "py2rust.toml";

/// Project configuration persisted as `py2rust.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranspileConfig {
    /// Configuration file version
    pub version: String,

    /// Emitted module identity
    #[serde(default)]
    pub module: ModuleConfig,

    /// Where generated code and reports go
    #[serde(default)]
    pub output: OutputConfig,

    /// Analyzer settings
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

impl Default for TranspileConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            module: ModuleConfig::default(),
            output: OutputConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Overrides the emitted module identifier (defaults to the file stem)
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output file (one input) or directory (several inputs)
    pub destination: Option<PathBuf>,

    /// `text`, `markdown` or `json`
    pub report_format: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            destination: None,
            report_format: "text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Promote every Warning finding to Blocking
    #[serde(default)]
    pub strict: bool,

    /// Additional import equivalents, Python module -> Rust crate or path
    #[serde(default)]
    pub extra_mappings: BTreeMap<String, String>,
}

impl TranspileConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `py2rust.toml` from `dir`.
    /// Returns `Ok(None)` if the file does not exist, `Err` if malformed.
    pub fn load_optional(dir: &Path) -> anyhow::Result<Option<Self>> {
        let path = dir.join(CONFIG_FILENAME);
        if !path.exists() {
            return Ok(None);
        }
        Self::load(&path).map(Some)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Values given on the command line; each one wins over the config file
#[derive(Debug, Clone, Default)]
pub struct OptionOverrides {
    pub module_name: Option<String>,
    pub output_destination: Option<PathBuf>,
    pub strict: bool,
    pub report_format: Option<ReportFormat>,
}

/// Resolved options of one run
#[derive(Debug, Clone, PartialEq)]
pub struct TranspileOptions {
    /// Identifier of the emitted module
    pub module_name: String,
    /// Where the generated text is written; `None` keeps it in memory
    pub output_destination: Option<PathBuf>,
    /// Promote Warning findings to Blocking
    pub strict: bool,
    pub report_format: ReportFormat,
    pub extra_mappings: BTreeMap<String, String>,
}

impl TranspileOptions {
    /// Defaults for `module_name`, no output file
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            output_destination: None,
            strict: false,
            report_format: ReportFormat::default(),
            extra_mappings: BTreeMap::new(),
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Resolve the options for `source`: command line, then config file, then defaults.
    /// The output defaults to `source` with an `.rs` extension.
    pub fn resolve(
        source: &Path,
        config: Option<&TranspileConfig>,
        overrides: &OptionOverrides,
    ) -> Result<Self> {
        let module_name = overrides
            .module_name
            .clone()
            .or_else(|| config.and_then(|c| c.module.name.clone()))
            .unwrap_or_else(|| crate::frontend::module_name_from_path(&source.to_string_lossy()));

        let output_destination = overrides
            .output_destination
            .clone()
            .or_else(|| config.and_then(|c| c.output.destination.clone()))
            .unwrap_or_else(|| source.with_extension("rs"));

        let report_format = match (overrides.report_format, config) {
            (Some(format), _) => format,
            (None, Some(c)) => c.output.report_format.parse()?,
            (None, None) => ReportFormat::default(),
        };

        let options = Self {
            module_name,
            output_destination: Some(output_destination),
            strict: overrides.strict || config.is_some_and(|c| c.analysis.strict),
            report_format,
            extra_mappings: config
                .map(|c| c.analysis.extra_mappings.clone())
                .unwrap_or_default(),
        };
        options.validate()?;
        Ok(options)
    }

    /// Check every option before any pass runs
    pub fn validate(&self) -> Result<()> {
        if !crate::ast::is_identifier(&self.module_name)
            || crate::codegen::rust_ident(&self.module_name) != self.module_name
        {
            return Err(TranspileError::Configuration(format!(
                "module name '{}' is not a valid Rust identifier",
                self.module_name
            )));
        }
        if let Some(dest) = &self.output_destination {
            if dest.is_dir() {
                return Err(TranspileError::Configuration(format!(
                    "output destination {} is an existing directory",
                    dest.display()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // ============================================================================
    // DEFAULT VALUE TESTS
    // ============================================================================

    #[test]
    fn test_transpile_config_default() {
        let config = TranspileConfig::default();
        assert_eq!(config.version, "1.0");
        assert!(config.module.name.is_none());
        assert!(config.output.destination.is_none());
        assert_eq!(config.output.report_format, "text");
        assert!(!config.analysis.strict);
        assert!(config.analysis.extra_mappings.is_empty());
    }

    #[test]
    fn test_options_new_defaults() {
        let options = TranspileOptions::new("sample");
        assert_eq!(options.module_name, "sample");
        assert!(options.output_destination.is_none());
        assert!(!options.strict);
        assert_eq!(options.report_format, ReportFormat::Text);
    }

    // ============================================================================
    // FILE I/O TESTS
    // ============================================================================

    #[test]
    fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(CONFIG_FILENAME);

        let mut config = TranspileConfig::default();
        config.module.name = Some("geometry".to_string());
        config.output.report_format = "json".to_string();
        config.analysis.strict = true;
        config
            .analysis
            .extra_mappings
            .insert("flask".to_string(), "axum".to_string());

        config.save(&config_path).unwrap();
        assert!(config_path.exists());

        let loaded = TranspileConfig::load(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = TranspileConfig::load(Path::new("/nonexistent/py2rust.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "invalid toml content [[[").unwrap();

        assert!(TranspileConfig::load(&config_path).is_err());
    }

    #[test]
    fn test_load_optional_missing_is_none() {
        let temp_dir = TempDir::new().unwrap();
        assert!(TranspileConfig::load_optional(temp_dir.path())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_load_optional_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join(CONFIG_FILENAME),
            "version = \"1.0\"\n\n[analysis]\nstrict = true\n",
        )
        .unwrap();

        let config = TranspileConfig::load_optional(temp_dir.path())
            .unwrap()
            .unwrap();
        assert!(config.analysis.strict);
        assert_eq!(config.output.report_format, "text");
    }

    #[test]
    fn test_save_config_toml_format() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(CONFIG_FILENAME);
        TranspileConfig::default().save(&config_path).unwrap();

        let content = std::fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("version = \"1.0\""));
        assert!(content.contains("[module]"));
        assert!(content.contains("[output]"));
        assert!(content.contains("[analysis]"));
    }

    // ============================================================================
    // RESOLUTION TESTS
    // ============================================================================

    #[test]
    fn test_resolve_defaults_from_path() {
        let options =
            TranspileOptions::resolve(Path::new("src/shapes.py"), None, &OptionOverrides::default())
                .unwrap();
        assert_eq!(options.module_name, "shapes");
        assert_eq!(options.output_destination, Some(PathBuf::from("src/shapes.rs")));
        assert!(!options.strict);
        assert_eq!(options.report_format, ReportFormat::Text);
    }

    #[test]
    fn test_resolve_config_over_defaults() {
        let mut config = TranspileConfig::default();
        config.module.name = Some("geometry".to_string());
        config.output.report_format = "md".to_string();
        config.analysis.strict = true;

        let options = TranspileOptions::resolve(
            Path::new("shapes.py"),
            Some(&config),
            &OptionOverrides::default(),
        )
        .unwrap();
        assert_eq!(options.module_name, "geometry");
        assert_eq!(options.report_format, ReportFormat::Markdown);
        assert!(options.strict);
    }

    #[test]
    fn test_resolve_cli_over_config() {
        let mut config = TranspileConfig::default();
        config.module.name = Some("geometry".to_string());
        config.output.report_format = "markdown".to_string();

        let overrides = OptionOverrides {
            module_name: Some("shapes_rs".to_string()),
            output_destination: Some(PathBuf::from("out.rs")),
            strict: false,
            report_format: Some(ReportFormat::Json),
        };
        let options =
            TranspileOptions::resolve(Path::new("shapes.py"), Some(&config), &overrides).unwrap();
        assert_eq!(options.module_name, "shapes_rs");
        assert_eq!(options.output_destination, Some(PathBuf::from("out.rs")));
        assert_eq!(options.report_format, ReportFormat::Json);
    }

    #[test]
    fn test_resolve_rejects_unknown_format() {
        let mut config = TranspileConfig::default();
        config.output.report_format = "html".to_string();
        let err = TranspileOptions::resolve(
            Path::new("shapes.py"),
            Some(&config),
            &OptionOverrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TranspileError::Configuration(_)));
    }

    // ============================================================================
    // VALIDATION TESTS
    // ============================================================================

    #[test]
    fn test_validate_module_names() {
        assert!(TranspileOptions::new("geometry").validate().is_ok());
        assert!(TranspileOptions::new("_private2").validate().is_ok());
        for bad in ["2fast", "my-module", "", "fn", "match", "self"] {
            let err = TranspileOptions::new(bad).validate().unwrap_err();
            assert!(
                matches!(err, TranspileError::Configuration(_)),
                "accepted {}",
                bad
            );
        }
    }

    #[test]
    fn test_validate_rejects_directory_output() {
        let temp_dir = TempDir::new().unwrap();
        let mut options = TranspileOptions::new("sample");
        options.output_destination = Some(temp_dir.path().to_path_buf());
        assert!(options.validate().is_err());

        options.output_destination = Some(temp_dir.path().join("sample.rs"));
        assert!(options.validate().is_ok());
    }
}
