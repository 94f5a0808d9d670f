use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::algorithms::SolverConfig;
use crate::core::{AutoAddPolicy, Point2, SMOOTHING_ALPHA, TICK_INTERVAL_MS};

/// Engine-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Robust solver parameters
    pub solver: SolverConfig,
    /// Exponential smoothing factor, in (0, 1)
    pub smoothing_alpha: f64,
    /// Handling of ranges from anchors that are not in the table
    pub auto_add_policy: AutoAddPolicy,
    /// Where permissive mode places newly sighted anchors (meters)
    pub default_anchor_position: Point2,
    /// Fewest active anchors for which a solve is attempted
    pub min_active_anchors: usize,
    /// Which previous estimate seeds the next solve
    pub warm_start: WarmStartSource,
    /// Solve tick period (milliseconds)
    pub tick_interval_ms: u64,
    /// Initial anchor table
    pub anchors: Vec<AnchorConfig>,
}

/// Anchor entry in the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorConfig {
    /// Anchor identifier as reported by the tag, e.g. "0x1781"
    pub id: String,
    pub x: f64,
    pub y: f64,
    /// Range calibration offset (meters)
    #[serde(default)]
    pub bias: f64,
}

/// Source of the warm start passed to the solver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarmStartSource {
    /// Previous raw solver output
    #[default]
    Raw,
    /// Previous smoothed estimate
    Smoothed,
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Invalid parameter value
    InvalidParameter { parameter: String, value: String, reason: String },
    /// Configuration file I/O error
    IoError { message: String },
    /// JSON serialization/deserialization error
    SerializationError { message: String },
    /// Anchor configuration conflict
    AnchorConflict { anchor_id: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidParameter { parameter, value, reason } => {
                write!(f, "Invalid {} = {}: {}", parameter, value, reason)
            }
            ConfigError::IoError { message } => write!(f, "I/O error: {}", message),
            ConfigError::SerializationError { message } => write!(f, "Serialization error: {}", message),
            ConfigError::AnchorConflict { anchor_id, reason } => {
                write!(f, "Anchor {} conflict: {}", anchor_id, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Configuration validation result
#[derive(Debug)]
pub struct ValidationResult {
    /// Whether configuration is valid
    pub is_valid: bool,
    /// Validation errors
    pub errors: Vec<ConfigError>,
    /// Validation warnings
    pub warnings: Vec<String>,
    /// Suggested corrections
    pub suggestions: Vec<String>,
}

impl ValidationResult {
    fn from_parts(errors: Vec<ConfigError>, warnings: Vec<String>, suggestions: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            suggestions,
        }
    }

    /// First error, if any
    pub fn into_result(self) -> Result<Vec<String>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(self.warnings),
        }
    }
}

/// Main configuration manager
pub struct ConfigurationManager {
    /// Current engine configuration
    config: EngineConfig,
    /// Configuration file path
    config_file_path: Option<String>,
    /// Whether configuration has been modified
    is_modified: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            solver: SolverConfig::default(),
            smoothing_alpha: SMOOTHING_ALPHA,
            auto_add_policy: AutoAddPolicy::Locked,
            default_anchor_position: Point2::default(),
            min_active_anchors: 1,
            warm_start: WarmStartSource::Raw,
            tick_interval_ms: TICK_INTERVAL_MS,
            anchors: vec![
                AnchorConfig { id: "0x1781".to_string(), x: 0.0, y: 0.0, bias: 0.0 },
                AnchorConfig { id: "0x1782".to_string(), x: 3.0, y: 0.0, bias: 0.0 },
            ],
        }
    }
}

impl EngineConfig {
    pub fn with_smoothing_alpha(mut self, alpha: f64) -> Self {
        self.smoothing_alpha = alpha;
        self
    }

    pub fn with_auto_add_policy(mut self, policy: AutoAddPolicy) -> Self {
        self.auto_add_policy = policy;
        self
    }

    pub fn with_tick_interval_ms(mut self, interval_ms: u64) -> Self {
        self.tick_interval_ms = interval_ms;
        self
    }

    pub fn with_anchors(mut self, anchors: Vec<AnchorConfig>) -> Self {
        self.anchors = anchors;
        self
    }
}

impl Default for ConfigurationManager {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(parameter: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        parameter: parameter.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

impl ConfigurationManager {
    /// Create a manager holding the default configuration
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            config_file_path: None,
            is_modified: false,
        }
    }

    /// Create a manager from a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut manager = Self::new();
        manager.load_from_file(path)?;
        Ok(manager)
    }

    pub fn get_config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replace the configuration after validating it
    pub fn update_config(&mut self, config: EngineConfig) -> Result<Vec<String>, ConfigError> {
        let warnings = self.validate_config(&config).into_result()?;
        self.config = config;
        self.is_modified = true;
        Ok(warnings)
    }

    /// Swap in a new anchor table, e.g. after calibration, keeping every other setting
    pub fn replace_anchors(&mut self, anchors: Vec<AnchorConfig>) -> Result<Vec<String>, ConfigError> {
        let config = self.config.clone().with_anchors(anchors);
        self.update_config(config)
    }

    /// Load configuration from JSON file
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = fs::read_to_string(&path)
            .map_err(|e| ConfigError::IoError {
                message: format!("Failed to read config file '{}': {}", path_str, e),
            })?;

        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| ConfigError::SerializationError {
                message: format!("Failed to parse config file '{}': {}", path_str, e),
            })?;

        // Validate before applying
        self.validate_config(&config).into_result()?;

        self.config = config;
        self.config_file_path = Some(path_str);
        self.is_modified = false;
        Ok(())
    }

    /// Save configuration to JSON file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = serde_json::to_string_pretty(&self.config)
            .map_err(|e| ConfigError::SerializationError {
                message: format!("Failed to serialize config: {}", e),
            })?;

        fs::write(&path, content)
            .map_err(|e| ConfigError::IoError {
                message: format!("Failed to write config file '{}': {}", path_str, e),
            })?;

        self.config_file_path = Some(path_str);
        self.is_modified = false;
        Ok(())
    }

    /// Save to the currently loaded file path
    pub fn save(&mut self) -> Result<(), ConfigError> {
        if let Some(path) = self.config_file_path.clone() {
            self.save_to_file(path)
        } else {
            Err(ConfigError::IoError {
                message: "No file path set for saving configuration".to_string(),
            })
        }
    }

    /// Check if configuration has been modified since last save
    pub fn is_modified(&self) -> bool {
        self.is_modified
    }

    // Runtime Parameter Adjustment Methods

    /// Update the smoothing factor, returning the previous value
    pub fn set_smoothing_alpha(&mut self, alpha: f64) -> Result<f64, ConfigError> {
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(invalid("smoothing_alpha", alpha, "Smoothing factor must lie strictly between 0 and 1"));
        }
        let old_value = self.config.smoothing_alpha;
        self.config.smoothing_alpha = alpha;
        self.is_modified = true;
        Ok(old_value)
    }

    /// Update the Huber threshold, returning the previous value
    pub fn set_huber_delta(&mut self, delta: f64) -> Result<f64, ConfigError> {
        if !(delta > 0.0) {
            return Err(invalid("solver.huber_delta", delta, "Huber threshold must be positive"));
        }
        let old_value = self.config.solver.huber_delta;
        self.config.solver.huber_delta = delta;
        self.is_modified = true;
        Ok(old_value)
    }

    /// Update the tick period, returning the previous value
    pub fn set_tick_interval(&mut self, interval_ms: u64) -> Result<u64, ConfigError> {
        if interval_ms == 0 {
            return Err(invalid("tick_interval_ms", interval_ms, "Tick interval must be at least 1 ms"));
        }
        let old_value = self.config.tick_interval_ms;
        self.config.tick_interval_ms = interval_ms;
        self.is_modified = true;
        Ok(old_value)
    }

    pub fn set_auto_add_policy(&mut self, policy: AutoAddPolicy) -> AutoAddPolicy {
        let old_value = self.config.auto_add_policy;
        self.config.auto_add_policy = policy;
        self.is_modified = true;
        old_value
    }

    /// Add or replace an anchor in the initial table
    pub fn set_anchor_config(&mut self, anchor: AnchorConfig) -> Result<(), ConfigError> {
        let validation = self.validate_anchor_config(&anchor);
        validation.into_result()?;

        match self.config.anchors.iter_mut().find(|a| a.id == anchor.id) {
            Some(existing) => *existing = anchor,
            None => self.config.anchors.push(anchor),
        }
        self.is_modified = true;
        Ok(())
    }

    pub fn remove_anchor_config(&mut self, anchor_id: &str) -> Option<AnchorConfig> {
        let index = self.config.anchors.iter().position(|a| a.id == anchor_id)?;
        self.is_modified = true;
        Some(self.config.anchors.remove(index))
    }

    /// Validate a complete engine configuration
    pub fn validate_config(&self, config: &EngineConfig) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut suggestions = Vec::new();

        if !(config.smoothing_alpha > 0.0 && config.smoothing_alpha < 1.0) {
            errors.push(invalid(
                "smoothing_alpha",
                config.smoothing_alpha,
                "Smoothing factor must lie strictly between 0 and 1",
            ));
        }

        if config.min_active_anchors == 0 {
            errors.push(invalid(
                "min_active_anchors",
                config.min_active_anchors,
                "At least one active anchor is needed to produce an estimate",
            ));
        }

        if config.tick_interval_ms == 0 {
            errors.push(invalid("tick_interval_ms", config.tick_interval_ms, "Tick interval must be at least 1 ms"));
        } else if config.tick_interval_ms > 1000 {
            warnings.push("Tick interval above 1 s makes the display lag behind the tag".to_string());
        }

        if !config.default_anchor_position.is_finite() {
            errors.push(invalid(
                "default_anchor_position",
                format!("{:?}", config.default_anchor_position),
                "Default anchor position must be finite",
            ));
        }

        errors.extend(Self::validate_solver_config(&config.solver));

        let mut seen = HashSet::new();
        for anchor in &config.anchors {
            let anchor_validation = self.validate_anchor_config(anchor);
            errors.extend(anchor_validation.errors);
            warnings.extend(anchor_validation.warnings);

            if !seen.insert(anchor.id.as_str()) {
                errors.push(ConfigError::AnchorConflict {
                    anchor_id: anchor.id.clone(),
                    reason: "Duplicate anchor id".to_string(),
                });
            }
        }

        if config.anchors.len() < 3 {
            warnings.push(format!(
                "Only {} anchors configured; robust solving needs at least 3",
                config.anchors.len()
            ));
            if config.auto_add_policy == AutoAddPolicy::Locked {
                suggestions.push("Add anchors to the table or enable permissive auto-add".to_string());
            }
        } else if Self::check_collinearity(&config.anchors) {
            warnings.push("Anchors are nearly collinear, which leaves a mirror ambiguity".to_string());
            suggestions.push("Move one anchor off the common line".to_string());
        }

        ValidationResult::from_parts(errors, warnings, suggestions)
    }

    /// Validate solver parameters
    pub fn validate_solver_config(solver: &SolverConfig) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let positive = [
            ("solver.huber_delta", solver.huber_delta),
            ("solver.lambda_initial", solver.lambda_initial),
            ("solver.lambda_min", solver.lambda_min),
            ("solver.lambda_max", solver.lambda_max),
            ("solver.max_step", solver.max_step),
            ("solver.convergence_threshold", solver.convergence_threshold),
            ("solver.distance_epsilon", solver.distance_epsilon),
            ("solver.singular_threshold", solver.singular_threshold),
        ];
        for (parameter, value) in positive {
            if !(value > 0.0) {
                errors.push(invalid(parameter, value, "Must be positive"));
            }
        }

        if !(solver.lambda_decay > 0.0 && solver.lambda_decay < 1.0) {
            errors.push(invalid("solver.lambda_decay", solver.lambda_decay, "Decay must lie strictly between 0 and 1"));
        }
        if !(solver.lambda_growth > 1.0) {
            errors.push(invalid("solver.lambda_growth", solver.lambda_growth, "Growth must be greater than 1"));
        }
        if solver.lambda_min > solver.lambda_max {
            errors.push(invalid(
                "solver.lambda_min",
                solver.lambda_min,
                "Damping floor must not exceed the damping ceiling",
            ));
        }
        if solver.max_iterations == 0 {
            errors.push(invalid("solver.max_iterations", solver.max_iterations, "Iteration budget must be at least 1"));
        }
        if let Some(limit) = solver.max_carried_offset {
            if !(limit >= 0.0) {
                errors.push(invalid("solver.max_carried_offset", limit, "Offset clamp must be non-negative"));
            }
        }

        errors
    }

    /// Validate one anchor entry
    pub fn validate_anchor_config(&self, anchor: &AnchorConfig) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut suggestions = Vec::new();

        if anchor.id.trim().is_empty() {
            errors.push(invalid("anchors.id", &anchor.id, "Anchor id must not be empty"));
        }

        if !anchor.x.is_finite() || !anchor.y.is_finite() {
            errors.push(invalid(
                "anchors.position",
                format!("({}, {})", anchor.x, anchor.y),
                "Anchor position must be finite",
            ));
        }

        if !anchor.bias.is_finite() {
            errors.push(invalid("anchors.bias", anchor.bias, "Bias must be finite"));
        } else if anchor.bias.abs() > 2.0 {
            warnings.push(format!("Anchor {} has a bias above 2 m", anchor.id));
            suggestions.push("Recalibrate with the tag at a surveyed point".to_string());
        }

        ValidationResult::from_parts(errors, warnings, suggestions)
    }

    /// True when every anchor lies within 1% of the baseline length from one line
    fn check_collinearity(anchors: &[AnchorConfig]) -> bool {
        if anchors.len() < 3 {
            return false;
        }

        let first = Point2::new(anchors[0].x, anchors[0].y);
        let Some(far) = anchors
            .iter()
            .map(|a| Point2::new(a.x, a.y))
            .max_by(|a, b| first.distance_to(a).total_cmp(&first.distance_to(b)))
        else {
            return false;
        };

        let baseline = first.distance_to(&far);
        if baseline < 1e-9 {
            return true; // All anchors coincide
        }

        let (dx, dy) = ((far.x - first.x) / baseline, (far.y - first.y) / baseline);
        anchors.iter().all(|a| {
            let perpendicular = ((a.x - first.x) * dy - (a.y - first.y) * dx).abs();
            perpendicular < 0.01 * baseline
        })
    }
}
