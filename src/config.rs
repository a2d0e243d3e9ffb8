//! Configuration for reelsmith.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (REELSMITH_HOME, REELSMITH_OUTPUT)
//! 2. Config file (.reelsmith/config.yaml)
//! 3. Defaults (~/.reelsmith)
//!
//! Config file discovery:
//! - Searches current directory and parents for .reelsmith/config.yaml
//! - Paths in config file are relative to the config file's parent directory

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::Capability;
use crate::core::{FanOutPolicy, ProviderLimits, RetryPolicy};
use crate::domain::{Motion, ProviderId, TimelineSettings};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub timeline: Option<TimelineSettings>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub fan_out: Option<FanOutPolicy>,
    /// Provider id -> settings; merged over the built-in defaults
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    /// Voice name -> provider voice id; merged over the built-in table
    #[serde(default)]
    pub voices: HashMap<String, String>,
    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to config file)
    pub home: Option<String>,
    /// Generated media directory (relative to config file)
    pub output: Option<String>,
}

/// One provider's capability, limits and optional backing command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: Capability,

    #[serde(flatten)]
    pub limits: ProviderLimits,

    /// Program and arguments speaking the JSON stdin/stdout protocol
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

impl ProviderConfig {
    pub fn new(kind: Capability, limits: ProviderLimits) -> Self {
        Self {
            kind,
            limits,
            command: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenderConfig {
    pub motion_pattern: Option<Vec<Motion>>,
    pub fps: Option<u32>,
    pub workers: Option<usize>,
    pub end_buffer_portrait: Option<String>,
    pub end_buffer_landscape: Option<String>,
    pub ffmpeg: Option<String>,
    pub ffprobe: Option<String>,
}

/// Render settings with paths resolved
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderSettings {
    pub motion_pattern: Vec<Motion>,
    pub fps: u32,
    /// Render pool size (host CPU count when unset)
    pub workers: Option<usize>,
    pub end_buffer_portrait: Option<PathBuf>,
    pub end_buffer_landscape: Option<PathBuf>,
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            motion_pattern: Motion::default_pattern(),
            fps: 48,
            workers: None,
            end_buffer_portrait: None,
            end_buffer_landscape: None,
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Absolute path to reelsmith home (run journals)
    pub home: PathBuf,
    /// Absolute path to generated media
    pub output: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub timeline: TimelineSettings,
    pub retry: RetryPolicy,
    pub fan_out: FanOutPolicy,
    pub providers: BTreeMap<ProviderId, ProviderConfig>,
    pub voices: BTreeMap<String, String>,
    pub render: RenderSettings,
}

impl ResolvedConfig {
    /// Defaults rooted at `home`
    pub fn with_home(home: PathBuf) -> Self {
        let output = home.join("output");
        Self {
            home,
            output,
            config_file: None,
            timeline: TimelineSettings::default(),
            retry: RetryPolicy::default(),
            fan_out: FanOutPolicy::default(),
            providers: default_providers(),
            voices: default_voices(),
            render: RenderSettings::default(),
        }
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }

    /// Limits for every configured provider, for building the governor
    pub fn provider_limits(&self) -> Vec<(ProviderId, ProviderLimits)> {
        self.providers
            .iter()
            .map(|(id, p)| (id.clone(), p.limits.clone()))
            .collect()
    }
}

/// Built-in provider table; one id per capability so text and image calls
/// from the same vendor never share a gate.
pub fn default_providers() -> BTreeMap<ProviderId, ProviderConfig> {
    let image = |max| ProviderLimits::new(max).with_rate(1, 9.0).with_timeout(180.0);
    [
        (
            "gemini",
            ProviderConfig::new(Capability::Llm, ProviderLimits::new(2).with_timeout(120.0)),
        ),
        (
            "elevenlabs",
            ProviderConfig::new(Capability::Tts, ProviderLimits::new(3).with_timeout(300.0)),
        ),
        ("imagen", ProviderConfig::new(Capability::Image, image(8))),
        ("openai-image", ProviderConfig::new(Capability::Image, image(8))),
        ("flux", ProviderConfig::new(Capability::Image, image(5))),
    ]
    .into_iter()
    .map(|(id, config)| (ProviderId::from(id), config))
    .collect()
}

/// Built-in voice name table
pub fn default_voices() -> BTreeMap<String, String> {
    [
        ("american_male_narrator", "Dslrhjl3ZpzrctukrQSN"),
        ("american_male_conversationalist", "Dslrhjl3ZpzrctukrQSN"),
        ("american_female_conversationalist", "tnSpp4vdxKPjI9w0GnoV"),
        ("british_male_narrator", "giAoKpl5weRTCJK7uB9b"),
        ("british_female_narrator", "1hlpeD1ydbI2ow0Tt3EW"),
        ("american_male_story_teller", "uju3wxzG5OhpWcoi3SMy"),
        ("american_female_narrator", "yj30vwTGJxSHezdAGsv9"),
        ("american_female_media_influencer", "kPzsL2i3teMYv0FxEYQ6"),
        ("american_female_media_influencer_2", "S9NKLs1GeSTKzXd9D0Lf"),
        ("new_male_convo", "1SM7GgM6IMuvQlz2BwM3"),
    ]
    .into_iter()
    .map(|(name, id)| (name.to_string(), id.to_string()))
    .collect()
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".reelsmith").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn parse_config(content: &str) -> Result<ConfigFile> {
    Ok(serde_yaml::from_str(content)?)
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Apply a parsed config file over the defaults.
///
/// `base_dir` is the project root (the parent of `.reelsmith/`).
fn apply_config_file(mut resolved: ResolvedConfig, config: ConfigFile, base_dir: &Path) -> ResolvedConfig {
    if let Some(ref home) = config.paths.home {
        resolved.home = resolve_path(base_dir, home);
        resolved.output = resolved.home.join("output");
    }
    if let Some(ref output) = config.paths.output {
        resolved.output = resolve_path(base_dir, output);
    }
    if let Some(timeline) = config.timeline {
        resolved.timeline = timeline;
    }
    if let Some(retry) = config.retry {
        resolved.retry = retry;
    }
    if let Some(fan_out) = config.fan_out {
        resolved.fan_out = fan_out;
    }
    for (id, provider) in config.providers {
        resolved.providers.insert(ProviderId::from(id), provider);
    }
    resolved.voices.extend(config.voices);

    let render = config.render;
    if let Some(pattern) = render.motion_pattern.filter(|p| !p.is_empty()) {
        resolved.render.motion_pattern = pattern;
    }
    if let Some(fps) = render.fps.filter(|fps| *fps > 0) {
        resolved.render.fps = fps;
    }
    resolved.render.workers = render.workers;
    resolved.render.end_buffer_portrait = render
        .end_buffer_portrait
        .map(|p| resolve_path(base_dir, &p));
    resolved.render.end_buffer_landscape = render
        .end_buffer_landscape
        .map(|p| resolve_path(base_dir, &p));
    if let Some(ffmpeg) = render.ffmpeg {
        resolved.render.ffmpeg = ffmpeg;
    }
    if let Some(ffprobe) = render.ffprobe {
        resolved.render.ffprobe = ffprobe;
    }

    resolved
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    // Default home directory
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".reelsmith");

    let mut resolved = ResolvedConfig::with_home(default_home);

    // Check for config file
    if let Some(config_path) = find_config_file() {
        let config = load_config_file(&config_path)?;

        // Base directory is the parent of .reelsmith/ (i.e., grandparent of config.yaml)
        let base_dir = config_path
            .parent() // .reelsmith/
            .and_then(|p| p.parent()) // project root
            .unwrap_or(Path::new("."))
            .to_path_buf();

        resolved = apply_config_file(resolved, config, &base_dir);
        resolved.config_file = Some(config_path);
    }

    if let Ok(env_home) = std::env::var("REELSMITH_HOME") {
        let output_was_derived = resolved.output == resolved.home.join("output");
        resolved.home = PathBuf::from(env_home);
        if output_was_derived {
            resolved.output = resolved.home.join("output");
        }
    }
    if let Ok(env_output) = std::env::var("REELSMITH_OUTPUT") {
        resolved.output = PathBuf::from(env_output);
    }

    Ok(resolved)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Get the runs directory ($REELSMITH_HOME/runs)
pub fn runs_dir() -> Result<PathBuf> {
    Ok(config()?.runs_dir())
}
