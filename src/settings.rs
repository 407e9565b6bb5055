use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::decoder::{PayloadDecoder, DEFAULT_PASSTHROUGH_MODEL};
use crate::error::SettingsError;
use crate::pacing::PacingConfig;
use crate::protocol::{ChatMessage, ChatRequest};
use crate::segmenter::MAX_SEGMENT_CHARS;
use crate::state_machine::{ReassemblerConfig, DEFAULT_FALLBACK_REPLY};

const SETTINGS_DIR_NAME: &str = "voxreply";
const SETTINGS_FILE_NAME: &str = "settings.json";

const ENV_API_KEY: &str = "OPENAI_API_KEY";
const ENV_ENDPOINT: &str = "VOXREPLY_ENDPOINT";
const ENV_MODEL: &str = "VOXREPLY_MODEL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Base URL or full chat-completions URL; normalised before use.
    pub endpoint: String,

    /// Bearer token. Not needed for the pass-through model.
    pub api_key: Option<String>,

    pub model: String,
    pub system_prompt: String,

    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,

    /// Ask the upstream to stream (SSE). Buffered bodies are still segmented.
    pub stream: bool,

    /// Sole final segment of a turn that produced no visible content.
    pub fallback_reply: String,

    /// Model id answered without auth and without streaming (case-insensitive).
    pub passthrough_model: String,

    /// Force-close a segment after this many characters without punctuation.
    pub max_segment_chars: usize,

    pub pacing: PacingConfig,

    pub request_timeout_secs: u64,

    /// Default `log` level when `RUST_LOG` is not set.
    pub log_level: String,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            system_prompt: "You are a friendly voice assistant. Keep replies short and conversational."
                .to_string(),
            temperature: 0.7,
            top_p: 0.95,
            max_tokens: 2000,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            stream: true,
            fallback_reply: DEFAULT_FALLBACK_REPLY.to_string(),
            passthrough_model: DEFAULT_PASSTHROUGH_MODEL.to_string(),
            max_segment_chars: MAX_SEGMENT_CHARS,
            pacing: PacingConfig::default(),
            request_timeout_secs: 60,
            log_level: "info".to_string(),
        }
    }
}

impl ChatSettings {
    /// Override fields from the process environment (after loading `.env`).
    pub fn apply_env(&mut self) {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                log::warn!("Settings: failed to load .env: {}", e);
            }
        }
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars(&mut self, get: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| get(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = get(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        if let Some(endpoint) = get(ENV_ENDPOINT) {
            log::debug!("Settings: endpoint from {}", ENV_ENDPOINT);
            self.endpoint = endpoint;
        }
        if let Some(model) = get(ENV_MODEL) {
            log::debug!("Settings: model from {}", ENV_MODEL);
            self.model = model;
        }
    }

    /// Request body for one turn: system prompt plus the user utterance.
    pub fn build_request(&self, user_text: &str) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if !self.system_prompt.is_empty() {
            messages.push(ChatMessage::system(self.system_prompt.clone()));
        }
        messages.push(ChatMessage::user(user_text));

        ChatRequest {
            model: self.model.clone(),
            messages,
            stream: self.stream,
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            presence_penalty: self.presence_penalty,
            frequency_penalty: self.frequency_penalty,
        }
    }

    pub fn reassembler_config(&self) -> ReassemblerConfig {
        ReassemblerConfig {
            decoder: PayloadDecoder::new(self.passthrough_model.clone()),
            fallback_reply: self.fallback_reply.clone(),
            max_segment_chars: self.max_segment_chars,
        }
    }
}

/// `<config dir>/voxreply/settings.json`, if the platform has a config dir
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
}

pub fn load_settings(path: &Path) -> ChatSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<ChatSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                ChatSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => ChatSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            ChatSettings::default()
        }
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SettingsError {
    let path = path.display().to_string();
    move |source| SettingsError::Io { path, source }
}

pub fn save_settings(path: &Path, settings: &ChatSettings) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    let contents = serde_json::to_string_pretty(settings)?;

    // Write to a sibling temp file, then rename over the target.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents).map_err(io_err(&tmp_path))?;

    // Windows rename fails when the destination exists.
    if cfg!(windows) && path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(io_err(path)(e));
            }
        }
    }

    std::fs::rename(&tmp_path, path).map_err(io_err(path))?;
    log::debug!("Settings: saved to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let s = ChatSettings::default();
        assert_eq!(s.temperature, 0.7);
        assert_eq!(s.top_p, 0.95);
        assert_eq!(s.max_tokens, 2000);
        assert!(s.stream);
        assert_eq!(s.passthrough_model, "fay");
        assert_eq!(s.max_segment_chars, 30);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let s: ChatSettings = serde_json::from_str(r#"{"model": "deepseek-r1"}"#).unwrap();
        assert_eq!(s.model, "deepseek-r1");
        assert_eq!(s.max_tokens, 2000);
        assert_eq!(s.pacing, PacingConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = ChatSettings {
            model: "fay".to_string(),
            max_segment_chars: 12,
            ..Default::default()
        };

        save_settings(&path, &settings).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(load_settings(&path), settings);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            load_settings(&dir.path().join("absent.json")),
            ChatSettings::default()
        );
    }

    #[test]
    fn test_corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(load_settings(&path), ChatSettings::default());
    }

    #[test]
    fn test_default_path_is_under_app_dir() {
        if let Some(path) = default_settings_path() {
            assert!(path.ends_with("voxreply/settings.json"));
        }
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_API_KEY, "sk-test"),
            (ENV_MODEL, "gpt-4o"),
            (ENV_ENDPOINT, "  "),
        ]
        .into_iter()
        .collect();

        let mut s = ChatSettings::default();
        s.apply_vars(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(s.api_key.as_deref(), Some("sk-test"));
        assert_eq!(s.model, "gpt-4o");
        assert_eq!(s.endpoint, ChatSettings::default().endpoint);
    }

    #[test]
    fn test_build_request_is_system_then_user() {
        let s = ChatSettings::default();
        let req = s.build_request("hello");
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, "system");
        assert_eq!(req.messages[1], ChatMessage::user("hello"));
        assert_eq!(req.model, s.model);
        assert!(req.stream);
    }

    #[test]
    fn test_build_request_without_system_prompt() {
        let s = ChatSettings {
            system_prompt: String::new(),
            ..Default::default()
        };
        assert_eq!(s.build_request("hi").messages, vec![ChatMessage::user("hi")]);
    }
}
