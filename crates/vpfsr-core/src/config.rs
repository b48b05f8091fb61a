//! Attach-time configuration read from environment variables.

use std::path::PathBuf;

use tracing::warn;

use crate::abi::{VK_F1, VK_F10};
use crate::constants::MAX_SHARPNESS;

pub const HOTKEY_ENV: &str = "VPFSR_HOTKEY";
pub const SHARPNESS_ENV: &str = "VPFSR_SHARPNESS";
pub const SHADER_DIR_ENV: &str = "VPFSR_SHADER_DIR";
pub const START_ENABLED_ENV: &str = "VPFSR_START_ENABLED";

/// Settings that stay fixed for the life of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Virtual-key code that toggles Bypass/Enhance.
    pub hotkey: u16,
    /// RCAS sharpness in stops, within `[0, MAX_SHARPNESS]`.
    pub sharpness: f32,
    /// Directory with `easu`/`rcas` shader overrides.
    pub shader_dir: Option<PathBuf>,
    /// Initial state of the toggle.
    pub start_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hotkey: VK_F10,
            sharpness: 0.0,
            shader_dir: None,
            start_enabled: true,
        }
    }
}

impl Config {
    /// Read the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value lookup. Unset or blank keys keep their
    /// defaults; unparseable values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let value = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        if let Some(raw) = value(HOTKEY_ENV) {
            match parse_hotkey(&raw) {
                Some(vk) => config.hotkey = vk,
                None => warn!(key = HOTKEY_ENV, value = %raw, "unrecognised hotkey, using F10"),
            }
        }

        if let Some(raw) = value(SHARPNESS_ENV) {
            match raw.parse::<f32>() {
                Ok(stops) if stops.is_finite() => {
                    let clamped = stops.clamp(0.0, MAX_SHARPNESS);
                    if clamped != stops {
                        warn!(key = SHARPNESS_ENV, stops, clamped, "sharpness out of range");
                    }
                    config.sharpness = clamped;
                }
                _ => warn!(key = SHARPNESS_ENV, value = %raw, "invalid sharpness, using 0"),
            }
        }

        if let Some(raw) = value(SHADER_DIR_ENV) {
            config.shader_dir = Some(PathBuf::from(raw));
        }

        if let Some(raw) = value(START_ENABLED_ENV) {
            match parse_bool(&raw) {
                Some(enabled) => config.start_enabled = enabled,
                None => warn!(key = START_ENABLED_ENV, value = %raw, "expected 0 or 1"),
            }
        }

        config
    }
}

/// Accepts decimal (`121`), hex (`0x79`) or a function key name (`F10`).
pub fn parse_hotkey(raw: &str) -> Option<u16> {
    let raw = raw.trim();
    let vk = if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16).ok()?
    } else if let Some(n) = raw.strip_prefix('F').or_else(|| raw.strip_prefix('f')) {
        let n: u16 = n.parse().ok()?;
        if !(1..=12).contains(&n) {
            return None;
        }
        VK_F1 + n - 1
    } else {
        raw.parse().ok()?
    };
    // Virtual-key codes live in 1..=254.
    (1..=0xFE).contains(&vk).then_some(vk)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let c = config(&[]);
        assert_eq!(c, Config::default());
        assert_eq!(c.hotkey, 0x79);
        assert_eq!(c.sharpness, 0.0);
        assert!(c.start_enabled);
        assert!(c.shader_dir.is_none());
    }

    #[test]
    fn hotkey_forms() {
        assert_eq!(parse_hotkey("0x79"), Some(0x79));
        assert_eq!(parse_hotkey("121"), Some(121));
        assert_eq!(parse_hotkey("F1"), Some(0x70));
        assert_eq!(parse_hotkey("f12"), Some(0x7B));
        assert_eq!(parse_hotkey("F13"), None);
        assert_eq!(parse_hotkey("0"), None);
        assert_eq!(parse_hotkey("0x1FF"), None);
        assert_eq!(parse_hotkey("space"), None);
    }

    #[test]
    fn reads_all_keys() {
        let c = config(&[
            (HOTKEY_ENV, "F9"),
            (SHARPNESS_ENV, "0.5"),
            (SHADER_DIR_ENV, "C:\\shaders"),
            (START_ENABLED_ENV, "0"),
        ]);
        assert_eq!(c.hotkey, 0x78);
        assert_eq!(c.sharpness, 0.5);
        assert_eq!(c.shader_dir, Some(PathBuf::from("C:\\shaders")));
        assert!(!c.start_enabled);
    }

    #[test]
    fn sharpness_is_clamped() {
        assert_eq!(config(&[(SHARPNESS_ENV, "7")]).sharpness, MAX_SHARPNESS);
        assert_eq!(config(&[(SHARPNESS_ENV, "-1")]).sharpness, 0.0);
    }

    #[test]
    fn invalid_values_keep_defaults() {
        let c = config(&[
            (HOTKEY_ENV, "banana"),
            (SHARPNESS_ENV, "NaN"),
            (SHADER_DIR_ENV, "   "),
            (START_ENABLED_ENV, "maybe"),
        ]);
        assert_eq!(c, Config::default());
    }
}
