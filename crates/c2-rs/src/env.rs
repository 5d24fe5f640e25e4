//! Environment overrides, each read once per process.

use std::env;
use std::sync::OnceLock;

static NET_WORKERS: OnceLock<Option<usize>> = OnceLock::new();
static ENGINE_PREFERENCE: OnceLock<Option<Vec<String>>> = OnceLock::new();
static NET_TYPE: OnceLock<Option<String>> = OnceLock::new();
static HIP_LIBRARY: OnceLock<Option<String>> = OnceLock::new();
static HIP_DISABLED: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn non_empty(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

/// `C2RS_NET_WORKERS`: worker threads for parallel nets. Zero and garbage are ignored.
pub(crate) fn net_workers() -> Option<usize> {
    *NET_WORKERS.get_or_init(|| {
        non_empty("C2RS_NET_WORKERS")
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|&workers| workers > 0)
    })
}

/// `C2RS_ENGINE_PREFERENCE`: comma-separated engines tried before the default engine.
pub(crate) fn engine_preference() -> Option<Vec<String>> {
    ENGINE_PREFERENCE
        .get_or_init(|| {
            non_empty("C2RS_ENGINE_PREFERENCE").map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|engine| !engine.is_empty())
                    .map(str::to_string)
                    .collect()
            })
        })
        .clone()
}

/// `C2RS_NET_TYPE`: executor used for nets that leave `type` empty.
pub(crate) fn net_type() -> Option<String> {
    NET_TYPE.get_or_init(|| non_empty("C2RS_NET_TYPE")).clone()
}

/// `C2RS_HIP_LIBRARY`: explicit path of the HIP runtime shared library.
pub fn hip_library() -> Option<String> {
    HIP_LIBRARY.get_or_init(|| non_empty("C2RS_HIP_LIBRARY")).clone()
}

/// `C2RS_HIP_DISABLE`: skip loading the HIP runtime even when it is installed.
pub fn hip_disabled() -> bool {
    *HIP_DISABLED.get_or_init(|| match env::var("C2RS_HIP_DISABLE") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for value in ["1", "true", " YES ", "On"] {
            assert!(parse_bool(value), "{value}");
        }
        for value in ["0", "false", "off", "maybe"] {
            assert!(!parse_bool(value), "{value}");
        }
    }
}
