//! Machine configuration: a merged JSON option document.
//!
//! Updates are partial documents merged key-by-key into the retained
//! document, so a host can adjust one option without restating the rest.

use std::fs;

use serde_json::Value;

use emu80_core::MachineError;

use crate::clock::MAX_RESOLUTION_NS;

/// Keys the option store recognises; anything else is rejected.
const KNOWN_KEYS: &[&str] = &[
    "clockResolution",
    "compressor",
    "cpu",
    "encoder",
    "isrFreq",
    "loadAsync",
    "ram",
    "rom",
    "runAsync",
    "saveAsync",
];

fn default_document() -> Value {
    serde_json::json!({
        "clockResolution": -1,
        "compressor": "zlib",
        "encoder": "base64",
        "isrFreq": 0.0,
        "loadAsync": false,
        "ram": { "block": [ { "offset": 0, "size": 0 } ] },
        "rom": { "file": [ { "offset": 0, "size": 0 } ] },
        "runAsync": false,
        "saveAsync": false,
    })
}

/// The parsed and validated option document with typed accessors.
#[derive(Debug, Clone)]
pub struct Opt {
    document: Value,
}

impl Default for Opt {
    fn default() -> Self {
        Self { document: default_document() }
    }
}

impl Opt {
    /// Merge an option document into the store.
    ///
    /// `options` is raw JSON, or `file://<path>` naming a file holding
    /// the document. `None` restores every option to its default (the
    /// CPU model, which may be set exactly once, is left alone).
    pub fn set_options(&mut self, options: Option<&str>) -> Result<(), MachineError> {
        let incoming = match options {
            None => default_document(),
            Some(source) => {
                let text = if let Some(path) = source.strip_prefix("file://") {
                    fs::read_to_string(path).map_err(|_| MachineError::JsonParse)?
                } else {
                    source.to_owned()
                };
                serde_json::from_str(&text).map_err(|_| MachineError::JsonParse)?
            }
        };

        let Value::Object(ref update) = incoming else {
            return Err(MachineError::JsonParse);
        };

        for (key, value) in update {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                return Err(MachineError::UnknownOption);
            }
            self.validate(key, value)?;
        }

        let Value::Object(ref mut document) = self.document else {
            unreachable!("the retained document is always an object");
        };
        for (key, value) in update {
            document.insert(key.clone(), value.clone());
        }

        Ok(())
    }

    fn validate(&self, key: &str, value: &Value) -> Result<(), MachineError> {
        match key {
            "cpu" => {
                // The CPU model may be set exactly once.
                if self.document.get("cpu").is_some() {
                    return Err(MachineError::JsonConfig);
                }
                if !value.is_string() {
                    return Err(MachineError::JsonConfig);
                }
            }
            "clockResolution" => {
                let ns = value.as_i64().ok_or(MachineError::JsonConfig)?;
                if !(-1..=MAX_RESOLUTION_NS).contains(&ns) {
                    return Err(MachineError::ClockResolution);
                }
            }
            "isrFreq" => {
                let freq = value.as_f64().ok_or(MachineError::JsonConfig)?;
                if freq < 0.0 {
                    return Err(MachineError::JsonConfig);
                }
            }
            "runAsync" | "loadAsync" | "saveAsync" => {
                if !value.is_boolean() {
                    return Err(MachineError::JsonConfig);
                }
            }
            "compressor" => match value.as_str() {
                Some("none" | "zlib") => {}
                _ => return Err(MachineError::JsonConfig),
            },
            "encoder" => {
                if !value.is_string() {
                    return Err(MachineError::JsonConfig);
                }
            }
            "rom" => {
                regions(value, "file").ok_or(MachineError::JsonConfig)?;
            }
            "ram" => {
                regions(value, "block").ok_or(MachineError::JsonConfig)?;
            }
            _ => {}
        }
        Ok(())
    }

    pub fn clock_resolution(&self) -> i64 {
        self.document["clockResolution"].as_i64().unwrap_or(-1)
    }

    pub fn cpu_type(&self) -> Option<&str> {
        self.document.get("cpu").and_then(Value::as_str)
    }

    pub fn isr_freq(&self) -> f64 {
        self.document["isrFreq"].as_f64().unwrap_or(0.0)
    }

    pub fn run_async(&self) -> bool {
        self.document["runAsync"].as_bool().unwrap_or(false)
    }

    pub fn load_async(&self) -> bool {
        self.document["loadAsync"].as_bool().unwrap_or(false)
    }

    pub fn save_async(&self) -> bool {
        self.document["saveAsync"].as_bool().unwrap_or(false)
    }

    pub fn compressor(&self) -> String {
        self.document["compressor"]
            .as_str()
            .unwrap_or("none")
            .to_owned()
    }

    pub fn encoder(&self) -> String {
        self.document["encoder"]
            .as_str()
            .unwrap_or("base64")
            .to_owned()
    }

    /// ROM regions as (offset, size) pairs; their digest is the machine's
    /// save-state identity.
    pub fn rom(&self) -> Vec<(u16, u16)> {
        regions(&self.document["rom"], "file").unwrap_or_default()
    }

    /// RAM regions as (offset, size) pairs; these are serialized into
    /// save states.
    pub fn ram(&self) -> Vec<(u16, u16)> {
        regions(&self.document["ram"], "block").unwrap_or_default()
    }
}

/// Parse `{ "<list>": [ { "offset", "size" }, ... ] }` region metadata.
fn regions(value: &Value, list: &str) -> Option<Vec<(u16, u16)>> {
    let entries = value.get(list)?.as_array()?;
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let offset = entry.get("offset")?.as_u64()?;
        let size = entry.get("size")?.as_u64()?;
        if offset > u64::from(u16::MAX) || size > u64::from(u16::MAX) {
            return None;
        }
        out.push((offset as u16, size as u16));
    }
    Some(out)
}
