use super::traits::{AudioRoute, Mixer};
use super::xml::{self, XmlEvent};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

#[derive(Clone, Debug, PartialEq, Eq)]
enum CtlValue {
    Int(i64),
    Enum(String),
}

impl CtlValue {
    fn parse(raw: &str) -> Self {
        raw.trim()
            .parse::<i64>()
            .map(Self::Int)
            .unwrap_or_else(|_| Self::Enum(raw.to_string()))
    }
}

type CtlKey = (String, Option<usize>);

#[derive(Clone, Debug)]
struct CtlSetting {
    key: CtlKey,
    value: CtlValue,
}

#[derive(Default)]
struct RouteState {
    pending: Vec<(CtlKey, CtlValue)>,
    current: HashMap<CtlKey, CtlValue>,
}

/// Route graph loaded from a mixer-paths XML file: top-level `<ctl>` entries
/// are the reset defaults, `<path>` entries are named bundles that may include
/// previously defined paths.
pub struct MixerPaths {
    mixer: Arc<dyn Mixer>,
    defaults: HashMap<CtlKey, CtlValue>,
    paths: HashMap<String, Vec<CtlSetting>>,
    state: Mutex<RouteState>,
}

impl std::fmt::Debug for MixerPaths {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixerPaths")
            .field("defaults", &self.defaults.len())
            .field("paths", &self.paths.len())
            .finish()
    }
}

impl MixerPaths {
    pub fn load(mixer: Arc<dyn Mixer>, path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read mixer paths '{}': {e}", path.display()))?;
        Self::parse(mixer, &text)
    }

    pub fn parse(mixer: Arc<dyn Mixer>, text: &str) -> Result<Self, String> {
        let mut defaults = HashMap::new();
        let mut paths: HashMap<String, Vec<CtlSetting>> = HashMap::new();
        let mut stack: Vec<(String, Vec<CtlSetting>)> = Vec::new();

        for event in xml::parse(text)? {
            match event {
                XmlEvent::Start { name, attrs } if name == "path" => {
                    let path_name = xml::attr(&attrs, "name")
                        .ok_or_else(|| "path without name".to_string())?
                        .to_string();
                    if let Some((_, parent)) = stack.last_mut() {
                        // Nested <path name=".."/> includes an already defined path.
                        if let Some(included) = paths.get(&path_name) {
                            parent.extend(included.iter().cloned());
                        } else {
                            return Err(format!("path '{path_name}' included before definition"));
                        }
                    }
                    stack.push((path_name, Vec::new()));
                }
                XmlEvent::Start { name, attrs } if name == "ctl" => {
                    let ctl_name = xml::attr(&attrs, "name")
                        .ok_or_else(|| "ctl without name".to_string())?;
                    let value = xml::attr(&attrs, "value")
                        .ok_or_else(|| format!("ctl '{ctl_name}' without value"))?;
                    let index = xml::attr(&attrs, "id").and_then(|v| v.parse::<usize>().ok());
                    let setting = CtlSetting {
                        key: (ctl_name.to_string(), index),
                        value: CtlValue::parse(value),
                    };
                    match stack.last_mut() {
                        Some((_, settings)) => settings.push(setting),
                        None => {
                            defaults.insert(setting.key, setting.value);
                        }
                    }
                }
                XmlEvent::End { name } if name == "path" => {
                    if let Some((path_name, settings)) = stack.pop() {
                        if stack.is_empty() {
                            paths.insert(path_name, settings);
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(Self {
            mixer,
            defaults,
            paths,
            state: Mutex::new(RouteState::default()),
        })
    }

    pub fn has_path(&self, name: &str) -> bool {
        self.paths.contains_key(name)
    }

    fn settings(&self, name: &str) -> Result<&[CtlSetting], String> {
        self.paths
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| format!("unable to find path '{name}'"))
    }

    fn write(&self, key: &CtlKey, value: &CtlValue) -> Result<(), String> {
        let (name, index) = key;
        match (value, index) {
            (CtlValue::Enum(s), _) => self.mixer.set_enum_by_string(name, s),
            (CtlValue::Int(v), Some(i)) => self.mixer.set_value(name, *i, *v),
            (CtlValue::Int(v), None) => {
                let count = self.mixer.num_values(name)?.max(1);
                for i in 0..count {
                    self.mixer.set_value(name, i, *v)?;
                }
                Ok(())
            }
        }
    }
}

impl AudioRoute for MixerPaths {
    fn apply_path(&self, name: &str) -> Result<(), String> {
        let settings = self.settings(name)?;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for s in settings {
            state.pending.push((s.key.clone(), s.value.clone()));
        }
        debug!("route apply '{name}' ({} controls)", settings.len());
        Ok(())
    }

    fn reset_path(&self, name: &str) -> Result<(), String> {
        let settings = self.settings(name)?;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for s in settings {
            let value = self
                .defaults
                .get(&s.key)
                .or_else(|| self.defaults.get(&(s.key.0.clone(), None)))
                .cloned()
                .unwrap_or(CtlValue::Int(0));
            state.pending.push((s.key.clone(), value));
        }
        debug!("route reset '{name}' ({} controls)", settings.len());
        Ok(())
    }

    fn update_mixer(&self) -> Result<(), String> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let pending = std::mem::take(&mut state.pending);
        let mut first_err = None;
        for (key, value) in pending {
            if state.current.get(&key) == Some(&value) {
                continue;
            }
            match self.write(&key, &value) {
                Ok(()) => {
                    state.current.insert(key, value);
                }
                Err(e) => {
                    error!("route update of '{}' failed: {e}", key.0);
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn missing_controls(&self) -> bool {
        self.defaults
            .keys()
            .chain(self.paths.values().flatten().map(|s| &s.key))
            .any(|(name, _)| !self.mixer.has_control(name))
    }
}
