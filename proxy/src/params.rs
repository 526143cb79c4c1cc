//! `key=value;key=value` parameter strings exchanged with the audio framework.

use std::fmt;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StrParms {
    pairs: Vec<(String, String)>,
}

impl StrParms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty segments are skipped; a key without `=` carries an empty value.
    pub fn parse(text: &str) -> Self {
        let pairs = text
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| match s.split_once('=') {
                Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
                None => (s.to_string(), String::new()),
            })
            .collect();
        Self { pairs }
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Accepts decimal and `0x` prefixed hexadecimal values.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        let value = self.get_str(key)?;
        match value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
        {
            Some(hex) => i64::from_str_radix(hex, 16).ok(),
            None => value.parse().ok(),
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get_str(key)? {
            "true" | "on" | "1" => Some(true),
            "false" | "off" | "0" => Some(false),
            _ => None,
        }
    }

    pub fn add_str(&mut self, key: &str, value: &str) {
        match self.pairs.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.pairs.push((key.to_string(), value.to_string())),
        }
    }

    pub fn add_int(&mut self, key: &str, value: i64) {
        self.add_str(key, &value.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl fmt::Display for StrParms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.pairs.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

pub mod keys {
    pub const DEVICE_CONNECT: &str = "connect";
    pub const DEVICE_DISCONNECT: &str = "disconnect";
    pub const DEVICE_CARD: &str = "card";
    pub const DEVICE_DEVICE: &str = "device";
    pub const STREAM_SUP_FORMATS: &str = "sup_formats";
    pub const STREAM_SUP_CHANNELS: &str = "sup_channels";
    pub const STREAM_SUP_SAMPLING_RATES: &str = "sup_sampling_rates";
    pub const OFFLOAD_CODEC_DELAY: &str = "delay_samples";
    pub const OFFLOAD_CODEC_PADDING: &str = "padding_samples";
    pub const A2DP_SUSPENDED: &str = "A2dpSuspended";
    pub const BT_OFFLOAD_ENABLE: &str = "bt_offload_enable";
    pub const A2DP_DELAY_REPORT: &str = "A2dpDelayReport";
    pub const A2DP_RECONFIG: &str = "reconfigA2dp";
    pub const A2DP_FORMAT: &str = "format";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_pairs() {
        let parms = StrParms::parse("connect=0x4000;card=1; device=0 ;flag");
        assert_eq!(parms.get_int("connect"), Some(0x4000));
        assert_eq!(parms.get_int("card"), Some(1));
        assert_eq!(parms.get_int("device"), Some(0));
        assert!(parms.has_key("flag"));
        assert_eq!(parms.get_str("flag"), Some(""));
        assert_eq!(parms.get_int("missing"), None);
    }

    #[test]
    fn reply_keeps_insertion_order() {
        let mut reply = StrParms::new();
        reply.add_str("sup_formats", "AUDIO_FORMAT_PCM_16_BIT");
        reply.add_int("card", 2);
        reply.add_int("card", 3);
        assert_eq!(reply.to_string(), "sup_formats=AUDIO_FORMAT_PCM_16_BIT;card=3");
    }
}
