use super::options::ProxyOptions;

pub const SKIP_LOOPBACK_ENV: &str = "ABOX_SKIP_LOOPBACK";
pub const DIRECT_RCVSPK_ENV: &str = "ABOX_DIRECT_RCVSPK";
pub const PROC_ASOUND_ENV: &str = "ABOX_PROC_ASOUND";

pub const DEFAULT_PROC_ASOUND: &str = "/proc/asound";

pub fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| flag_value(&v))
        .unwrap_or(false)
}

fn flag_value(v: &str) -> bool {
    let s = v.trim().to_ascii_lowercase();
    s == "1" || s == "true" || s == "yes" || s == "on"
}

pub fn proc_asound_root() -> String {
    std::env::var(PROC_ASOUND_ENV).unwrap_or_else(|_| DEFAULT_PROC_ASOUND.to_string())
}

pub fn apply_env_overrides(options: &mut ProxyOptions) {
    if env_flag(SKIP_LOOPBACK_ENV) {
        options.support_out_loopback = false;
        options.support_spkamp = false;
        options.support_btsco = false;
        options.support_bta2dp = false;
        options.support_usb_out_loopback = false;
        options.support_usb_in_loopback = false;
    }
    if env_flag(DIRECT_RCVSPK_ENV) {
        options.direct_rcvspk = true;
    }
}
