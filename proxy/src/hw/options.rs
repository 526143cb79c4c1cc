#[derive(Debug, Clone, Copy)]
pub struct ProxyOptions {
    pub mixer_card: u32,
    pub support_out_loopback: bool,
    pub support_spkamp: bool,
    pub support_btsco: bool,
    pub support_bta2dp: bool,
    pub support_usb_out_loopback: bool,
    pub support_usb_in_loopback: bool,
    pub support_dualspk: bool,
    pub support_quad_mic: bool,
    pub direct_rcvspk: bool,
    pub usb_single_clksrc: bool,
    pub a2dp_cal_latency_ms: u32,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            mixer_card: 0,
            support_out_loopback: true,
            support_spkamp: false,
            support_btsco: true,
            support_bta2dp: true,
            support_usb_out_loopback: true,
            support_usb_in_loopback: true,
            support_dualspk: false,
            support_quad_mic: false,
            direct_rcvspk: false,
            usb_single_clksrc: false,
            a2dp_cal_latency_ms: 0,
        }
    }
}
