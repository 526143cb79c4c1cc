use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProxyError {
    NoDevice,
    NoData,
    NotSupported,
    Invalid(String),
    Io(String),
}

impl ProxyError {
    /// Negative POSIX code for hosts that still speak the C sentinel convention.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn errno(&self) -> i32 {
        use nix::errno::Errno;
        let code = match self {
            Self::NoDevice => Errno::ENODEV,
            Self::NoData => Errno::ENODATA,
            Self::NotSupported => Errno::ENOSYS,
            Self::Invalid(_) => Errno::EINVAL,
            Self::Io(_) => Errno::EIO,
        };
        -(code as i32)
    }

    /// Linux values for targets whose errno table lacks ENODATA.
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub fn errno(&self) -> i32 {
        match self {
            Self::NoDevice => -19,
            Self::NoData => -61,
            Self::NotSupported => -38,
            Self::Invalid(_) => -22,
            Self::Io(_) => -5,
        }
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDevice => write!(f, "no such device"),
            Self::NoData => write!(f, "no data available"),
            Self::NotSupported => write!(f, "operation not supported"),
            Self::Invalid(msg) => write!(f, "invalid argument: {msg}"),
            Self::Io(msg) => write!(f, "i/o error: {msg}"),
        }
    }
}

impl std::error::Error for ProxyError {}

impl From<String> for ProxyError {
    fn from(msg: String) -> Self {
        Self::Io(msg)
    }
}

#[cfg(all(test, any(target_os = "linux", target_os = "android")))]
mod tests {
    use super::*;
    use nix::errno::Errno;

    #[test]
    fn errno_is_the_negated_posix_code() {
        assert_eq!(ProxyError::NoDevice.errno(), -(Errno::ENODEV as i32));
        assert_eq!(ProxyError::NoData.errno(), -(Errno::ENODATA as i32));
        assert_eq!(ProxyError::NotSupported.errno(), -(Errno::ENOSYS as i32));
        assert_eq!(ProxyError::Invalid("rate".into()).errno(), -(Errno::EINVAL as i32));
        assert_eq!(ProxyError::Io("xrun".into()).errno(), -(Errno::EIO as i32));
        assert!(ProxyError::NoData.errno() < 0);
    }
}
