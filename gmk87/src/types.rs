use hidapi::HidError;

pub type Result<T> = std::result::Result<T, Gmk87Error>;

#[derive(thiserror::Error)]
pub enum Gmk87Error {
    #[error("failed to find device")]
    DeviceNotFound,
    #[error("report too short to decode ({_0} bytes)")]
    MalformedFrame(usize),
    #[error("payload exceeds 56 bytes ({_0})")]
    PayloadTooLarge(usize),
    #[error("no acknowledgment for command {_0:#04x}")]
    NoAcknowledgment(u8),
    #[error("device is unresponsive and could not be revived, reconnect it physically")]
    ReviveExhausted,
    #[error("{_0}")]
    Hid(#[from] HidError),
}

impl std::fmt::Debug for Gmk87Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}
