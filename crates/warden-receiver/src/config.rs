use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 8123;
pub const DEFAULT_RETENTION_DAYS: u32 = 5;

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub port: u16,
    pub token: String,
    pub dir: PathBuf,
    pub retention_days: u32,
}

impl ReceiverConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let token = get("WARDEN_RECEIVER_TOKEN")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("WARDEN_RECEIVER_TOKEN is required"))?;
        let dir = get("WARDEN_RECEIVER_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| anyhow::anyhow!("WARDEN_RECEIVER_DIR is required"))?;

        let port = match get("WARDEN_RECEIVER_PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("WARDEN_RECEIVER_PORT must be a port number, got {raw:?}"))?,
            None => DEFAULT_PORT,
        };
        let retention_days = match get("WARDEN_RECEIVER_RETENTION_DAYS") {
            Some(raw) => raw.trim().parse().map_err(|_| {
                anyhow::anyhow!("WARDEN_RECEIVER_RETENTION_DAYS must be a whole number, got {raw:?}")
            })?,
            None => DEFAULT_RETENTION_DAYS,
        };

        Ok(Self {
            port,
            token,
            dir,
            retention_days,
        })
    }
}
