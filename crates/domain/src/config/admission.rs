use serde::{Deserialize, Serialize};

/// Per-client sliding-window limits for each operation class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// High-frequency, low-cost operations (chat turns).
    #[serde(default = "d_chat")]
    pub chat: WindowLimit,
    /// Low-frequency, high-cost operations (session init, which may build
    /// a live agent).
    #[serde(default = "d_connect")]
    pub connect: WindowLimit,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            chat: d_chat(),
            connect: d_connect(),
        }
    }
}

/// At most `limit` admitted requests within any `window_secs` span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowLimit {
    pub limit: u32,
    pub window_secs: u64,
}

fn d_chat() -> WindowLimit {
    WindowLimit {
        limit: 10,
        window_secs: 60,
    }
}

fn d_connect() -> WindowLimit {
    WindowLimit {
        limit: 5,
        window_secs: 300,
    }
}
