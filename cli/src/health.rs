use crate::api::Client;
use crate::types::HealthResponse;
use anyhow::Result;
use tracing::debug;

/// Process-wide connectivity signal. Advisory display only; it never gates
/// job submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Checking,
    Connected,
    Disconnected,
}

impl ConnectivityState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Checking => "checking",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

/// One liveness probe. Run once at startup and re-run on demand; there is
/// no background timer.
pub async fn check(client: &Client) -> ConnectivityState {
    let probe = client.health().await;
    match &probe {
        Ok(health) => debug!(
            "health probe: status={:?} model_loaded={:?} ffmpeg={:?}",
            health.status, health.model_loaded, health.ffmpeg
        ),
        Err(err) => debug!("health probe failed: {err}"),
    }
    classify(probe)
}

fn classify(probe: Result<HealthResponse>) -> ConnectivityState {
    match probe {
        Ok(health) if health.status.as_deref() == Some("online") => ConnectivityState::Connected,
        _ => ConnectivityState::Disconnected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn health(status: Option<&str>) -> HealthResponse {
        HealthResponse { status: status.map(str::to_string), model_loaded: None, ffmpeg: None }
    }

    #[test]
    fn only_an_online_status_counts_as_connected() {
        assert_eq!(classify(Ok(health(Some("online")))), ConnectivityState::Connected);
        assert_eq!(classify(Ok(health(Some("degraded")))), ConnectivityState::Disconnected);
        assert_eq!(classify(Ok(health(None))), ConnectivityState::Disconnected);
        assert_eq!(classify(Err(anyhow!("refused"))), ConnectivityState::Disconnected);
    }
}
