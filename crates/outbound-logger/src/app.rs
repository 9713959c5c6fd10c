use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::Recorder;

#[derive(Clone)]
pub struct AppState {
    pub recorder: Arc<Recorder>,
    pub shutdown: CancellationToken,
    pub max_payload_bytes: u64,
}
