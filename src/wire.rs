//! Wire-level frame shapes: the envelope used for automatically generated
//! pong and monitor frames.

use serde::Serialize;
use serde_json::{json, Value};

/// Snapshot returned by [`crate::session::Session::status`] and embedded
/// verbatim into monitor frames.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub connected: bool,
    pub started: bool,
    pub stopping: bool,
    pub retry_count: u32,
    pub max_retries_reached: bool,
    pub queue_size: usize,
    pub event_worker_alive: bool,
    pub send_worker_alive: bool,
}

/// Builds the pong frame sent in response to an application-level ping.
#[must_use]
pub fn pong_frame(host_identifier: &str) -> Vec<u8> {
    envelope(host_identifier, json!({ "operation": "pong" })).into_bytes()
}

/// Builds the monitor status frame sent alongside a pong, when
/// `monitor_identifier` is non-empty.
#[must_use]
pub fn monitor_frame(monitor_identifier: &str, client_identifier: &str, status: &SessionStatus) -> Vec<u8> {
    let data = json!({
        "status": status,
        "config": {
            "tipo_operacao": "monitor",
            "gpa_code": client_identifier,
        },
    });
    envelope(monitor_identifier, data).into_bytes()
}

fn envelope(receiver_id: &str, data: Value) -> String {
    json!({ "receiver_id": receiver_id, "data": data }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status() -> SessionStatus {
        SessionStatus {
            connected: true,
            started: true,
            stopping: false,
            retry_count: 0,
            max_retries_reached: false,
            queue_size: 0,
            event_worker_alive: true,
            send_worker_alive: true,
        }
    }

    #[test]
    fn pong_frame_shape() {
        let bytes = pong_frame("h-1");
        let v: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["receiver_id"], "h-1");
        assert_eq!(v["data"]["operation"], "pong");
    }

    #[test]
    fn monitor_frame_shape() {
        let bytes = monitor_frame("mon", "c-1", &status());
        let v: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["receiver_id"], "mon");
        assert_eq!(v["data"]["config"]["tipo_operacao"], "monitor");
        assert_eq!(v["data"]["config"]["gpa_code"], "c-1");
        assert_eq!(v["data"]["status"]["connected"], true);
    }
}
