//! MQTT ingest adapter
//!
//! Subscribes to the Ferroamp `ehub` topic, decodes each message into
//! samples and pushes them onto the bounded ingest queue. Undecodable
//! messages are logged and dropped; broker errors are logged and the event
//! loop is polled again after [`MqttConfig::reconnect_delay`], which makes
//! `rumqttc` reconnect.

use chrono::Utc;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MqttConfig;
use crate::error::SunspecResult;
use crate::ferroamp::decode_ehub_entries;
use crate::telemetry::Sample;

/// Capacity of the rumqttc request channel
const REQUEST_CAPACITY: usize = 16;

/// Listener for Ferroamp ExtAPI `ehub` messages.
#[derive(Debug, Clone)]
pub struct EhubListener {
    config: MqttConfig,
}

impl EhubListener {
    pub fn new(config: MqttConfig) -> Self {
        Self { config }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(self.config.keep_alive);
        options.set_clean_session(true);
        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            options.set_credentials(username, password);
        }
        options
    }

    /// Poll the broker until `shutdown` or until the ingest queue closes.
    pub async fn run(self, samples: mpsc::Sender<Sample>, shutdown: CancellationToken) -> SunspecResult<()> {
        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);
        info!(
            "Connecting to MQTT broker {}:{} for topic {}",
            self.config.host, self.config.port, self.config.topic
        );

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("MQTT connected, subscribing to {}", self.config.topic);
                    if let Err(e) = client.try_subscribe(self.config.topic.as_str(), QoS::AtMostOnce) {
                        warn!("Failed to subscribe to {}: {}", self.config.topic, e);
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    if publish.topic != self.config.topic {
                        debug!("Ignoring message on {}", publish.topic);
                        continue;
                    }
                    if forward_payload(&publish.payload, &samples).await.is_err() {
                        info!("Ingest queue closed, MQTT listener stopping");
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        "MQTT connection error: {}; retrying in {:?}",
                        e, self.config.reconnect_delay
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                    }
                }
            }
        }

        if let Err(e) = client.try_disconnect() {
            debug!("MQTT disconnect failed: {}", e);
        }
        info!("MQTT listener stopped");
        Ok(())
    }
}

/// Decode one payload and queue its samples.
///
/// Returns the number of samples queued; a payload that does not decode
/// queues nothing, and entries with bad readings are left out. Fails only
/// when the queue's receiver is gone.
pub async fn forward_payload(
    payload: &[u8],
    samples: &mpsc::Sender<Sample>,
) -> Result<usize, mpsc::error::SendError<Sample>> {
    let decoded = match decode_ehub_entries(payload, Utc::now()) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!("Skipping ehub message: {}", e);
            return Ok(0);
        }
    };

    let count = decoded.samples.len();
    for sample in decoded.samples {
        samples.send(sample).await?;
    }
    debug!(
        "Queued {} samples, {} entries rejected",
        count,
        decoded.rejected.len()
    );
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::TelemetryKey;

    #[tokio::test]
    async fn test_forward_payload_queues_samples() {
        let (tx, mut rx) = mpsc::channel(8);
        let queued = forward_payload(br#"{"gridfreq": {"val": "50.01"}, "ppv": {"val": "900"}}"#, &tx)
            .await
            .unwrap();

        assert_eq!(queued, 2);
        assert_eq!(rx.recv().await.unwrap().key, TelemetryKey::Hz);
        assert_eq!(rx.recv().await.unwrap().key, TelemetryKey::DCW);
    }

    #[tokio::test]
    async fn test_forward_payload_skips_garbage() {
        let (tx, mut rx) = mpsc::channel(8);
        assert_eq!(forward_payload(b"{not json", &tx).await.unwrap(), 0);
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_forward_payload_keeps_good_entries() {
        let (tx, mut rx) = mpsc::channel(8);
        let queued = forward_payload(br#"{"ppv": {"val": "900"}, "pbat": {"val": "n/a"}}"#, &tx)
            .await
            .unwrap();

        assert_eq!(queued, 1);
        assert_eq!(rx.recv().await.unwrap().key, TelemetryKey::DCW);
    }

    #[tokio::test]
    async fn test_forward_payload_reports_closed_queue() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        assert!(forward_payload(br#"{"ppv": {"val": "1"}}"#, &tx).await.is_err());
    }

    #[test]
    fn test_options_carry_credentials() {
        let listener = EhubListener::new(MqttConfig::new("broker").with_credentials("user", "pw"));
        let options = listener.options();
        assert_eq!(options.broker_address(), ("broker".to_string(), 1883));
        assert_eq!(options.credentials(), Some(("user".to_string(), "pw".to_string())));
    }
}
