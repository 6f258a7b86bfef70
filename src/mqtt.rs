use crate::config::{BrokerProtocol, BrokerSettings};
use crate::error::Result;
use crate::transport::{InboundMessage, LastWill, Transport, TransportEvent};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

const MAX_BACKOFF: Duration = Duration::from_secs(60);
const REQUEST_CAPACITY: usize = 64;

/// Broker connection over MQTT
///
/// Requests are queued with `rumqttc`'s non-blocking `try_*` calls; a
/// background task drives the event loop, turns broker traffic into
/// [`TransportEvent`]s and reconnects with exponential backoff whenever the
/// connection drops.
pub struct MqttTransport {
    client: AsyncClient,
    stop_tx: watch::Sender<bool>,
}

impl MqttTransport {
    /// Start connecting to the broker with `will` registered as the last will
    ///
    /// Must be called from within a tokio runtime. The returned receiver
    /// yields `Connected` once the broker acknowledges the connection, and
    /// again after every reconnect.
    pub fn connect(
        settings: &BrokerSettings,
        client_id: &str,
        will: &LastWill,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let options = mqtt_options(settings, client_id, will);
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        tracing::info!(
            "Connecting to {}:{} as {}",
            settings.host,
            settings.port,
            client_id
        );
        tokio::spawn(run_event_loop(eventloop, events_tx, stop_rx));

        (Self { client, stop_tx }, events_rx)
    }
}

impl Transport for MqttTransport {
    fn subscribe(&self, topic: &str) -> Result<()> {
        self.client.try_subscribe(topic, QoS::AtLeastOnce)?;
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.client.try_unsubscribe(topic)?;
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()> {
        self.client.try_publish(topic, QoS::AtLeastOnce, retain, payload)?;
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.stop_tx.send_replace(true);
        self.client.try_disconnect()?;
        Ok(())
    }
}

fn mqtt_options(settings: &BrokerSettings, client_id: &str, will: &LastWill) -> MqttOptions {
    let mut options = match settings.protocol {
        BrokerProtocol::Tcp => MqttOptions::new(client_id, settings.host.as_str(), settings.port),
        BrokerProtocol::Ws => {
            let url = format!("ws://{}:{}{}", settings.host, settings.port, settings.ws_path);
            let mut options = MqttOptions::new(client_id, url, settings.port);
            options.set_transport(rumqttc::Transport::Ws);
            options
        }
    };

    options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs));
    options.set_clean_session(settings.clean_session);
    if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
        options.set_credentials(username.as_str(), password.as_str());
    }
    options.set_last_will(rumqttc::LastWill::new(
        will.topic.as_str(),
        will.payload.clone(),
        QoS::AtLeastOnce,
        will.retain,
    ));
    options
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut backoff = Duration::from_secs(0);

    loop {
        let forwarded = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                backoff = Duration::from_secs(0);
                events.send(TransportEvent::Connected)
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => events.send(TransportEvent::Message(
                InboundMessage::new(publish.topic, publish.payload),
            )),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::info!("MQTT connection closed by client");
                let _ = events.send(TransportEvent::Disconnected("client disconnected".to_string()));
                break;
            }
            Ok(_) => Ok(()),
            Err(e) => {
                if *stop_rx.borrow() {
                    tracing::info!("MQTT event loop stopped");
                    break;
                }

                tracing::error!("MQTT connection error: {}", e);
                let forwarded = events.send(TransportEvent::Disconnected(e.to_string()));

                // Exponential backoff: 1s, 2s, 4s, 8s, 16s, 32s, 60s (max)
                if backoff == Duration::from_secs(0) {
                    backoff = Duration::from_secs(1);
                } else {
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                tracing::info!("Reconnecting to broker in {:?}", backoff);

                tokio::select! {
                    _ = stop_rx.wait_for(|stopped| *stopped) => {
                        tracing::info!("MQTT event loop stopped");
                        break;
                    }
                    _ = sleep(backoff) => {}
                }
                forwarded
            }
        };

        if forwarded.is_err() {
            tracing::debug!("Transport event receiver dropped, stopping event loop");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn will() -> LastWill {
        LastWill {
            topic: "state/local/d/availability".into(),
            payload: b"offline".to_vec(),
            retain: true,
        }
    }

    #[test]
    fn options_carry_connection_parameters() {
        let settings = BrokerSettings {
            keep_alive_secs: 15,
            clean_session: false,
            ..BrokerSettings::default()
        };
        let options = mqtt_options(&settings, "kiosk-1", &will());

        assert_eq!(options.client_id(), "kiosk-1");
        assert_eq!(options.keep_alive(), Duration::from_secs(15));
        assert!(!options.clean_session());
        assert_eq!(options.broker_address(), (settings.host.clone(), settings.port));
    }

    #[test]
    fn options_register_retained_last_will() {
        let options = mqtt_options(&BrokerSettings::default(), "kiosk-1", &will());
        let last_will = options.last_will().unwrap();

        assert_eq!(last_will.topic, "state/local/d/availability");
        assert_eq!(last_will.message, &b"offline"[..]);
        assert!(last_will.retain);
    }
}
