//! Pure connection configuration for the MQTT transport
//!
//! Maps [`SessionParams`] onto rumqttc options without touching the network.

use crate::transport::{Qos, SessionParams, TransportError};
use rumqttc::{LastWill, MqttOptions, QoS, Transport as RumqttcTransport};

/// Capacity of the request channel between `AsyncClient` and `EventLoop`
pub const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Connection state reported by the event-loop supervisor
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Waiting for the first ConnAck
    Connecting,
    /// Broker acknowledged the session
    Connected,
    /// Connection dropped, the event loop will reconnect
    Reconnecting(String),
    /// Supervisor stopped
    Stopped,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

pub fn to_mqtt_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// Pure function to build MQTT options for one session
pub fn configure_mqtt_options(params: &SessionParams) -> Result<MqttOptions, TransportError> {
    if params.host.is_empty() {
        return Err(TransportError::InvalidParams("empty broker host".to_string()));
    }
    if params.client_id.is_empty() {
        return Err(TransportError::InvalidParams("empty client id".to_string()));
    }
    if !params.keep_alive.is_zero() && params.keep_alive.as_secs() < 1 {
        return Err(TransportError::InvalidParams(
            "keep-alive must be at least one second".to_string(),
        ));
    }

    let mut options = MqttOptions::new(params.client_id.clone(), params.host.clone(), params.port);
    options.set_keep_alive(params.keep_alive);
    options.set_credentials(params.username.clone(), params.password.clone());
    options.set_clean_session(true);

    if params.secure {
        options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(will) = &params.will {
        options.set_last_will(LastWill::new(
            will.topic.clone(),
            will.payload.to_vec(),
            to_mqtt_qos(will.qos),
            will.retain,
        ));
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::WillMessage;
    use bytes::Bytes;
    use std::time::Duration;

    fn params() -> SessionParams {
        SessionParams {
            host: "gb.netpie.io".to_string(),
            port: 1883,
            secure: false,
            client_id: "accesstoken".to_string(),
            username: "devkey%1700000000".to_string(),
            password: "signed".to_string(),
            keep_alive: Duration::from_secs(10),
            retry_interval: Duration::from_secs(1),
            will: None,
            refresh: None,
        }
    }

    #[test]
    fn test_configure_mqtt_options() {
        let options = configure_mqtt_options(&params()).unwrap();
        assert_eq!(options.client_id(), "accesstoken");
        assert_eq!(options.broker_address(), ("gb.netpie.io".to_string(), 1883));
        assert_eq!(options.keep_alive(), Duration::from_secs(10));
        assert_eq!(
            options.credentials(),
            Some(("devkey%1700000000".to_string(), "signed".to_string()))
        );
        assert!(options.last_will().is_none());
    }

    #[test]
    fn test_last_will_is_registered() {
        let mut params = params();
        params.will = Some(WillMessage {
            topic: "/demo/status".to_string(),
            payload: Bytes::from_static(b"offline"),
            qos: Qos::AtLeastOnce,
            retain: true,
        });

        let options = configure_mqtt_options(&params).unwrap();
        let will = options.last_will().unwrap();
        assert_eq!(will.topic, "/demo/status");
        assert_eq!(&will.message[..], b"offline");
        assert!(will.retain);
    }

    #[test]
    fn test_rejects_missing_host_and_client_id() {
        let mut no_host = params();
        no_host.host.clear();
        assert!(matches!(
            configure_mqtt_options(&no_host),
            Err(TransportError::InvalidParams(_))
        ));

        let mut no_id = params();
        no_id.client_id.clear();
        assert!(configure_mqtt_options(&no_id).is_err());
    }

    #[test]
    fn test_rejects_sub_second_keep_alive() {
        let mut params = params();
        params.keep_alive = Duration::from_millis(500);
        assert!(configure_mqtt_options(&params).is_err());
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(to_mqtt_qos(Qos::AtMostOnce), QoS::AtMostOnce);
        assert_eq!(to_mqtt_qos(Qos::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(to_mqtt_qos(Qos::ExactlyOnce), QoS::ExactlyOnce);
    }
}
