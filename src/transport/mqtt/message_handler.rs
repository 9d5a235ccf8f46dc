//! Pure routing of rumqttc event-loop results
//!
//! The supervisor in [`super::client`] polls the event loop and acts on the
//! decision returned here; nothing in this module performs I/O.

use crate::transport::{AuthFailure, TransportEvent};
use rumqttc::{ConnectReturnCode, ConnectionError, Event, Outgoing, Packet};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route a successfully polled event
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => match Self::classify_return_code(connack.code) {
                    Some(failure) => EventRoute::Refused(failure),
                    None if connack.code == ConnectReturnCode::Success => {
                        EventRoute::ConnectionAcknowledged
                    }
                    None => EventRoute::NetworkError(format!("{:?}", connack.code)),
                },
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                },
                Packet::Disconnect => EventRoute::Disconnected,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Route an event-loop error
    pub fn route_connection_error(error: &ConnectionError) -> EventRoute {
        match error {
            ConnectionError::ConnectionRefused(code) => match Self::classify_return_code(*code) {
                Some(failure) => EventRoute::Refused(failure),
                None => EventRoute::NetworkError(format!("connection refused: {code:?}")),
            },
            ConnectionError::RequestsDone => EventRoute::RequestsDone,
            other => EventRoute::NetworkError(other.to_string()),
        }
    }

    /// Authentication refusals; other return codes are treated as transient
    pub fn classify_return_code(code: ConnectReturnCode) -> Option<AuthFailure> {
        match code {
            ConnectReturnCode::BadUserNamePassword => Some(AuthFailure::BadCredentials),
            ConnectReturnCode::NotAuthorized => Some(AuthFailure::NotAuthorized),
            _ => None,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on a subscribed topic
    MessageReceived { topic: String, payload: bytes::Bytes },
    /// Broker refused our credentials
    Refused(AuthFailure),
    /// Broker sent DISCONNECT
    Disconnected,
    /// Our own DISCONNECT went out
    DisconnectSent,
    /// Connection lost; the next poll reconnects
    NetworkError(String),
    /// Every client handle is gone
    RequestsDone,
    /// Infrastructure event (PingResp, SubAck, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

impl EventRoute {
    /// Event to surface to the session, if any
    pub fn transport_event(&self) -> Option<TransportEvent> {
        match self {
            EventRoute::ConnectionAcknowledged => Some(TransportEvent::Connected),
            EventRoute::MessageReceived { topic, payload } => Some(TransportEvent::Message {
                topic: topic.clone(),
                payload: payload.clone(),
            }),
            EventRoute::Refused(failure) => Some(TransportEvent::AuthRejected(*failure)),
            EventRoute::Disconnected | EventRoute::NetworkError(_) => {
                Some(TransportEvent::Closed)
            }
            EventRoute::DisconnectSent | EventRoute::RequestsDone => Some(TransportEvent::Ended),
            EventRoute::InfrastructureEvent(_) | EventRoute::OutgoingEvent => None,
        }
    }

    /// Whether the supervisor must stop after this route
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventRoute::Refused(_) | EventRoute::DisconnectSent | EventRoute::RequestsDone
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::{ConnAck, Publish, QoS};

    #[test]
    fn test_route_connack() {
        let ok = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&ok),
            EventRoute::ConnectionAcknowledged
        );

        let refused = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::NotAuthorized,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&refused),
            EventRoute::Refused(AuthFailure::NotAuthorized)
        );
    }

    #[test]
    fn test_route_publish() {
        let publish = Event::Incoming(Packet::Publish(Publish::new(
            "/demo/room/temp",
            QoS::AtMostOnce,
            "21.5",
        )));

        let route = MessageHandler::route_mqtt_event(&publish);
        assert_eq!(
            route.transport_event(),
            Some(TransportEvent::Message {
                topic: "/demo/room/temp".to_string(),
                payload: Bytes::from_static(b"21.5"),
            })
        );
        assert!(!route.is_terminal());
    }

    #[test]
    fn test_route_connection_refused_codes() {
        let bad = ConnectionError::ConnectionRefused(ConnectReturnCode::BadUserNamePassword);
        let route = MessageHandler::route_connection_error(&bad);
        assert_eq!(route, EventRoute::Refused(AuthFailure::BadCredentials));
        assert!(route.is_terminal());

        let unavailable = ConnectionError::ConnectionRefused(ConnectReturnCode::ServiceUnavailable);
        let route = MessageHandler::route_connection_error(&unavailable);
        assert!(matches!(route, EventRoute::NetworkError(_)));
        assert_eq!(route.transport_event(), Some(TransportEvent::Closed));
        assert!(!route.is_terminal());
    }

    #[test]
    fn test_requests_done_ends_session() {
        let route = MessageHandler::route_connection_error(&ConnectionError::RequestsDone);
        assert_eq!(route.transport_event(), Some(TransportEvent::Ended));
        assert!(route.is_terminal());
    }

    #[test]
    fn test_outgoing_disconnect_ends_session() {
        let route = MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Disconnect));
        assert_eq!(route, EventRoute::DisconnectSent);
        assert_eq!(route.transport_event(), Some(TransportEvent::Ended));

        let ping = MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::PingReq));
        assert_eq!(ping.transport_event(), None);
    }
}
