//! Messages from client handles to the actor

use crate::error::GearResult;
use crate::transport::{PublishOptions, WillMessage};
use bytes::Bytes;
use std::path::PathBuf;
use tokio::sync::oneshot;

/// Options applied by [`super::GearClient::connect_with`]
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Last-will message; its topic is public and gets namespaced on connect
    pub will: Option<WillMessage>,
}

impl ConnectOptions {
    pub fn with_will(mut self, will: WillMessage) -> Self {
        self.will = Some(will);
        self
    }
}

pub(crate) type Reply<T> = oneshot::Sender<T>;

#[derive(Debug)]
pub(crate) enum Command {
    Connect {
        appid: String,
        options: ConnectOptions,
        reply: Reply<GearResult<()>>,
    },
    Disconnect {
        reply: Reply<()>,
    },
    Publish {
        topic: String,
        payload: Bytes,
        options: PublishOptions,
        reply: Reply<GearResult<()>>,
    },
    Subscribe {
        topic: String,
        reply: Reply<bool>,
    },
    Unsubscribe {
        topic: String,
        reply: Reply<GearResult<()>>,
    },
    SetAlias {
        alias: String,
        reply: Reply<GearResult<()>>,
    },
    SetName {
        name: String,
        reply: Reply<bool>,
    },
    UnsetName {
        reply: Reply<()>,
    },
    ResetToken {
        reply: Reply<GearResult<()>>,
    },
    SetCachePath {
        path: PathBuf,
        reply: Reply<()>,
    },
    EnablePresence {
        reply: Reply<()>,
    },
    EnableAbsence {
        reply: Reply<()>,
    },
}
