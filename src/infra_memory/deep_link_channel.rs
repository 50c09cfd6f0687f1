use crate::domain_port::*;
use tokio::sync::broadcast;

const DEEP_LINK_CAP: usize = 16;

/// Deep links pushed in by the host process (URL handler, CLI argument).
pub struct DeepLinkChannel {
    initial: Option<String>,
    sender: broadcast::Sender<String>,
}

impl DeepLinkChannel {
    pub fn new(initial: Option<String>) -> Self {
        let (sender, _) = broadcast::channel(DEEP_LINK_CAP);
        DeepLinkChannel { initial, sender }
    }

    /// Delivers `url` to current listeners. Returns how many received it.
    pub fn push(&self, url: impl Into<String>) -> usize {
        self.sender.send(url.into()).unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl DeepLinkSource for DeepLinkChannel {
    async fn initial_url(&self) -> Option<String> {
        self.initial.clone()
    }

    fn subscribe(&self) -> Subscription<String> {
        Subscription::new("deep-link", self.sender.subscribe())
    }
}
