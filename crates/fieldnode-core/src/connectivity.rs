use std::net::IpAddr;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Link {
    pub connected: bool,
    pub address: Option<IpAddr>,
}

#[derive(Debug)]
pub struct Connectivity {
    tx: watch::Sender<Link>,
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new()
    }
}

impl Connectivity {
    pub fn new() -> Self {
        Self {
            tx: watch::channel(Link::default()).0,
        }
    }

    pub fn set(&self, link: Link) -> bool {
        let previous = self.tx.send_replace(link);
        !previous.connected && link.connected
    }

    pub fn is_connected(&self) -> bool {
        self.tx.borrow().connected
    }

    pub fn address(&self) -> Option<IpAddr> {
        self.tx.borrow().address
    }

    pub async fn wait_connected(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|link| link.connected).await;
    }
}
