use tokio::sync::watch;

/// Process-wide connectivity signal.
///
/// There is no ambient "online" event source on a headless client, so the
/// signal is derived from observed request outcomes: transport failures flip
/// it offline, successful calls flip it back online. Consumers subscribe via
/// [`Connectivity::watch`] to react to regained connectivity.
pub struct Connectivity {
    tx: watch::Sender<bool>,
}

impl Connectivity {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _) = watch::channel(initially_online);
        Self { tx }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Update the signal; transitions are logged, repeats are silent and do
    /// not wake watchers.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            if online {
                tracing::info!("connectivity regained");
            } else {
                tracing::warn!("connectivity lost; attendance will queue locally");
            }
            *current = online;
            true
        });
    }

    pub fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
