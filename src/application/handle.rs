use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptStatus {
    Claimed,
    Running { variant: String, percent: f64 },
    Succeeded { package_url: String },
    Failed { error: String },
}

impl AttemptStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }
}

/// Write side, owned by the orchestration task.
#[derive(Debug)]
pub struct AttemptReporter {
    tx: watch::Sender<AttemptStatus>,
}

impl AttemptReporter {
    pub fn report(&self, status: AttemptStatus) {
        self.tx.send_replace(status);
    }
}

/// Observer side of one attempt, with a single completion future.
#[derive(Debug, Clone)]
pub struct AttemptHandle {
    identity: Uuid,
    rx: watch::Receiver<AttemptStatus>,
}

impl AttemptHandle {
    pub fn identity(&self) -> Uuid {
        self.identity
    }

    pub fn status(&self) -> AttemptStatus {
        self.rx.borrow().clone()
    }

    /// Resolves with the terminal status.
    pub async fn wait(&self) -> AttemptStatus {
        let mut rx = self.rx.clone();
        let result = rx.wait_for(AttemptStatus::is_terminal).await.map(|status| (*status).clone());
        match result {
            Ok(status) => status,
            // Reporter dropped without finishing, e.g. the task panicked
            Err(_) => AttemptStatus::Failed {
                error: String::from("attempt ended without reporting an outcome"),
            },
        }
    }
}

pub fn attempt_channel(identity: Uuid) -> (AttemptReporter, AttemptHandle) {
    let (tx, rx) = watch::channel(AttemptStatus::Claimed);
    (AttemptReporter { tx }, AttemptHandle { identity, rx })
}
