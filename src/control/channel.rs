//! Channel pair connecting the policy engine and a UI.
//!
//! ```text
//! ┌────────────────┐                    ┌────────────────┐
//! │  PolicyEngine  │                    │       UI       │
//! │                │                    │                │
//! │  engine_tx ────┼──► ui_rx ──────────┼► (receives)    │
//! │                │                    │                │
//! │  (receives) ◄──┼─── engine_rx ◄─────┼── ui_tx        │
//! └────────────────┘                    └────────────────┘
//! ```

use tokio::sync::mpsc;

use super::protocol::{EngineToUi, UiToEngine};

/// Default channel buffer size.
pub const DEFAULT_CHANNEL_SIZE: usize = 64;

/// Engine side of the pair.
#[derive(Debug)]
pub struct EngineChannels {
    /// Sender for events to the UI.
    pub tx: mpsc::Sender<EngineToUi>,
    /// Receiver for commands from the UI.
    pub rx: mpsc::Receiver<UiToEngine>,
}

/// UI side of the pair.
#[derive(Debug)]
pub struct UiChannels {
    /// Receiver for events from the engine.
    pub rx: mpsc::Receiver<EngineToUi>,
    /// Sender for commands to the engine.
    pub tx: mpsc::Sender<UiToEngine>,
}

/// Create a connected pair of channel sets.
#[inline]
pub fn create_channel_pair() -> (EngineChannels, UiChannels) {
    create_channel_pair_with_size(DEFAULT_CHANNEL_SIZE)
}

/// Create a connected pair with a custom buffer size.
pub fn create_channel_pair_with_size(size: usize) -> (EngineChannels, UiChannels) {
    let (engine_tx, ui_rx) = mpsc::channel(size);
    let (ui_tx, engine_rx) = mpsc::channel(size);

    (
        EngineChannels {
            tx: engine_tx,
            rx: engine_rx,
        },
        UiChannels {
            rx: ui_rx,
            tx: ui_tx,
        },
    )
}

impl UiChannels {
    /// Send a command to the engine.
    ///
    /// Returns `Err(msg)` if the engine has stopped listening.
    pub async fn send(&self, msg: UiToEngine) -> Result<(), UiToEngine> {
        self.tx.send(msg).await.map_err(|e| e.0)
    }

    /// Receive the next engine event, or `None` once the engine is gone.
    pub async fn recv(&mut self) -> Option<EngineToUi> {
        self.rx.recv().await
    }

    /// Receive an engine event without waiting.
    pub fn try_recv(&mut self) -> Option<EngineToUi> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ui_to_engine_message() {
        let (mut engine, ui) = create_channel_pair();

        ui.send(UiToEngine::Forget {
            path: "C:\\Apps\\foo.exe".to_string(),
        })
        .await
        .unwrap();

        match engine.rx.recv().await.unwrap() {
            UiToEngine::Forget { path } => assert_eq!(path, "C:\\Apps\\foo.exe"),
            other => unreachable!("Expected Forget, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_engine_to_ui_message() {
        let (engine, mut ui) = create_channel_pair();
        assert!(ui.try_recv().is_none());

        engine.tx.send(EngineToUi::Shutdown).await.unwrap();
        assert!(matches!(ui.recv().await, Some(EngineToUi::Shutdown)));
    }

    #[tokio::test]
    async fn test_channel_drop_detection() {
        let (engine, ui) = create_channel_pair();
        drop(engine);

        let result = ui.send(UiToEngine::UiShutdown).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_custom_channel_size() {
        let (engine, _ui) = create_channel_pair_with_size(128);
        assert!(engine.tx.capacity() >= 128);
    }
}
