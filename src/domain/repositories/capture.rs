use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::domain::errors::UplinkError;

/// Platform screen/audio capture producing encoded binary frames.
#[async_trait]
pub trait Capturer {
    /// Acquires the capture devices and starts recording. Frames arrive on the
    /// returned channel, which closes after the last frame has been flushed.
    async fn start(&mut self) -> Result<mpsc::Receiver<Bytes>, UplinkError>;

    /// Stops the recorder; it still emits its last buffered frame.
    async fn stop(&mut self);

    /// Releases every capture device track.
    fn stop_tracks(&mut self);
}
