//! Single-use render session backed by a dedicated worker thread.
//!
//! The worker thread owns the (blocking, possibly `!Send`) [`Renderer`] and
//! executes commands sent from async tasks. Teardown happens on the worker
//! exactly once, when its command loop ends: either on an explicit
//! [`RenderSession::close`] or because the handle was dropped.

use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::oneshot;

use crate::{DeviceProfile, Error, Launcher, RawRaster, Renderer, Result, Source, TeardownError};

enum Command {
    Load(Source, oneshot::Sender<Result<()>>),
    Capture(oneshot::Sender<Result<RawRaster>>),
    Close(oneshot::Sender<()>),
}

/// Lifecycle of a [`RenderSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Launched,
    ContentLoaded,
    Captured,
    Failed,
    Closed,
}

/// One renderer process + isolated context + page, owned by one capture.
pub struct RenderSession {
    cmd_tx: Option<Sender<Command>>,
    state: SessionState,
}

impl RenderSession {
    /// Launch a fresh renderer seeded with `profile`.
    pub async fn open(launcher: Arc<dyn Launcher>, profile: DeviceProfile) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx) = oneshot::channel::<Result<()>>();

        thread::Builder::new()
            .name("pagesnap-renderer".into())
            .spawn(move || {
                let mut renderer = match launcher.launch(&profile) {
                    Ok(r) => r,
                    Err(err) => {
                        let _ = init_tx.send(Err(err));
                        return;
                    }
                };

                // If the opener went away meanwhile, the loop below ends at once.
                let _ = init_tx.send(Ok(()));

                let mut close_reply = None;
                while let Ok(cmd) = cmd_rx.recv() {
                    match cmd {
                        Command::Load(source, resp) => {
                            let _ = resp.send(renderer.load(&source));
                        }
                        Command::Capture(resp) => {
                            let _ = resp.send(renderer.capture());
                        }
                        Command::Close(resp) => {
                            close_reply = Some(resp);
                            break;
                        }
                    }
                }

                teardown(renderer.as_mut());
                drop(renderer);
                match close_reply {
                    Some(resp) => {
                        let _ = resp.send(());
                    }
                    None => info!("Renderer of a dropped session torn down"),
                }
            })
            .map_err(|e| Error::RenderLaunch(format!("Failed to spawn renderer thread: {}", e)))?;

        init_rx
            .await
            .map_err(|_| Error::RenderLaunch("Renderer thread exited during launch".into()))??;

        debug!("Render session launched");
        Ok(Self {
            cmd_tx: Some(cmd_tx),
            state: SessionState::Launched,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Navigate to the URL, or set the markup as page content.
    pub async fn load(&mut self, source: &Source) -> Result<()> {
        self.expect(SessionState::Launched, "load", Error::Navigation)?;
        let rx = self.dispatch(|tx| Command::Load(source.clone(), tx), Error::Navigation)?;
        let res = Self::reply(rx, Error::Navigation).await;
        self.advance(&res, SessionState::ContentLoaded);
        res
    }

    /// Wait `secs` seconds before capturing; 0 returns immediately.
    pub async fn settle(&mut self, secs: u64) -> Result<()> {
        self.expect(SessionState::ContentLoaded, "settle", Error::Capture)?;
        if secs > 0 {
            debug!("Settling for {}s", secs);
            tokio::time::sleep(Duration::from_secs(secs)).await;
        }
        Ok(())
    }

    /// Take a full-page raster of the loaded content.
    pub async fn capture(&mut self) -> Result<RawRaster> {
        self.expect(SessionState::ContentLoaded, "capture", Error::Capture)?;
        let rx = self.dispatch(Command::Capture, Error::Capture)?;
        let res = Self::reply(rx, Error::Capture).await;
        self.advance(&res, SessionState::Captured);
        res
    }

    /// Tear down context then process. Idempotent and infallible; teardown
    /// problems are logged on the worker thread.
    pub async fn close(&mut self) {
        let Some(tx) = self.cmd_tx.take() else {
            return;
        };
        let (resp_tx, resp_rx) = oneshot::channel();
        if tx.send(Command::Close(resp_tx)).is_ok() {
            let _ = resp_rx.await;
        }
        self.state = SessionState::Closed;
        debug!("Render session closed");
    }

    fn expect(&mut self, want: SessionState, op: &str, kind: fn(String) -> Error) -> Result<()> {
        if self.state == want {
            return Ok(());
        }
        let msg = format!("cannot {} a session in state {:?}", op, self.state);
        if self.state != SessionState::Closed {
            self.state = SessionState::Failed;
        }
        Err(kind(msg))
    }

    fn dispatch<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
        kind: fn(String) -> Error,
    ) -> Result<oneshot::Receiver<Result<T>>> {
        let tx = self
            .cmd_tx
            .as_ref()
            .ok_or_else(|| kind("session is closed".into()))?;
        let (resp_tx, resp_rx) = oneshot::channel();
        tx.send(make(resp_tx))
            .map_err(|_| kind("renderer thread is gone".into()))?;
        Ok(resp_rx)
    }

    async fn reply<T>(rx: oneshot::Receiver<Result<T>>, kind: fn(String) -> Error) -> Result<T> {
        rx.await.map_err(|_| kind("renderer thread is gone".into()))?
    }

    fn advance<T>(&mut self, res: &Result<T>, next: SessionState) {
        self.state = if res.is_ok() { next } else { SessionState::Failed };
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        // Hanging up the channel makes the worker tear the renderer down.
        if self.cmd_tx.take().is_some() {
            debug!("Render session dropped without close; tearing down");
        }
    }
}

fn teardown(renderer: &mut dyn Renderer) {
    match renderer.close_context() {
        Ok(()) => debug!("Browsing context closed"),
        Err(TeardownError::AlreadyClosed) => debug!("Browsing context already closed"),
        Err(TeardownError::Other(msg)) => warn!("Failed to close browsing context: {}", msg),
    }
    match renderer.close_process() {
        Ok(()) => debug!("Renderer process closed"),
        Err(TeardownError::AlreadyClosed) => debug!("Renderer process already closed"),
        Err(TeardownError::Other(msg)) => warn!("Failed to close renderer process: {}", msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        context_closes: AtomicUsize,
        process_closes: AtomicUsize,
    }

    struct StubRenderer {
        counters: Arc<Counters>,
        fail_load: bool,
    }

    impl Renderer for StubRenderer {
        fn load(&mut self, _source: &Source) -> Result<()> {
            if self.fail_load {
                Err(Error::Navigation("net::ERR_CONNECTION_REFUSED".into()))
            } else {
                Ok(())
            }
        }

        fn capture(&mut self) -> Result<RawRaster> {
            Ok(RawRaster::new(b"raster".to_vec()))
        }

        fn close_context(&mut self) -> std::result::Result<(), TeardownError> {
            self.counters.context_closes.fetch_add(1, Ordering::SeqCst);
            Err(TeardownError::AlreadyClosed)
        }

        fn close_process(&mut self) -> std::result::Result<(), TeardownError> {
            self.counters.process_closes.fetch_add(1, Ordering::SeqCst);
            Err(TeardownError::Other("boom".into()))
        }
    }

    struct StubLauncher {
        counters: Arc<Counters>,
        fail_load: bool,
    }

    impl Launcher for StubLauncher {
        fn launch(&self, _profile: &DeviceProfile) -> Result<Box<dyn Renderer>> {
            Ok(Box::new(StubRenderer {
                counters: self.counters.clone(),
                fail_load: self.fail_load,
            }))
        }
    }

    fn launcher(fail_load: bool) -> (Arc<dyn Launcher>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let launcher = Arc::new(StubLauncher {
            counters: counters.clone(),
            fail_load,
        });
        (launcher, counters)
    }

    #[tokio::test]
    async fn walks_the_happy_path() {
        let (launcher, counters) = launcher(false);
        let mut session = RenderSession::open(launcher, DeviceProfile::default()).await.unwrap();
        assert_eq!(session.state(), SessionState::Launched);

        session.load(&Source::Markup("<p/>".into())).await.unwrap();
        assert_eq!(session.state(), SessionState::ContentLoaded);

        session.settle(0).await.unwrap();
        let raster = session.capture().await.unwrap();
        assert_eq!(raster.as_bytes(), b"raster");
        assert_eq!(session.state(), SessionState::Captured);

        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(counters.context_closes.load(Ordering::SeqCst), 1);
        assert_eq!(counters.process_closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (launcher, counters) = launcher(false);
        let mut session = RenderSession::open(launcher, DeviceProfile::default()).await.unwrap();
        session.close().await;
        session.close().await;
        drop(session);
        assert_eq!(counters.context_closes.load(Ordering::SeqCst), 1);
        assert_eq!(counters.process_closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_load_poisons_the_session() {
        let (launcher, _) = launcher(true);
        let mut session = RenderSession::open(launcher, DeviceProfile::default()).await.unwrap();
        let err = session.load(&Source::Url("http://127.0.0.1:9/".into())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Navigation);
        assert_eq!(session.state(), SessionState::Failed);

        let err = session.capture().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capture);
        session.close().await;
    }

    #[tokio::test]
    async fn capture_before_load_is_rejected() {
        let (launcher, _) = launcher(false);
        let mut session = RenderSession::open(launcher, DeviceProfile::default()).await.unwrap();
        assert_eq!(session.capture().await.unwrap_err().kind(), ErrorKind::Capture);
        assert_eq!(session.state(), SessionState::Failed);
        session.close().await;
    }

    #[tokio::test]
    async fn operations_after_close_fail() {
        let (launcher, _) = launcher(false);
        let mut session = RenderSession::open(launcher, DeviceProfile::default()).await.unwrap();
        session.close().await;
        let err = session.load(&Source::Markup("<p/>".into())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Navigation);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn settle_waits_the_requested_time() {
        let (launcher, _) = launcher(false);
        let mut session = RenderSession::open(launcher, DeviceProfile::default()).await.unwrap();
        session.load(&Source::Markup("<p/>".into())).await.unwrap();
        let start = tokio::time::Instant::now();
        session.settle(2).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
        session.close().await;
    }
}
