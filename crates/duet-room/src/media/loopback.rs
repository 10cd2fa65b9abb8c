//! Media transport without devices or network.
//!
//! Tracks are flags, descriptions are synthetic SDP and candidates are
//! generated on every local description. The permission prompt can be
//! denied or held open, and every session keeps a log so callers can check
//! what was negotiated.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::protocol::{IceCandidate, SdpKind, SessionDescription};

use super::types::{
    IceServer, LocalStream, MediaConstraints, MediaError, MediaTrack, MediaTransport, PeerSession,
    SessionEvent, StreamHandle, TrackKind,
};

/// Candidates gathered per local description.
const CANDIDATES_PER_DESCRIPTION: u32 = 2;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Tracks
// ---------------------------------------------------------------------------

struct LoopbackTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    live: AtomicBool,
}

impl MediaTrack for LoopbackTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Permission prompt
// ---------------------------------------------------------------------------

enum Permission {
    Grant,
    Deny,
    Hold(oneshot::Receiver<bool>),
}

/// Answers a held permission prompt. Dropping it dismisses the prompt.
pub struct PermissionGate {
    tx: oneshot::Sender<bool>,
}

impl PermissionGate {
    pub fn grant(self) {
        let _ = self.tx.send(true);
    }

    pub fn deny(self) {
        let _ = self.tx.send(false);
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// What a session has been told so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionLog {
    pub tracks: Vec<TrackKind>,
    pub local_description: Option<SessionDescription>,
    pub remote_description: Option<SessionDescription>,
    pub local_candidates: Vec<IceCandidate>,
    pub remote_candidates: Vec<IceCandidate>,
}

/// Inspection handle for a session created by `LoopbackMedia`.
pub struct LoopbackSession {
    label: String,
    serial: u64,
    log: Mutex<SessionLog>,
    events_tx: Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    closed: AtomicBool,
}

impl LoopbackSession {
    fn new(label: &str, serial: u64) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            label: label.to_string(),
            serial,
            log: Mutex::new(SessionLog::default()),
            events_tx: Mutex::new(Some(tx)),
            events_rx: Mutex::new(Some(rx)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn log(&self) -> SessionLog {
        lock(&self.log).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), MediaError> {
        if self.is_closed() {
            Err(MediaError::Closed)
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = lock(&self.events_tx).as_ref() {
            let _ = tx.send(event);
        }
    }

    fn describe(&self, kind: SdpKind) -> SessionDescription {
        let tracks = lock(&self.log).tracks.clone();
        let mut sdp = format!(
            "v=0\r\no=duet-{} {} 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            self.label, self.serial
        );
        for kind in tracks {
            sdp.push_str(match kind {
                TrackKind::Audio => "m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n",
                TrackKind::Video => "m=video 9 UDP/TLS/RTP/SAVPF 96\r\n",
            });
        }
        SessionDescription { kind, sdp }
    }
}

/// The `PeerSession` handed to callers; the media object keeps its log.
struct SessionHandle(Arc<LoopbackSession>);

#[async_trait]
impl PeerSession for SessionHandle {
    fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), MediaError> {
        self.0.ensure_open()?;
        lock(&self.0.log).tracks.push(track.kind());
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        lock(&self.0.events_rx).take()
    }

    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        self.0.ensure_open()?;
        Ok(self.0.describe(SdpKind::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        self.0.ensure_open()?;
        let has_offer = lock(&self.0.log)
            .remote_description
            .as_ref()
            .is_some_and(|d| d.kind == SdpKind::Offer);
        if !has_offer {
            return Err(MediaError::Session(
                "cannot answer without a remote offer".to_string(),
            ));
        }
        Ok(self.0.describe(SdpKind::Answer))
    }

    async fn set_local_description(&self, description: &SessionDescription) -> Result<(), MediaError> {
        self.0.ensure_open()?;
        let candidates: Vec<IceCandidate> = (0..CANDIDATES_PER_DESCRIPTION)
            .map(|i| IceCandidate {
                candidate: format!(
                    "candidate:{i} 1 udp {} 192.0.2.{} {} typ host",
                    2_130_706_431 - i,
                    self.0.serial % 250 + 1,
                    50_000 + i
                ),
                sdp_mid: Some("0".to_string()),
                sdp_m_line_index: Some(0),
            })
            .collect();
        {
            let mut log = lock(&self.0.log);
            log.local_description = Some(description.clone());
            log.local_candidates.extend(candidates.iter().cloned());
        }
        for candidate in candidates {
            self.0.emit(SessionEvent::LocalIceCandidate(candidate));
        }
        Ok(())
    }

    async fn set_remote_description(&self, description: &SessionDescription) -> Result<(), MediaError> {
        self.0.ensure_open()?;
        lock(&self.0.log).remote_description = Some(description.clone());
        self.0.emit(SessionEvent::RemoteTrack(StreamHandle::new(format!(
            "{}-remote-{}",
            self.0.label, self.0.serial
        ))));
        Ok(())
    }

    async fn add_remote_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), MediaError> {
        self.0.ensure_open()?;
        let mut log = lock(&self.0.log);
        if log.remote_description.is_none() {
            return Err(MediaError::Session(
                "remote description not set".to_string(),
            ));
        }
        log.remote_candidates.push(candidate.clone());
        Ok(())
    }

    fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
        lock(&self.0.events_tx).take();
    }
}

// ---------------------------------------------------------------------------
// LoopbackMedia
// ---------------------------------------------------------------------------

struct LoopbackInner {
    label: String,
    permission: Mutex<Permission>,
    fail_sessions: AtomicBool,
    serial: AtomicU64,
    tracks: Mutex<Vec<Arc<LoopbackTrack>>>,
    sessions: Mutex<Vec<Arc<LoopbackSession>>>,
}

/// In-process `MediaTransport`. Cloning shares the same devices and session logs.
#[derive(Clone)]
pub struct LoopbackMedia {
    inner: Arc<LoopbackInner>,
}

impl LoopbackMedia {
    pub fn new(label: &str) -> Self {
        Self {
            inner: Arc::new(LoopbackInner {
                label: label.to_string(),
                permission: Mutex::new(Permission::Grant),
                fail_sessions: AtomicBool::new(false),
                serial: AtomicU64::new(1),
                tracks: Mutex::new(Vec::new()),
                sessions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Refuse every later permission prompt.
    pub fn deny_permission(&self) {
        *lock(&self.inner.permission) = Permission::Deny;
    }

    /// Grant every later permission prompt.
    pub fn grant_permission(&self) {
        *lock(&self.inner.permission) = Permission::Grant;
    }

    /// Make the next permission prompt wait until the returned gate answers.
    pub fn hold_permission(&self) -> PermissionGate {
        let (tx, rx) = oneshot::channel();
        *lock(&self.inner.permission) = Permission::Hold(rx);
        PermissionGate { tx }
    }

    pub fn fail_session_creation(&self, fail: bool) {
        self.inner.fail_sessions.store(fail, Ordering::SeqCst);
    }

    /// Captured tracks that have not been stopped.
    pub fn live_tracks(&self) -> usize {
        lock(&self.inner.tracks)
            .iter()
            .filter(|t| t.is_live())
            .count()
    }

    /// Tracks captured so far, stopped or not.
    pub fn captured_tracks(&self) -> usize {
        lock(&self.inner.tracks).len()
    }

    /// Every session created so far, oldest first.
    pub fn sessions(&self) -> Vec<Arc<LoopbackSession>> {
        lock(&self.inner.sessions).clone()
    }

    fn next_serial(&self) -> u64 {
        self.inner.serial.fetch_add(1, Ordering::SeqCst)
    }

    fn capture(&self, constraints: MediaConstraints) -> LocalStream {
        let serial = self.next_serial();
        let label = &self.inner.label;
        let mut kinds = Vec::new();
        if constraints.audio {
            kinds.push(TrackKind::Audio);
        }
        if constraints.video {
            kinds.push(TrackKind::Video);
        }
        let tracks: Vec<Arc<LoopbackTrack>> = kinds
            .into_iter()
            .map(|kind| {
                Arc::new(LoopbackTrack {
                    id: format!("{label}-{kind:?}-{serial}").to_lowercase(),
                    kind,
                    enabled: AtomicBool::new(true),
                    live: AtomicBool::new(true),
                })
            })
            .collect();
        lock(&self.inner.tracks).extend(tracks.iter().cloned());
        let tracks = tracks
            .into_iter()
            .map(|t| t as Arc<dyn MediaTrack>)
            .collect();
        LocalStream::new(StreamHandle::new(format!("{label}-local-{serial}")), tracks)
    }
}

#[async_trait]
impl MediaTransport for LoopbackMedia {
    async fn acquire_local_media(&self, constraints: MediaConstraints) -> Result<LocalStream, MediaError> {
        if !constraints.audio && !constraints.video {
            return Err(MediaError::DeviceUnavailable(
                "no media kinds requested".to_string(),
            ));
        }

        let permission = {
            let mut guard = lock(&self.inner.permission);
            if matches!(*guard, Permission::Deny) {
                Permission::Deny
            } else {
                std::mem::replace(&mut *guard, Permission::Grant)
            }
        };
        let granted = match permission {
            Permission::Grant => true,
            Permission::Deny => false,
            Permission::Hold(rx) => {
                debug!(label = %self.inner.label, "Waiting on permission prompt");
                rx.await.unwrap_or(false)
            }
        };
        if !granted {
            return Err(MediaError::PermissionDenied(
                "camera and microphone access refused".to_string(),
            ));
        }
        Ok(self.capture(constraints))
    }

    async fn create_session(&self, ice_servers: &[IceServer]) -> Result<Box<dyn PeerSession>, MediaError> {
        if self.inner.fail_sessions.load(Ordering::SeqCst) {
            return Err(MediaError::Session(
                "peer connection could not be created".to_string(),
            ));
        }
        let session = Arc::new(LoopbackSession::new(&self.inner.label, self.next_serial()));
        debug!(
            label = %self.inner.label,
            serial = session.serial,
            ice_servers = ice_servers.len(),
            "Peer session created"
        );
        lock(&self.inner.sessions).push(Arc::clone(&session));
        Ok(Box::new(SessionHandle(session)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_and_toggle() {
        let media = LoopbackMedia::new("a");
        let stream = media
            .acquire_local_media(MediaConstraints::default())
            .await
            .unwrap();
        assert_eq!(stream.tracks().len(), 2);
        assert_eq!(media.live_tracks(), 2);

        assert_eq!(stream.toggle(TrackKind::Audio), Some(false));
        assert!(!stream.has_enabled(TrackKind::Audio));
        assert_eq!(stream.toggle(TrackKind::Audio), Some(true));

        stream.stop();
        assert_eq!(media.live_tracks(), 0);
    }

    #[tokio::test]
    async fn audio_only_stream_has_no_video_to_toggle() {
        let media = LoopbackMedia::new("a");
        let stream = media
            .acquire_local_media(MediaConstraints {
                audio: true,
                video: false,
            })
            .await
            .unwrap();
        assert_eq!(stream.toggle(TrackKind::Video), None);
    }

    #[tokio::test]
    async fn denied_and_held_permission() {
        let media = LoopbackMedia::new("a");
        media.deny_permission();
        let err = media
            .acquire_local_media(MediaConstraints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::PermissionDenied(_)));

        let gate = media.hold_permission();
        let pending = {
            let media = media.clone();
            tokio::spawn(async move { media.acquire_local_media(MediaConstraints::default()).await })
        };
        gate.grant();
        assert!(pending.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn session_requires_offer_before_answer() {
        let media = LoopbackMedia::new("a");
        let session = media.create_session(&[IceServer::public_stun()]).await.unwrap();
        assert!(session.create_answer().await.is_err());

        let offer = SessionDescription {
            kind: SdpKind::Offer,
            sdp: "v=0".into(),
        };
        session.set_remote_description(&offer).await.unwrap();
        let answer = session.create_answer().await.unwrap();
        assert_eq!(answer.kind, SdpKind::Answer);
    }

    #[tokio::test]
    async fn local_description_emits_candidates() {
        let media = LoopbackMedia::new("a");
        let session = media.create_session(&[]).await.unwrap();
        let mut events = session.take_events().unwrap();
        assert!(session.take_events().is_none());

        let offer = session.create_offer().await.unwrap();
        session.set_local_description(&offer).await.unwrap();

        for _ in 0..CANDIDATES_PER_DESCRIPTION {
            assert!(matches!(
                events.recv().await,
                Some(SessionEvent::LocalIceCandidate(_))
            ));
        }

        session.close();
        assert_eq!(events.recv().await, None);
        assert!(media.sessions()[0].is_closed());
    }
}
